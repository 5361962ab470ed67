//! Keeps one projection kind in step with its source of truth.

use std::sync::Arc;

use tracing::{info, warn};

use super::{Projection, ProjectionError, ProjectionRepository, Result};
use crate::model::EntityId;
use crate::store::SourceOfTruth;

/// Builds projections from source entities and writes them to the cache.
pub struct ProjectionService<P: Projection> {
    source: Arc<dyn SourceOfTruth<P::Source>>,
    repository: ProjectionRepository<P>,
}

impl<P: Projection> Clone for ProjectionService<P> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            repository: self.repository.clone(),
        }
    }
}

impl<P: Projection> ProjectionService<P> {
    pub fn new(source: Arc<dyn SourceOfTruth<P::Source>>, repository: ProjectionRepository<P>) -> Self {
        Self { source, repository }
    }

    pub fn repository(&self) -> &ProjectionRepository<P> {
        &self.repository
    }

    /// Build the projection of `entity` and store it. Idempotent; the last
    /// write for an id wins.
    pub async fn update_projection(&self, entity: &P::Source) -> Result<P> {
        let projection = P::build(entity)?;
        self.repository.save(&projection).await?;
        Ok(projection)
    }

    /// Remove the projection of `id`. Absent projections are not an error.
    pub async fn delete_projection(&self, id: EntityId) -> Result<()> {
        self.repository.delete(id).await
    }

    /// Remove the projection of `id` from the given secondary indexes
    /// without reading the stored record.
    pub async fn delete_projection_indexed(&self, id: EntityId, secondary_index_keys: &[String]) -> Result<()> {
        self.repository.delete_indexed(id, secondary_index_keys).await
    }

    /// Bring the projection of `id` in line with the source of truth.
    ///
    /// Returns the stored projection, or `None` if the entity no longer
    /// exists and its projection was removed.
    pub async fn reconcile(&self, id: EntityId) -> Result<Option<P>> {
        match self.source.load(id).await? {
            Some(entity) => self.update_projection(&entity).await.map(Some),
            None => {
                self.repository.delete(id).await?;
                Ok(None)
            }
        }
    }

    /// Drop every projection of this kind and rebuild from the source of
    /// truth. Returns the number of projections written.
    ///
    /// Entities whose projection cannot be built (an order whose customer is
    /// gone) are skipped with a warning.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let entities = self.source.load_all().await?;
        self.repository.clear().await?;

        let mut written = 0;
        for entity in &entities {
            let projection = match P::build(entity) {
                Ok(projection) => projection,
                Err(e @ ProjectionError::MissingRelation { .. }) => {
                    warn!(entity = %P::KIND, error = %e, "Skipping entity during rebuild");
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.repository.save(&projection).await?;
            written += 1;
        }

        info!(
            entity = %P::KIND,
            loaded = entities.len(),
            written = written,
            "Rebuilt projections"
        );
        Ok(written)
    }
}
