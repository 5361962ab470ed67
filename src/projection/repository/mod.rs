//! Cache persistence of projection records and their index sets.

use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{customer_orders_key, OrderProjection, Projection, ProjectionError, Result};
use crate::cache::KeyValueStore;
use crate::model::EntityId;

/// Stores projections of one kind under `{entity}:{id}` and keeps the
/// `{entity}s:all` set (plus any secondary sets) in step with them.
pub struct ProjectionRepository<P: Projection> {
    cache: Arc<dyn KeyValueStore>,
    _projection: PhantomData<fn() -> P>,
}

impl<P: Projection> Clone for ProjectionRepository<P> {
    fn clone(&self) -> Self {
        Self::new(self.cache.clone())
    }
}

impl<P: Projection> ProjectionRepository<P> {
    pub fn new(cache: Arc<dyn KeyValueStore>) -> Self {
        Self {
            cache,
            _projection: PhantomData,
        }
    }

    /// Look up one record. Missing or undecodable values read as `None`.
    pub async fn find(&self, id: EntityId) -> Result<Option<P>> {
        let key = P::KIND.record_key(id);
        let raw = self.cache.get(&key).await?;
        Ok(raw.and_then(|raw| decode::<P>(&key, &raw)))
    }

    /// Every record named by the all-index, fetched in one batched read.
    ///
    /// Index members with no stored record are skipped. Order is unspecified.
    pub async fn find_all(&self) -> Result<Vec<P>> {
        self.find_by_index(&P::KIND.all_key()).await
    }

    /// Every record named by an index set, fetched in one batched read.
    pub async fn find_by_index(&self, index_key: &str) -> Result<Vec<P>> {
        let ids = self.index_members(index_key).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| P::KIND.record_key(*id)).collect();
        let values = self.cache.mget(&keys).await?;

        let records: Vec<P> = keys
            .iter()
            .zip(values)
            .filter_map(|(key, raw)| raw.and_then(|raw| decode::<P>(key, &raw)))
            .collect();

        if records.len() < keys.len() {
            debug!(
                entity = %P::KIND,
                index = %index_key,
                indexed = keys.len(),
                found = records.len(),
                "Index names records that are not stored"
            );
        }

        Ok(records)
    }

    /// Ids currently in the all-index.
    pub async fn ids(&self) -> Result<Vec<EntityId>> {
        self.index_members(&P::KIND.all_key()).await
    }

    /// Upsert a record and add it to every index it belongs to.
    pub async fn save(&self, projection: &P) -> Result<()> {
        let id = projection.id();
        let json = serde_json::to_string(projection).map_err(|source| ProjectionError::Encode {
            entity: P::KIND,
            id,
            source,
        })?;
        let member = id.to_string();

        self.cache.set(&P::KIND.record_key(id), &json).await?;
        self.cache.sadd(&P::KIND.all_key(), &member).await?;
        for index_key in projection.secondary_index_keys() {
            self.cache.sadd(&index_key, &member).await?;
        }

        debug!(entity = %P::KIND, id = id, "Saved projection");
        Ok(())
    }

    /// Remove a record and its index memberships.
    ///
    /// Secondary index keys are learned by reading the stored record first;
    /// if it is already gone those memberships cannot be found. Prefer
    /// [`delete_indexed`](Self::delete_indexed) when the caller knows them.
    pub async fn delete(&self, id: EntityId) -> Result<()> {
        let secondary = if P::KIND.secondary_index_pattern().is_some() {
            match self.find(id).await? {
                Some(existing) => existing.secondary_index_keys(),
                None => {
                    warn!(
                        entity = %P::KIND,
                        id = id,
                        "Deleting projection with no stored record; secondary indexes not cleaned"
                    );
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };

        self.delete_indexed(id, &secondary).await
    }

    /// Remove a record, its all-index membership and the given secondary
    /// index memberships, without reading the record.
    pub async fn delete_indexed(&self, id: EntityId, secondary_index_keys: &[String]) -> Result<()> {
        let member = id.to_string();

        self.cache.del(&[P::KIND.record_key(id)]).await?;
        self.cache.srem(&P::KIND.all_key(), &member).await?;
        for index_key in secondary_index_keys {
            self.cache.srem(index_key, &member).await?;
        }

        debug!(entity = %P::KIND, id = id, "Deleted projection");
        Ok(())
    }

    /// Drop every record reachable from the all-index, the index itself and
    /// all secondary index sets of this kind.
    pub async fn clear(&self) -> Result<()> {
        let ids = self.ids().await?;
        let mut keys: Vec<String> = ids.iter().map(|id| P::KIND.record_key(*id)).collect();
        keys.push(P::KIND.all_key());
        self.cache.del(&keys).await?;

        let mut swept = 0;
        if let Some(pattern) = P::KIND.secondary_index_pattern() {
            swept = self.cache.delete_matching(pattern).await?;
        }

        debug!(
            entity = %P::KIND,
            records = ids.len(),
            secondary_indexes = swept,
            "Cleared projections"
        );
        Ok(())
    }

    async fn index_members(&self, index_key: &str) -> Result<Vec<EntityId>> {
        let members = self.cache.smembers(index_key).await?;
        Ok(members
            .iter()
            .filter_map(|member| match member.parse::<EntityId>() {
                Ok(id) => Some(id),
                Err(_) => {
                    warn!(index = %index_key, member = %member, "Ignoring non-numeric index member");
                    None
                }
            })
            .collect())
    }
}

/// Order projections with the per-customer index.
pub type OrderProjectionRepository = ProjectionRepository<OrderProjection>;

impl ProjectionRepository<OrderProjection> {
    /// Orders indexed under one customer.
    pub async fn find_by_customer(&self, customer_id: EntityId) -> Result<Vec<OrderProjection>> {
        self.find_by_index(&customer_orders_key(customer_id)).await
    }

    /// Delete an order projection whose owning customer is already known.
    pub async fn delete_for_customer(&self, id: EntityId, customer_id: EntityId) -> Result<()> {
        self.delete_indexed(id, &[customer_orders_key(customer_id)])
            .await
    }
}

fn decode<P: Projection>(key: &str, raw: &str) -> Option<P> {
    match serde_json::from_str(raw) {
        Ok(projection) => Some(projection),
        Err(e) => {
            warn!(key = %key, error = %e, "Stored projection is not decodable, treating as absent");
            None
        }
    }
}
