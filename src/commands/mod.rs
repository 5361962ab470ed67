//! Command handlers: the write and read entry points of the storefront.
//!
//! Writes validate references, commit to the source of truth (which
//! records the outbox entry in the same transaction) and then settle the
//! projection. Reads go straight to the projection repositories.

use std::sync::Arc;

use tracing::{error, warn};

use crate::cache::CacheError;
use crate::model::EntityId;
use crate::projection::{EntityKind, ProjectionError};
use crate::store::{CustomerStore, OrderStore, ProductStore, StoreError};
use crate::sync::{ProjectionSync, SyncStatus};

mod customer;
mod order;
mod product;

pub use customer::CustomerCommands;
pub use order::OrderCommands;
pub use product::ProductCommands;

/// Result type for command handlers.
pub type Result<T> = std::result::Result<T, CommandError>;

/// Errors surfaced to callers of the command handlers.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    /// A referenced entity does not exist; nothing was written.
    #[error("{entity} {id} not found")]
    ReferenceNotFound { entity: EntityKind, id: EntityId },

    /// The entity the command targets does not exist.
    #[error("{entity} {id} does not exist")]
    NotFound { entity: EntityKind, id: EntityId },

    #[error("Invalid command: {0}")]
    Invalid(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Projection error: {0}")]
    Projection(#[from] ProjectionError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// A committed write and whether its projection caught up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome<T> {
    pub value: T,
    /// `Deferred` means the projection is stale until outbox recovery runs.
    pub projection: SyncStatus,
}

/// Log a failed source-of-truth write and turn it into a command error.
fn source_write_failed(command: &'static str, e: StoreError) -> CommandError {
    match e {
        StoreError::MissingReference { entity, id } => {
            warn!(command = command, entity = %entity, id = id, "Referenced entity not found");
            CommandError::ReferenceNotFound { entity, id }
        }
        e => {
            error!(command = command, error = %e, "Source-of-truth write failed");
            CommandError::Store(e)
        }
    }
}

/// All command handlers over one store and one cache.
pub struct Storefront {
    pub customers: CustomerCommands,
    pub products: ProductCommands,
    pub orders: OrderCommands,
    sync: Arc<ProjectionSync>,
}

impl Storefront {
    pub fn new<S>(store: Arc<S>, sync: Arc<ProjectionSync>) -> Self
    where
        S: CustomerStore + ProductStore + OrderStore + 'static,
    {
        Self {
            customers: CustomerCommands::new(store.clone(), sync.clone()),
            products: ProductCommands::new(store.clone(), sync.clone()),
            orders: OrderCommands::new(store.clone(), store.clone(), store, sync.clone()),
            sync,
        }
    }

    pub fn sync(&self) -> &Arc<ProjectionSync> {
        &self.sync
    }
}

#[cfg(test)]
mod tests;
