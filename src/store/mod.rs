//! Relational source of truth.
//!
//! Every write runs in a single relational transaction that also records a
//! row in the projection outbox. The outbox row names the projection that
//! must be refreshed; it is completed once the cache has been updated, so a
//! cache failure after commit leaves a durable trace instead of silent drift.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use uuid::Uuid;

use crate::model::{
    Customer, EntityId, NewCustomer, NewOrder, NewProduct, Order, PricedLines, Product,
    ProductChanges,
};
use crate::projection::EntityKind;

pub mod mock;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use mock::MemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqlStore;

/// Result type for source-of-truth operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur in the source of truth.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[cfg(feature = "sqlite")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    #[error("Referenced {entity} {id} does not exist")]
    MissingReference { entity: EntityKind, id: EntityId },

    #[error("Corrupt {column} in {table} row {id}: {detail}")]
    Corrupt {
        table: &'static str,
        column: &'static str,
        id: String,
        detail: String,
    },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Identifier of an outbox row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutboxTicket(pub Uuid);

impl OutboxTicket {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OutboxTicket {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OutboxTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What happened to the source row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboxAction {
    Upsert,
    Delete,
}

impl OutboxAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxAction::Upsert => "upsert",
            OutboxAction::Delete => "delete",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "upsert" => Some(OutboxAction::Upsert),
            "delete" => Some(OutboxAction::Delete),
            _ => None,
        }
    }
}

/// A projection refresh owed to the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxEntry {
    pub ticket: OutboxTicket,
    pub entity: EntityKind,
    pub entity_id: EntityId,
    pub action: OutboxAction,
    /// Owning customer of an order, kept so the per-customer index can be
    /// cleaned without reading the cached record.
    pub customer_id: Option<EntityId>,
    pub retry_count: u32,
    pub created_at: NaiveDateTime,
}

impl OutboxEntry {
    pub fn new(
        entity: EntityKind,
        entity_id: EntityId,
        action: OutboxAction,
        customer_id: Option<EntityId>,
    ) -> Self {
        Self {
            ticket: OutboxTicket::new(),
            entity,
            entity_id,
            action,
            customer_id,
            retry_count: 0,
            created_at: crate::model::now(),
        }
    }
}

/// A committed write and the outbox row it left behind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Committed<T> {
    pub value: T,
    pub ticket: OutboxTicket,
}

/// Read access the projection layer needs to build or rebuild projections.
#[async_trait]
pub trait SourceOfTruth<E>: Send + Sync {
    /// Load one entity by id.
    async fn load(&self, id: EntityId) -> Result<Option<E>>;

    /// Load every entity.
    async fn load_all(&self) -> Result<Vec<E>>;
}

/// Customer writes.
#[async_trait]
pub trait CustomerStore: SourceOfTruth<Customer> {
    /// Insert a customer. Fails with `Conflict` if the email is taken.
    async fn insert(&self, customer: NewCustomer) -> Result<Committed<Customer>>;

    /// Remove a customer. `None` if there was nothing to remove.
    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Customer>>>;
}

/// Product writes and lookups.
#[async_trait]
pub trait ProductStore: SourceOfTruth<Product> {
    async fn insert(&self, product: NewProduct) -> Result<Committed<Product>>;

    /// Apply a partial update. `None` if the product does not exist.
    async fn update(&self, id: EntityId, changes: &ProductChanges) -> Result<Option<Committed<Product>>>;

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Product>>>;

    /// Load many products in one query, keyed by id. Unknown ids are absent.
    async fn find_by_ids(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Product>>;
}

/// Order writes.
#[async_trait]
pub trait OrderStore: SourceOfTruth<Order> {
    /// Insert an order with its priced items.
    ///
    /// Fails with `MissingReference` if the customer does not exist.
    async fn insert(&self, order: NewOrder, priced: PricedLines) -> Result<Committed<Order>>;

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Order>>>;
}

/// Durable queue of projection refreshes.
#[async_trait]
pub trait ProjectionOutbox: Send + Sync {
    /// Entries older than `min_age` with fewer than `max_retries` failures,
    /// oldest first.
    async fn pending(&self, limit: u32, max_retries: u32, min_age: Duration) -> Result<Vec<OutboxEntry>>;

    /// Remove a processed entry.
    async fn complete(&self, ticket: OutboxTicket) -> Result<()>;

    /// Count a failed attempt. Returns the new retry count.
    async fn record_failure(&self, ticket: OutboxTicket) -> Result<u32>;

    /// Number of entries still in the outbox, including exhausted ones.
    async fn backlog(&self) -> Result<u64>;
}
