//! Read projections: records, builders, cache repositories and services.
//!
//! A projection is a flat JSON copy of one source-of-truth row, stored in
//! the cache under `{entity}:{id}` and indexed by the `{entity}s:all` set.
//! Orders are also indexed per customer under `orders:customer:{id}`.

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::model::EntityId;

mod records;
mod repository;
mod service;
mod summary;

pub use records::{CustomerProjection, OrderProjection, ProductProjection};
pub use repository::{OrderProjectionRepository, ProjectionRepository};
pub use service::ProjectionService;
pub use summary::{ProductSummaryProjection, ProductSummaryService, DEFAULT_SUMMARY_TTL};

/// Errors raised while building or storing projections.
#[derive(Debug, thiserror::Error)]
pub enum ProjectionError {
    #[error("{entity} {id} has no resolvable {relation}")]
    MissingRelation {
        entity: EntityKind,
        id: EntityId,
        relation: &'static str,
    },

    #[error("Failed to encode {entity} {id}: {source}")]
    Encode {
        entity: EntityKind,
        id: EntityId,
        #[source]
        source: serde_json::Error,
    },

    #[error("Cache error: {0}")]
    Cache(#[from] crate::cache::CacheError),

    #[error("Source of truth error: {0}")]
    Source(#[from] crate::store::StoreError),
}

/// Result type for projection operations.
pub type Result<T> = std::result::Result<T, ProjectionError>;

/// Entity types that have a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Customer,
    Product,
    Order,
}

impl EntityKind {
    pub const ALL: [EntityKind; 3] = [EntityKind::Customer, EntityKind::Product, EntityKind::Order];

    /// Singular name, used as record key prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Customer => "customer",
            EntityKind::Product => "product",
            EntityKind::Order => "order",
        }
    }

    /// Parse the singular or plural name.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "customer" | "customers" => Some(EntityKind::Customer),
            "product" | "products" => Some(EntityKind::Product),
            "order" | "orders" => Some(EntityKind::Order),
            _ => None,
        }
    }

    /// Key of a single projection record: `{entity}:{id}`.
    pub fn record_key(&self, id: EntityId) -> String {
        format!("{}:{}", self.as_str(), id)
    }

    /// Key of the set holding every projected id: `{entity}s:all`.
    pub fn all_key(&self) -> String {
        format!("{}s:all", self.as_str())
    }

    /// Glob matching every secondary index key of this kind, if any.
    pub fn secondary_index_pattern(&self) -> Option<&'static str> {
        match self {
            EntityKind::Order => Some("orders:customer:*"),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key of the per-customer order index: `orders:customer:{customerId}`.
pub fn customer_orders_key(customer_id: EntityId) -> String {
    format!("orders:customer:{}", customer_id)
}

/// A cache-resident read model of one source-of-truth entity.
pub trait Projection: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    /// The source-of-truth entity this projection is built from.
    type Source: Send + Sync + 'static;

    const KIND: EntityKind;

    /// Build the projection from its entity. Pure: no I/O.
    fn build(source: &Self::Source) -> Result<Self>;

    /// Id of the source row.
    fn id(&self) -> EntityId;

    /// Secondary index sets this record must be a member of.
    fn secondary_index_keys(&self) -> Vec<String> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(EntityKind::Customer.record_key(3), "customer:3");
        assert_eq!(EntityKind::Customer.all_key(), "customers:all");
        assert_eq!(EntityKind::Product.record_key(12), "product:12");
        assert_eq!(EntityKind::Product.all_key(), "products:all");
        assert_eq!(EntityKind::Order.record_key(40), "order:40");
        assert_eq!(EntityKind::Order.all_key(), "orders:all");
        assert_eq!(customer_orders_key(3), "orders:customer:3");
    }

    #[test]
    fn test_secondary_pattern_only_for_orders() {
        assert_eq!(
            EntityKind::Order.secondary_index_pattern(),
            Some("orders:customer:*")
        );
        assert!(EntityKind::Customer.secondary_index_pattern().is_none());
        assert!(EntityKind::Product.secondary_index_pattern().is_none());
    }

    #[test]
    fn test_parse_kind() {
        assert_eq!(EntityKind::parse("orders"), Some(EntityKind::Order));
        assert_eq!(EntityKind::parse("customer"), Some(EntityKind::Customer));
        assert_eq!(EntityKind::parse("invoices"), None);
    }
}
