//! Product summaries: short-lived hash projections of products.
//!
//! Each summary lives in the hash `product_summary:{id}` with a TTL and is
//! indexed by the `product_summaries:all` set. Summary writes are best
//! effort: failures are logged and never reach the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDateTime;
use futures::stream::{self, TryStreamExt};
use tracing::{debug, error, info, warn};

use super::{ProjectionError, Result};
use crate::cache::KeyValueStore;
use crate::model::{format_timestamp, money, parse_timestamp, EntityId, Product};
use crate::store::SourceOfTruth;

/// Lifetime of a summary hash unless configured otherwise.
pub const DEFAULT_SUMMARY_TTL: Duration = Duration::from_secs(3600);

const KEY_PREFIX: &str = "product_summary:";
const KEY_ALL: &str = "product_summaries:all";
/// Summary writes in flight during a rebuild.
const REBUILD_CONCURRENCY: usize = 16;

fn summary_key(product_id: EntityId) -> String {
    format!("{KEY_PREFIX}{product_id}")
}

/// Flat product summary. Every field is stored as a hash string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductSummaryProjection {
    pub product_id: EntityId,
    pub name: String,
    pub description: String,
    /// Two-decimal price, e.g. `"19.90"`.
    pub price: String,
    pub created_at: NaiveDateTime,
}

impl ProductSummaryProjection {
    pub fn build(product: &Product) -> Self {
        Self {
            product_id: product.id,
            name: product.name.clone(),
            description: product.description.clone(),
            price: money(product.price).to_string(),
            created_at: product.created_at,
        }
    }

    fn to_fields(&self) -> Vec<(String, String)> {
        vec![
            ("product_id".to_string(), self.product_id.to_string()),
            ("name".to_string(), self.name.clone()),
            ("description".to_string(), self.description.clone()),
            ("price".to_string(), self.price.clone()),
            ("created_at".to_string(), format_timestamp(&self.created_at)),
        ]
    }

    /// `None` for an empty hash or one missing `product_id`.
    fn from_fields(mut fields: HashMap<String, String>) -> Option<Self> {
        let product_id = fields.get("product_id")?.parse().ok()?;
        let created_at = parse_timestamp(fields.get("created_at")?)?;
        Some(Self {
            product_id,
            name: fields.remove("name").unwrap_or_default(),
            description: fields.remove("description").unwrap_or_default(),
            price: fields.remove("price").unwrap_or_default(),
            created_at,
        })
    }
}

/// Maintains product summaries.
#[derive(Clone)]
pub struct ProductSummaryService {
    source: Arc<dyn SourceOfTruth<Product>>,
    cache: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ProductSummaryService {
    pub fn new(source: Arc<dyn SourceOfTruth<Product>>, cache: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { source, cache, ttl }
    }

    /// Write the summary of an already loaded product. Errors are logged.
    pub async fn refresh(&self, product: &Product) {
        let summary = ProductSummaryProjection::build(product);
        match self.save(&summary).await {
            Ok(()) => info!(product_id = product.id, "Product summary updated"),
            Err(e) => error!(product_id = product.id, error = %e, "Product summary update failed"),
        }
    }

    /// Load a product from the source of truth and write its summary.
    ///
    /// Unknown products are ignored. Errors are logged. Returns whether a
    /// summary was written.
    pub async fn update_summary(&self, product_id: EntityId) -> bool {
        let product = match self.source.load(product_id).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                debug!(product_id = product_id, "No product to summarise");
                return false;
            }
            Err(e) => {
                error!(product_id = product_id, error = %e, "Product summary update failed");
                return false;
            }
        };

        let summary = ProductSummaryProjection::build(&product);
        match self.save(&summary).await {
            Ok(()) => {
                info!(product_id = product_id, "Product summary updated");
                true
            }
            Err(e) => {
                error!(product_id = product_id, error = %e, "Product summary update failed");
                false
            }
        }
    }

    /// Store a summary, refresh its TTL and index it.
    pub async fn save(&self, summary: &ProductSummaryProjection) -> Result<()> {
        let key = summary_key(summary.product_id);
        self.cache.hset_all(&key, &summary.to_fields()).await?;
        self.cache.expire(&key, self.ttl).await?;
        self.cache
            .sadd(KEY_ALL, &summary.product_id.to_string())
            .await?;
        Ok(())
    }

    pub async fn find(&self, product_id: EntityId) -> Result<Option<ProductSummaryProjection>> {
        let fields = self.cache.hgetall(&summary_key(product_id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        let summary = ProductSummaryProjection::from_fields(fields);
        if summary.is_none() {
            warn!(product_id = product_id, "Stored product summary is incomplete, treating as absent");
        }
        Ok(summary)
    }

    /// Every indexed summary that has not expired.
    ///
    /// Index members whose hash has expired are pruned from the index.
    pub async fn find_all(&self) -> Result<Vec<ProductSummaryProjection>> {
        let mut summaries = Vec::new();
        let mut pruned = 0usize;
        for member in self.cache.smembers(KEY_ALL).await? {
            let Ok(product_id) = member.parse::<EntityId>() else {
                continue;
            };
            let fields = self.cache.hgetall(&summary_key(product_id)).await?;
            if fields.is_empty() {
                self.cache.srem(KEY_ALL, &member).await?;
                pruned += 1;
                continue;
            }
            match ProductSummaryProjection::from_fields(fields) {
                Some(summary) => summaries.push(summary),
                None => warn!(product_id = product_id, "Stored product summary is incomplete, treating as absent"),
            }
        }
        if pruned > 0 {
            debug!(pruned = pruned, "Pruned expired product summaries from index");
        }
        Ok(summaries)
    }

    pub async fn remove(&self, product_id: EntityId) -> Result<()> {
        self.cache.del(&[summary_key(product_id)]).await?;
        self.cache.srem(KEY_ALL, &product_id.to_string()).await?;
        Ok(())
    }

    /// Drop every summary and rebuild from the source of truth. Returns the
    /// number of summaries written.
    pub async fn rebuild_all(&self) -> Result<usize> {
        let products = self.source.load_all().await?;

        let mut stale: Vec<String> = self
            .cache
            .smembers(KEY_ALL)
            .await?
            .iter()
            .map(|member| format!("{KEY_PREFIX}{member}"))
            .collect();
        stale.push(KEY_ALL.to_string());
        self.cache.del(&stale).await?;

        stream::iter(products.iter().map(Ok::<_, ProjectionError>))
            .try_for_each_concurrent(REBUILD_CONCURRENCY, |product| async move {
                self.save(&ProductSummaryProjection::build(product)).await
            })
            .await?;

        info!(written = products.len(), "Rebuilt product summaries");
        Ok(products.len())
    }
}
