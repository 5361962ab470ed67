//! Product commands.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::error;

use super::{source_write_failed, CommandError, Result, WriteOutcome};
use crate::model::{EntityId, NewProduct, Product, ProductChanges};
use crate::projection::{EntityKind, ProductProjection, ProductSummaryProjection};
use crate::store::ProductStore;
use crate::sync::{ProjectionSync, SyncStatus};

pub struct ProductCommands {
    store: Arc<dyn ProductStore>,
    sync: Arc<ProjectionSync>,
}

fn check_price(price: Decimal) -> Result<()> {
    if price.is_sign_negative() {
        return Err(CommandError::Invalid(format!("price must not be negative: {price}")));
    }
    Ok(())
}

impl ProductCommands {
    pub fn new(store: Arc<dyn ProductStore>, sync: Arc<ProjectionSync>) -> Self {
        Self { store, sync }
    }

    pub async fn add(&self, product: NewProduct) -> Result<WriteOutcome<Product>> {
        check_price(product.price)?;

        let committed = self
            .store
            .insert(product)
            .await
            .map_err(|e| source_write_failed("AddProduct", e))?;
        let projection = self.sync.product_saved(&committed).await;

        Ok(WriteOutcome {
            value: committed.value,
            projection,
        })
    }

    /// Apply a partial update. Fields left as `None` keep their value; an
    /// update with no fields at all is `Invalid`.
    pub async fn update(&self, id: EntityId, changes: ProductChanges) -> Result<WriteOutcome<Product>> {
        if changes.is_empty() {
            return Err(CommandError::Invalid("product update changes nothing".to_string()));
        }
        if let Some(price) = changes.price {
            check_price(price)?;
        }

        let committed = self
            .store
            .update(id, &changes)
            .await
            .map_err(|e| source_write_failed("UpdateProduct", e))?
            .ok_or_else(|| {
                error!(command = "UpdateProduct", id = id, "Product not found");
                CommandError::NotFound {
                    entity: EntityKind::Product,
                    id,
                }
            })?;
        let projection = self.sync.product_saved(&committed).await;

        Ok(WriteOutcome {
            value: committed.value,
            projection,
        })
    }

    /// Delete a product with its projection and summary. Deleting an
    /// unknown id only clears any leftover projection and summary.
    pub async fn delete(&self, id: EntityId) -> Result<WriteOutcome<Option<Product>>> {
        let removed = self
            .store
            .remove(id)
            .await
            .map_err(|e| source_write_failed("DeleteProduct", e))?;

        match removed {
            Some(committed) => {
                let projection = self.sync.product_removed(&committed).await;
                Ok(WriteOutcome {
                    value: Some(committed.value),
                    projection,
                })
            }
            None => {
                self.sync.products().delete_projection(id).await?;
                self.sync.summaries().remove(id).await?;
                Ok(WriteOutcome {
                    value: None,
                    projection: SyncStatus::Synced,
                })
            }
        }
    }

    pub async fn get(&self, id: EntityId) -> Result<Option<ProductProjection>> {
        Ok(self.sync.products().repository().find(id).await?)
    }

    /// The product summary, if present and not expired.
    pub async fn get_summary(&self, id: EntityId) -> Result<Option<ProductSummaryProjection>> {
        Ok(self.sync.summaries().find(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<ProductProjection>> {
        Ok(self.sync.products().repository().find_all().await?)
    }
}
