//! Order commands.

use std::sync::Arc;

use tracing::{debug, warn};

use super::{source_write_failed, CommandError, Result, WriteOutcome};
use crate::model::{price_order_lines, Customer, EntityId, NewOrder, Order};
use crate::projection::{EntityKind, OrderProjection};
use crate::store::{OrderStore, ProductStore, SourceOfTruth};
use crate::sync::{ProjectionSync, SyncStatus};

pub struct OrderCommands {
    orders: Arc<dyn OrderStore>,
    customers: Arc<dyn SourceOfTruth<Customer>>,
    products: Arc<dyn ProductStore>,
    sync: Arc<ProjectionSync>,
}

impl OrderCommands {
    pub fn new(
        orders: Arc<dyn OrderStore>,
        customers: Arc<dyn SourceOfTruth<Customer>>,
        products: Arc<dyn ProductStore>,
        sync: Arc<ProjectionSync>,
    ) -> Self {
        Self {
            orders,
            customers,
            products,
            sync,
        }
    }

    /// Place an order.
    ///
    /// The customer must exist, otherwise nothing is written. Product names
    /// and prices are snapshotted from one batched lookup; lines naming
    /// unknown products are dropped. A total that overflows is `Invalid`.
    pub async fn add(&self, order: NewOrder) -> Result<WriteOutcome<Order>> {
        if order.order_number.trim().is_empty() {
            return Err(CommandError::Invalid("order number must not be empty".to_string()));
        }

        if self.customers.load(order.customer_id).await?.is_none() {
            warn!(command = "AddOrder", customer_id = order.customer_id, "Customer not found");
            return Err(CommandError::ReferenceNotFound {
                entity: EntityKind::Customer,
                id: order.customer_id,
            });
        }

        let product_ids: Vec<EntityId> = order.lines.iter().map(|line| line.product_id).collect();
        let products = self.products.find_by_ids(&product_ids).await?;
        let priced = price_order_lines(&order.lines, &products).map_err(|e| {
            warn!(command = "AddOrder", order_number = %order.order_number, error = %e, "Order cannot be priced");
            CommandError::Invalid(e.to_string())
        })?;
        if !priced.skipped.is_empty() {
            debug!(
                order_number = %order.order_number,
                skipped = ?priced.skipped,
                "Dropping order lines for unknown products"
            );
        }

        let committed = self
            .orders
            .insert(order, priced)
            .await
            .map_err(|e| source_write_failed("AddOrder", e))?;
        let projection = self.sync.order_saved(&committed).await;

        Ok(WriteOutcome {
            value: committed.value,
            projection,
        })
    }

    /// Delete an order. Deleting an unknown id only clears any leftover
    /// projection.
    pub async fn delete(&self, id: EntityId) -> Result<WriteOutcome<Option<Order>>> {
        let removed = self
            .orders
            .remove(id)
            .await
            .map_err(|e| source_write_failed("DeleteOrder", e))?;

        match removed {
            Some(committed) => {
                let projection = self.sync.order_removed(&committed).await;
                Ok(WriteOutcome {
                    value: Some(committed.value),
                    projection,
                })
            }
            None => {
                self.sync.orders().delete_projection(id).await?;
                Ok(WriteOutcome {
                    value: None,
                    projection: SyncStatus::Synced,
                })
            }
        }
    }

    pub async fn get(&self, id: EntityId) -> Result<Option<OrderProjection>> {
        Ok(self.sync.orders().repository().find(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<OrderProjection>> {
        Ok(self.sync.orders().repository().find_all().await?)
    }

    pub async fn list_for_customer(&self, customer_id: EntityId) -> Result<Vec<OrderProjection>> {
        Ok(self.sync.orders().repository().find_by_customer(customer_id).await?)
    }
}
