//! Customer commands.

use std::sync::Arc;

use super::{source_write_failed, CommandError, Result, WriteOutcome};
use crate::model::{Customer, EntityId, NewCustomer};
use crate::projection::CustomerProjection;
use crate::store::CustomerStore;
use crate::sync::{ProjectionSync, SyncStatus};

pub struct CustomerCommands {
    store: Arc<dyn CustomerStore>,
    sync: Arc<ProjectionSync>,
}

impl CustomerCommands {
    pub fn new(store: Arc<dyn CustomerStore>, sync: Arc<ProjectionSync>) -> Self {
        Self { store, sync }
    }

    /// Create a customer. Fails with a store conflict if the email is taken.
    pub async fn add(&self, customer: NewCustomer) -> Result<WriteOutcome<Customer>> {
        if customer.email.trim().is_empty() {
            return Err(CommandError::Invalid("customer email must not be empty".to_string()));
        }

        let committed = self
            .store
            .insert(customer)
            .await
            .map_err(|e| source_write_failed("AddCustomer", e))?;
        let projection = self.sync.customer_saved(&committed).await;

        Ok(WriteOutcome {
            value: committed.value,
            projection,
        })
    }

    /// Delete a customer. Deleting an unknown id only clears any leftover
    /// projection.
    pub async fn delete(&self, id: EntityId) -> Result<WriteOutcome<Option<Customer>>> {
        let removed = self
            .store
            .remove(id)
            .await
            .map_err(|e| source_write_failed("DeleteCustomer", e))?;

        match removed {
            Some(committed) => {
                let projection = self.sync.customer_removed(&committed).await;
                Ok(WriteOutcome {
                    value: Some(committed.value),
                    projection,
                })
            }
            None => {
                self.sync.customers().delete_projection(id).await?;
                Ok(WriteOutcome {
                    value: None,
                    projection: SyncStatus::Synced,
                })
            }
        }
    }

    pub async fn get(&self, id: EntityId) -> Result<Option<CustomerProjection>> {
        Ok(self.sync.customers().repository().find(id).await?)
    }

    pub async fn list(&self) -> Result<Vec<CustomerProjection>> {
        Ok(self.sync.customers().repository().find_all().await?)
    }
}
