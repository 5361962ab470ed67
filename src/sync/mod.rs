//! Projection synchronisation after source-of-truth commits.
//!
//! Every store write leaves an outbox row naming the projection it owes the
//! cache. [`ProjectionSync::settle`] performs that projection write right
//! after the commit and completes the row on success. When the cache write
//! fails the row stays behind and the recovery loop reconciles it against
//! the source of truth later, so the source write is never reported as
//! failed because of the cache.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error, info, warn};

use crate::cache::KeyValueStore;
use crate::model::{Customer, EntityId, Order, Product};
use crate::projection::{
    customer_orders_key, CustomerProjection, EntityKind, OrderProjection, ProductProjection,
    ProductSummaryService, ProjectionRepository, ProjectionService, Result,
};
use crate::store::{Committed, OutboxAction, OutboxEntry, OutboxTicket, ProjectionOutbox, SourceOfTruth};

// ============================================================================
// Configuration
// ============================================================================

/// Outbox recovery configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OutboxConfig {
    /// Run the background recovery loop. Default: true.
    pub enabled: bool,
    /// Failed attempts after which an entry is left for operators. Default: 10.
    pub max_retries: u32,
    /// Seconds between recovery passes. Default: 5.
    pub recovery_interval_secs: u64,
    /// Entries younger than this are still owned by their writer. Default: 30.
    pub min_age_secs: u64,
    /// Entries handled per recovery pass. Default: 100.
    pub batch_size: u32,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: 10,
            recovery_interval_secs: 5,
            min_age_secs: 30,
            batch_size: 100,
        }
    }
}

impl OutboxConfig {
    pub fn recovery_interval(&self) -> Duration {
        Duration::from_secs(self.recovery_interval_secs)
    }

    pub fn min_age(&self) -> Duration {
        Duration::from_secs(self.min_age_secs)
    }
}

// ============================================================================
// Synchroniser
// ============================================================================

/// Whether the projection caught up with a committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// Projection written; outbox entry completed.
    Synced,
    /// Projection write failed; the outbox entry is left for recovery.
    Deferred,
}

impl SyncStatus {
    pub fn is_synced(&self) -> bool {
        matches!(self, SyncStatus::Synced)
    }
}

/// Projection counts written by a full rebuild.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RebuildReport {
    pub customers: usize,
    pub products: usize,
    pub orders: usize,
    pub summaries: usize,
}

/// Owns the projection services and the outbox they drain.
pub struct ProjectionSync {
    customers: ProjectionService<CustomerProjection>,
    products: ProjectionService<ProductProjection>,
    orders: ProjectionService<OrderProjection>,
    summaries: ProductSummaryService,
    outbox: Arc<dyn ProjectionOutbox>,
    config: OutboxConfig,
}

impl ProjectionSync {
    /// Wire the services for one store and one cache.
    pub fn new<S>(store: Arc<S>, cache: Arc<dyn KeyValueStore>, config: OutboxConfig, summary_ttl: Duration) -> Self
    where
        S: SourceOfTruth<Customer>
            + SourceOfTruth<Product>
            + SourceOfTruth<Order>
            + ProjectionOutbox
            + 'static,
    {
        Self {
            customers: ProjectionService::new(store.clone(), ProjectionRepository::new(cache.clone())),
            products: ProjectionService::new(store.clone(), ProjectionRepository::new(cache.clone())),
            orders: ProjectionService::new(store.clone(), ProjectionRepository::new(cache.clone())),
            summaries: ProductSummaryService::new(store.clone(), cache, summary_ttl),
            outbox: store,
            config,
        }
    }

    pub fn customers(&self) -> &ProjectionService<CustomerProjection> {
        &self.customers
    }

    pub fn products(&self) -> &ProjectionService<ProductProjection> {
        &self.products
    }

    pub fn orders(&self) -> &ProjectionService<OrderProjection> {
        &self.orders
    }

    pub fn summaries(&self) -> &ProductSummaryService {
        &self.summaries
    }

    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    /// Run the projection write owed by a committed source write.
    ///
    /// Success completes the outbox entry. Failure is logged and the entry
    /// is kept for [`recover_pending`](Self::recover_pending).
    pub async fn settle<F>(&self, ticket: OutboxTicket, entity: EntityKind, id: EntityId, work: F) -> SyncStatus
    where
        F: Future<Output = Result<()>>,
    {
        match work.await {
            Ok(()) => {
                if let Err(e) = self.outbox.complete(ticket).await {
                    // The projection is current; recovery will redo it harmlessly.
                    warn!(ticket = %ticket, error = %e, "Projection written but outbox entry not completed");
                }
                SyncStatus::Synced
            }
            Err(e) => {
                warn!(
                    entity = %entity,
                    id = id,
                    ticket = %ticket,
                    error = %e,
                    "Projection update deferred to outbox recovery"
                );
                SyncStatus::Deferred
            }
        }
    }

    pub async fn customer_saved(&self, committed: &Committed<Customer>) -> SyncStatus {
        let customer = &committed.value;
        self.settle(committed.ticket, EntityKind::Customer, customer.id, async {
            self.customers.update_projection(customer).await.map(|_| ())
        })
        .await
    }

    pub async fn customer_removed(&self, committed: &Committed<Customer>) -> SyncStatus {
        let id = committed.value.id;
        self.settle(
            committed.ticket,
            EntityKind::Customer,
            id,
            self.customers.delete_projection(id),
        )
        .await
    }

    /// Product projection, then the best-effort summary.
    pub async fn product_saved(&self, committed: &Committed<Product>) -> SyncStatus {
        let product = &committed.value;
        let status = self
            .settle(committed.ticket, EntityKind::Product, product.id, async {
                self.products.update_projection(product).await.map(|_| ())
            })
            .await;
        self.summaries.refresh(product).await;
        status
    }

    pub async fn product_removed(&self, committed: &Committed<Product>) -> SyncStatus {
        let id = committed.value.id;
        let status = self
            .settle(
                committed.ticket,
                EntityKind::Product,
                id,
                self.products.delete_projection(id),
            )
            .await;
        self.remove_summary(id).await;
        status
    }

    pub async fn order_saved(&self, committed: &Committed<Order>) -> SyncStatus {
        let order = &committed.value;
        self.settle(committed.ticket, EntityKind::Order, order.id, async {
            self.orders.update_projection(order).await.map(|_| ())
        })
        .await
    }

    /// Uses the customer id of the removed row, so the per-customer index is
    /// cleaned even if the cached record is already gone.
    pub async fn order_removed(&self, committed: &Committed<Order>) -> SyncStatus {
        let order = &committed.value;
        self.settle(
            committed.ticket,
            EntityKind::Order,
            order.id,
            self.orders
                .delete_projection_indexed(order.id, &[customer_orders_key(order.customer_id)]),
        )
        .await
    }

    async fn remove_summary(&self, product_id: EntityId) {
        if let Err(e) = self.summaries.remove(product_id).await {
            error!(product_id = product_id, error = %e, "Product summary removal failed");
        }
    }

    // ------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------

    /// Reconcile outbox entries left behind by failed projection writes.
    ///
    /// Returns the number of entries completed. Entries that fail again
    /// have their retry count bumped; once it reaches `max_retries` they are
    /// no longer picked up.
    pub async fn recover_pending(&self) -> Result<u32> {
        let entries = self
            .outbox
            .pending(self.config.batch_size, self.config.max_retries, self.config.min_age())
            .await?;

        let mut recovered = 0u32;
        for entry in entries {
            match self.apply(&entry).await {
                Ok(()) => {
                    if let Err(e) = self.outbox.complete(entry.ticket).await {
                        error!(ticket = %entry.ticket, error = %e, "Failed to complete recovered outbox entry");
                    } else {
                        recovered += 1;
                        debug!(
                            ticket = %entry.ticket,
                            entity = %entry.entity,
                            id = entry.entity_id,
                            "Recovered projection"
                        );
                    }
                }
                Err(e) => {
                    let retry_count = self.outbox.record_failure(entry.ticket).await?;
                    if retry_count >= self.config.max_retries {
                        error!(
                            ticket = %entry.ticket,
                            entity = %entry.entity,
                            id = entry.entity_id,
                            retry_count = retry_count,
                            error = %e,
                            "Giving up on projection recovery; rebuild required"
                        );
                    } else {
                        warn!(
                            ticket = %entry.ticket,
                            entity = %entry.entity,
                            id = entry.entity_id,
                            retry_count = retry_count,
                            error = %e,
                            "Failed to recover projection, incrementing retry count"
                        );
                    }
                }
            }
        }

        if recovered > 0 {
            info!(recovered = recovered, "Recovered projections from outbox");
        }
        Ok(recovered)
    }

    async fn apply(&self, entry: &OutboxEntry) -> Result<()> {
        let id = entry.entity_id;
        match (entry.entity, entry.action) {
            (EntityKind::Customer, OutboxAction::Upsert) => {
                self.customers.reconcile(id).await?;
            }
            (EntityKind::Customer, OutboxAction::Delete) => {
                self.customers.delete_projection(id).await?;
            }
            (EntityKind::Product, OutboxAction::Upsert) => match self.products.reconcile(id).await? {
                Some(_) => {
                    self.summaries.update_summary(id).await;
                }
                None => self.remove_summary(id).await,
            },
            (EntityKind::Product, OutboxAction::Delete) => {
                self.products.delete_projection(id).await?;
                self.remove_summary(id).await;
            }
            (EntityKind::Order, OutboxAction::Upsert) => {
                self.orders.reconcile(id).await?;
            }
            (EntityKind::Order, OutboxAction::Delete) => match entry.customer_id {
                Some(customer_id) => {
                    self.orders
                        .delete_projection_indexed(id, &[customer_orders_key(customer_id)])
                        .await?;
                }
                None => self.orders.delete_projection(id).await?,
            },
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Rebuild
    // ------------------------------------------------------------------

    /// Rebuild every projection of one kind from the source of truth.
    pub async fn rebuild(&self, kind: EntityKind) -> Result<usize> {
        match kind {
            EntityKind::Customer => self.customers.rebuild_all().await,
            EntityKind::Product => self.products.rebuild_all().await,
            EntityKind::Order => self.orders.rebuild_all().await,
        }
    }

    pub async fn rebuild_summaries(&self) -> Result<usize> {
        self.summaries.rebuild_all().await
    }

    /// Rebuild all projections and summaries.
    pub async fn rebuild_everything(&self) -> Result<RebuildReport> {
        let report = RebuildReport {
            customers: self.rebuild(EntityKind::Customer).await?,
            products: self.rebuild(EntityKind::Product).await?,
            orders: self.rebuild(EntityKind::Order).await?,
            summaries: self.rebuild_summaries().await?,
        };
        info!(
            customers = report.customers,
            products = report.products,
            orders = report.orders,
            summaries = report.summaries,
            "Rebuilt all projections"
        );
        Ok(report)
    }
}

// ============================================================================
// Background recovery
// ============================================================================

/// Handle to stop a spawned recovery task.
pub struct RecoveryTaskHandle {
    cancel: tokio::sync::watch::Sender<bool>,
}

impl RecoveryTaskHandle {
    /// Signal the recovery task to stop.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Spawn a background task that periodically drains the outbox.
///
/// The task stops when [`RecoveryTaskHandle::stop`] is called or the handle
/// is dropped.
pub fn spawn_recovery_task(sync: Arc<ProjectionSync>, interval: Duration) -> RecoveryTaskHandle {
    let (cancel_tx, mut cancel_rx) = tokio::sync::watch::channel(false);

    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "Outbox recovery task started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = sync.recover_pending().await {
                        error!(error = %e, "Outbox recovery failed");
                    }
                }
                changed = cancel_rx.changed() => {
                    if changed.is_err() || *cancel_rx.borrow() {
                        info!("Outbox recovery task stopped");
                        break;
                    }
                }
            }
        }
    });

    RecoveryTaskHandle { cancel: cancel_tx }
}

#[cfg(test)]
mod tests;
