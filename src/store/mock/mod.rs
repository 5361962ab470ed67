//! In-memory source of truth for testing.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    Committed, CustomerStore, OrderStore, OutboxAction, OutboxEntry, OutboxTicket, ProductStore,
    ProjectionOutbox, Result, SourceOfTruth, StoreError,
};
use crate::model::{
    Customer, EntityId, NewCustomer, NewOrder, NewProduct, Order, PricedLines, Product,
    ProductChanges,
};
use crate::projection::EntityKind;

#[derive(Default)]
struct Tables {
    customers: BTreeMap<EntityId, Customer>,
    products: BTreeMap<EntityId, Product>,
    orders: BTreeMap<EntityId, Order>,
    outbox: Vec<OutboxEntry>,
    last_id: EntityId,
}

impl Tables {
    fn next_id(&mut self) -> EntityId {
        self.last_id += 1;
        self.last_id
    }

    fn enqueue(
        &mut self,
        entity: EntityKind,
        id: EntityId,
        action: OutboxAction,
        customer_id: Option<EntityId>,
    ) -> OutboxTicket {
        let entry = OutboxEntry::new(entity, id, action, customer_id);
        let ticket = entry.ticket;
        self.outbox.push(entry);
        ticket
    }

    /// Resolve the customer name the way a join would.
    fn joined(&self, stored: &Order) -> Order {
        let mut order = stored.clone();
        order.customer_name = self
            .customers
            .get(&order.customer_id)
            .map(|c| c.name.clone());
        order
    }
}

/// Mock store keeping all tables in memory.
///
/// Ids come from one shared counter, so they are unique across tables.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_writes: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until reset.
    pub async fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.write().await = fail;
    }

    /// Snapshot of the outbox. Test helper.
    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.tables.read().await.outbox.clone()
    }

    /// Drop an order's customer row without the usual reference check.
    /// Test helper for dangling-reference scenarios.
    pub async fn force_remove_customer(&self, id: EntityId) {
        self.tables.write().await.customers.remove(&id);
    }

    async fn check_write(&self) -> Result<()> {
        if *self.fail_writes.read().await {
            return Err(StoreError::Unavailable("injected write failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SourceOfTruth<Customer> for MemoryStore {
    async fn load(&self, id: EntityId) -> Result<Option<Customer>> {
        Ok(self.tables.read().await.customers.get(&id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<Customer>> {
        Ok(self.tables.read().await.customers.values().cloned().collect())
    }
}

#[async_trait]
impl CustomerStore for MemoryStore {
    async fn insert(&self, customer: NewCustomer) -> Result<Committed<Customer>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        if tables.customers.values().any(|c| c.email == customer.email) {
            return Err(StoreError::Conflict(format!(
                "customer email {} already exists",
                customer.email
            )));
        }

        let id = tables.next_id();
        let customer = customer.with_id(id);
        tables.customers.insert(id, customer.clone());
        let ticket = tables.enqueue(EntityKind::Customer, id, OutboxAction::Upsert, None);

        Ok(Committed {
            value: customer,
            ticket,
        })
    }

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Customer>>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        if tables.orders.values().any(|o| o.customer_id == id) {
            return Err(StoreError::Conflict(format!("customer {id} still has orders")));
        }

        let Some(customer) = tables.customers.remove(&id) else {
            return Ok(None);
        };
        let ticket = tables.enqueue(EntityKind::Customer, id, OutboxAction::Delete, None);

        Ok(Some(Committed {
            value: customer,
            ticket,
        }))
    }
}

#[async_trait]
impl SourceOfTruth<Product> for MemoryStore {
    async fn load(&self, id: EntityId) -> Result<Option<Product>> {
        Ok(self.tables.read().await.products.get(&id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<Product>> {
        Ok(self.tables.read().await.products.values().cloned().collect())
    }
}

#[async_trait]
impl ProductStore for MemoryStore {
    async fn insert(&self, product: NewProduct) -> Result<Committed<Product>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        let id = tables.next_id();
        let product = product.with_id(id);
        tables.products.insert(id, product.clone());
        let ticket = tables.enqueue(EntityKind::Product, id, OutboxAction::Upsert, None);

        Ok(Committed {
            value: product,
            ticket,
        })
    }

    async fn update(&self, id: EntityId, changes: &ProductChanges) -> Result<Option<Committed<Product>>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        let Some(product) = tables.products.get_mut(&id) else {
            return Ok(None);
        };
        changes.apply_to(product);
        let product = product.clone();
        let ticket = tables.enqueue(EntityKind::Product, id, OutboxAction::Upsert, None);

        Ok(Some(Committed {
            value: product,
            ticket,
        }))
    }

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Product>>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        let Some(product) = tables.products.remove(&id) else {
            return Ok(None);
        };
        let ticket = tables.enqueue(EntityKind::Product, id, OutboxAction::Delete, None);

        Ok(Some(Committed {
            value: product,
            ticket,
        }))
    }

    async fn find_by_ids(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Product>> {
        let tables = self.tables.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| tables.products.get(id).map(|p| (*id, p.clone())))
            .collect())
    }
}

#[async_trait]
impl SourceOfTruth<Order> for MemoryStore {
    async fn load(&self, id: EntityId) -> Result<Option<Order>> {
        let tables = self.tables.read().await;
        Ok(tables.orders.get(&id).map(|stored| tables.joined(stored)))
    }

    async fn load_all(&self) -> Result<Vec<Order>> {
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .map(|stored| tables.joined(stored))
            .collect())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: NewOrder, priced: PricedLines) -> Result<Committed<Order>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        let Some(customer) = tables.customers.get(&order.customer_id) else {
            return Err(StoreError::MissingReference {
                entity: EntityKind::Customer,
                id: order.customer_id,
            });
        };
        let customer_name = customer.name.clone();

        let id = tables.next_id();
        let order = Order {
            id,
            customer_id: order.customer_id,
            customer_name: Some(customer_name),
            order_number: order.order_number,
            total_amount: priced.total_amount,
            status: order.status,
            items: priced.items,
            created_at: order.created_at,
            updated_at: None,
        };
        tables.orders.insert(id, order.clone());
        let ticket = tables.enqueue(
            EntityKind::Order,
            id,
            OutboxAction::Upsert,
            Some(order.customer_id),
        );

        Ok(Committed {
            value: order,
            ticket,
        })
    }

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Order>>> {
        self.check_write().await?;
        let mut tables = self.tables.write().await;

        let Some(stored) = tables.orders.remove(&id) else {
            return Ok(None);
        };
        let order = tables.joined(&stored);
        let ticket = tables.enqueue(
            EntityKind::Order,
            id,
            OutboxAction::Delete,
            Some(order.customer_id),
        );

        Ok(Some(Committed {
            value: order,
            ticket,
        }))
    }
}

#[async_trait]
impl ProjectionOutbox for MemoryStore {
    async fn pending(&self, limit: u32, max_retries: u32, min_age: Duration) -> Result<Vec<OutboxEntry>> {
        let cutoff = crate::model::now()
            - chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::zero());
        let tables = self.tables.read().await;
        let mut pending: Vec<OutboxEntry> = tables
            .outbox
            .iter()
            .filter(|e| e.retry_count < max_retries && e.created_at <= cutoff)
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit as usize);
        Ok(pending)
    }

    async fn complete(&self, ticket: OutboxTicket) -> Result<()> {
        self.tables
            .write()
            .await
            .outbox
            .retain(|e| e.ticket != ticket);
        Ok(())
    }

    async fn record_failure(&self, ticket: OutboxTicket) -> Result<u32> {
        let mut tables = self.tables.write().await;
        let entry = tables.outbox.iter_mut().find(|e| e.ticket == ticket);
        Ok(match entry {
            Some(entry) => {
                entry.retry_count += 1;
                entry.retry_count
            }
            None => 0,
        })
    }

    async fn backlog(&self) -> Result<u64> {
        Ok(self.tables.read().await.outbox.len() as u64)
    }
}
