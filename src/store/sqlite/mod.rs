//! SQLite source of truth.
//!
//! Queries are built with sea-query and bound through sea-query-binder.
//! Writes run inside `BEGIN IMMEDIATE` transactions on a single pooled
//! connection; the outbox row for the write is inserted in the same
//! transaction.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use sea_query::{Alias, Expr, Order as SortOrder, Query, SqliteQueryBuilder};
use sea_query_binder::SqlxBinder;
use sqlx::pool::PoolConnection;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow,
};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;
use uuid::Uuid;

use super::{
    Committed, CustomerStore, OrderStore, OutboxAction, OutboxEntry, OutboxTicket, ProductStore,
    ProjectionOutbox, Result, SourceOfTruth, StoreError,
};
use crate::model::{
    format_timestamp, money, parse_timestamp, Customer, EntityId, NewCustomer, NewOrder,
    NewProduct, Order, OrderItem, PricedLines, Product, ProductChanges,
};
use crate::projection::EntityKind;

pub mod schema;

use schema::{
    Customer as CustomerTable, Order as OrderTable, OrderItem as OrderItemTable,
    Product as ProductTable, ProjectionOutbox as OutboxTable,
};

/// SQLite implementation of every store trait.
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Wrap an existing pool. Call [`SqlStore::init`] before use.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open a pool for `url`, creating the database file if needed.
    ///
    /// In-memory databases are limited to one connection, since every
    /// connection would otherwise see its own empty database.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let in_memory = url.contains(":memory:");
        let mut opts = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));
        if !in_memory {
            opts = opts.journal_mode(SqliteJournalMode::Wal);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(if in_memory { 1 } else { max_connections.max(1) })
            .connect_with(opts)
            .await?;

        Ok(Self::new(pool))
    }

    /// Create tables and indexes if they do not exist.
    pub async fn init(&self) -> Result<()> {
        for statement in schema::SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        debug!("storefront schema ready");
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn begin(&self) -> Result<PoolConnection<Sqlite>> {
        // IMMEDIATE takes the write lock up front so concurrent writers queue
        // on busy_timeout instead of failing the shared-to-exclusive upgrade.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        Ok(conn)
    }

    async fn finish<T>(mut conn: PoolConnection<Sqlite>, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                sqlx::query("COMMIT").execute(&mut *conn).await?;
                Ok(value)
            }
            Err(e) => {
                let _ = sqlx::query("ROLLBACK").execute(&mut *conn).await;
                Err(classify(e))
            }
        }
    }

    // ------------------------------------------------------------------
    // Statements shared by reads and writes
    // ------------------------------------------------------------------

    async fn enqueue(
        conn: &mut SqliteConnection,
        entity: EntityKind,
        entity_id: EntityId,
        action: OutboxAction,
        customer_id: Option<EntityId>,
    ) -> Result<OutboxTicket> {
        let entry = OutboxEntry::new(entity, entity_id, action, customer_id);

        let (sql, values) = Query::insert()
            .into_table(OutboxTable::Table)
            .columns([
                OutboxTable::Ticket,
                OutboxTable::Entity,
                OutboxTable::EntityId,
                OutboxTable::Action,
                OutboxTable::CustomerId,
                OutboxTable::RetryCount,
                OutboxTable::CreatedAt,
            ])
            .values_panic([
                entry.ticket.to_string().into(),
                entity.as_str().into(),
                entity_id.into(),
                action.as_str().into(),
                customer_id.into(),
                0i64.into(),
                format_timestamp(&entry.created_at).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        Ok(entry.ticket)
    }

    async fn select_customers(
        conn: &mut SqliteConnection,
        id: Option<EntityId>,
    ) -> Result<Vec<Customer>> {
        let mut query = Query::select();
        query
            .columns([
                CustomerTable::Id,
                CustomerTable::Name,
                CustomerTable::Email,
                CustomerTable::Address,
                CustomerTable::City,
                CustomerTable::PostalCode,
                CustomerTable::Country,
                CustomerTable::CreatedAt,
            ])
            .from(CustomerTable::Table)
            .order_by(CustomerTable::Id, SortOrder::Asc);
        if let Some(id) = id {
            query.and_where(Expr::col(CustomerTable::Id).eq(id));
        }
        let (sql, values) = query.build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *conn).await?;
        rows.iter().map(customer_from_row).collect()
    }

    async fn select_products(
        conn: &mut SqliteConnection,
        ids: Option<&[EntityId]>,
    ) -> Result<Vec<Product>> {
        let mut query = Query::select();
        query
            .columns([
                ProductTable::Id,
                ProductTable::Name,
                ProductTable::Description,
                ProductTable::Price,
                ProductTable::CreatedAt,
            ])
            .from(ProductTable::Table)
            .order_by(ProductTable::Id, SortOrder::Asc);
        if let Some(ids) = ids {
            query.and_where(Expr::col(ProductTable::Id).is_in(ids.iter().copied()));
        }
        let (sql, values) = query.build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *conn).await?;
        rows.iter().map(product_from_row).collect()
    }

    /// Orders joined with their customer's name and their items.
    async fn select_orders(conn: &mut SqliteConnection, id: Option<EntityId>) -> Result<Vec<Order>> {
        let mut query = Query::select();
        query
            .columns([
                (OrderTable::Table, OrderTable::Id),
                (OrderTable::Table, OrderTable::CustomerId),
                (OrderTable::Table, OrderTable::OrderNumber),
                (OrderTable::Table, OrderTable::TotalAmount),
                (OrderTable::Table, OrderTable::Status),
                (OrderTable::Table, OrderTable::CreatedAt),
                (OrderTable::Table, OrderTable::UpdatedAt),
            ])
            .expr_as(
                Expr::col((CustomerTable::Table, CustomerTable::Name)),
                Alias::new("customer_name"),
            )
            .from(OrderTable::Table)
            .left_join(
                CustomerTable::Table,
                Expr::col((CustomerTable::Table, CustomerTable::Id))
                    .equals((OrderTable::Table, OrderTable::CustomerId)),
            )
            .order_by((OrderTable::Table, OrderTable::Id), SortOrder::Asc);
        if let Some(id) = id {
            query.and_where(Expr::col((OrderTable::Table, OrderTable::Id)).eq(id));
        }
        let (sql, values) = query.build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *conn).await?;
        let mut orders = rows.iter().map(order_from_row).collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let (sql, values) = Query::select()
            .columns([
                OrderItemTable::Id,
                OrderItemTable::OrderId,
                OrderItemTable::Name,
                OrderItemTable::Quantity,
                OrderItemTable::Price,
                OrderItemTable::Total,
            ])
            .from(OrderItemTable::Table)
            .and_where(Expr::col(OrderItemTable::OrderId).is_in(orders.iter().map(|o| o.id)))
            .order_by(OrderItemTable::Id, SortOrder::Asc)
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *conn).await?;
        let mut items: HashMap<EntityId, Vec<OrderItem>> = HashMap::new();
        for row in &rows {
            let order_id: EntityId = row.try_get("order_id")?;
            items.entry(order_id).or_default().push(item_from_row(row)?);
        }

        for order in &mut orders {
            order.items = items.remove(&order.id).unwrap_or_default();
        }
        Ok(orders)
    }

    // ------------------------------------------------------------------
    // Transaction bodies
    // ------------------------------------------------------------------

    async fn insert_customer(
        conn: &mut SqliteConnection,
        customer: NewCustomer,
    ) -> Result<Committed<Customer>> {
        let (sql, values) = Query::insert()
            .into_table(CustomerTable::Table)
            .columns([
                CustomerTable::Name,
                CustomerTable::Email,
                CustomerTable::Address,
                CustomerTable::City,
                CustomerTable::PostalCode,
                CustomerTable::Country,
                CustomerTable::CreatedAt,
            ])
            .values_panic([
                customer.name.clone().into(),
                customer.email.clone().into(),
                customer.address.clone().into(),
                customer.city.clone().into(),
                customer.postal_code.clone().into(),
                customer.country.clone().into(),
                format_timestamp(&customer.created_at).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let id = sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();
        let ticket = Self::enqueue(conn, EntityKind::Customer, id, OutboxAction::Upsert, None).await?;

        Ok(Committed {
            value: customer.with_id(id),
            ticket,
        })
    }

    async fn remove_customer(
        conn: &mut SqliteConnection,
        id: EntityId,
    ) -> Result<Option<Committed<Customer>>> {
        let Some(customer) = Self::select_customers(conn, Some(id)).await?.pop() else {
            return Ok(None);
        };

        let (sql, values) = Query::delete()
            .from_table(CustomerTable::Table)
            .and_where(Expr::col(CustomerTable::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let ticket = Self::enqueue(conn, EntityKind::Customer, id, OutboxAction::Delete, None).await?;
        Ok(Some(Committed {
            value: customer,
            ticket,
        }))
    }

    async fn insert_product(
        conn: &mut SqliteConnection,
        product: NewProduct,
    ) -> Result<Committed<Product>> {
        let (sql, values) = Query::insert()
            .into_table(ProductTable::Table)
            .columns([
                ProductTable::Name,
                ProductTable::Description,
                ProductTable::Price,
                ProductTable::CreatedAt,
            ])
            .values_panic([
                product.name.clone().into(),
                product.description.clone().into(),
                money(product.price).to_string().into(),
                format_timestamp(&product.created_at).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let id = sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();
        let ticket = Self::enqueue(conn, EntityKind::Product, id, OutboxAction::Upsert, None).await?;

        Ok(Committed {
            value: product.with_id(id),
            ticket,
        })
    }

    async fn update_product(
        conn: &mut SqliteConnection,
        id: EntityId,
        changes: &ProductChanges,
    ) -> Result<Option<Committed<Product>>> {
        let Some(mut product) = Self::select_products(conn, Some(std::slice::from_ref(&id))).await?.pop() else {
            return Ok(None);
        };
        changes.apply_to(&mut product);

        let (sql, values) = Query::update()
            .table(ProductTable::Table)
            .values([
                (ProductTable::Name, product.name.clone().into()),
                (ProductTable::Description, product.description.clone().into()),
                (ProductTable::Price, product.price.to_string().into()),
                (ProductTable::CreatedAt, format_timestamp(&product.created_at).into()),
            ])
            .and_where(Expr::col(ProductTable::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let ticket = Self::enqueue(conn, EntityKind::Product, id, OutboxAction::Upsert, None).await?;
        Ok(Some(Committed {
            value: product,
            ticket,
        }))
    }

    async fn remove_product(
        conn: &mut SqliteConnection,
        id: EntityId,
    ) -> Result<Option<Committed<Product>>> {
        let Some(product) = Self::select_products(conn, Some(std::slice::from_ref(&id))).await?.pop() else {
            return Ok(None);
        };

        let (sql, values) = Query::delete()
            .from_table(ProductTable::Table)
            .and_where(Expr::col(ProductTable::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let ticket = Self::enqueue(conn, EntityKind::Product, id, OutboxAction::Delete, None).await?;
        Ok(Some(Committed {
            value: product,
            ticket,
        }))
    }

    async fn insert_order(
        conn: &mut SqliteConnection,
        order: NewOrder,
        priced: PricedLines,
    ) -> Result<Committed<Order>> {
        let Some(customer) = Self::select_customers(conn, Some(order.customer_id)).await?.pop() else {
            return Err(StoreError::MissingReference {
                entity: EntityKind::Customer,
                id: order.customer_id,
            });
        };

        let total_amount = money(priced.total_amount);
        let (sql, values) = Query::insert()
            .into_table(OrderTable::Table)
            .columns([
                OrderTable::CustomerId,
                OrderTable::OrderNumber,
                OrderTable::TotalAmount,
                OrderTable::Status,
                OrderTable::CreatedAt,
            ])
            .values_panic([
                order.customer_id.into(),
                order.order_number.clone().into(),
                total_amount.to_string().into(),
                order.status.clone().into(),
                format_timestamp(&order.created_at).into(),
            ])
            .build_sqlx(SqliteQueryBuilder);

        let id = sqlx::query_with(&sql, values)
            .execute(&mut *conn)
            .await?
            .last_insert_rowid();

        for item in &priced.items {
            let (sql, values) = Query::insert()
                .into_table(OrderItemTable::Table)
                .columns([
                    OrderItemTable::OrderId,
                    OrderItemTable::Name,
                    OrderItemTable::Quantity,
                    OrderItemTable::Price,
                    OrderItemTable::Total,
                ])
                .values_panic([
                    id.into(),
                    item.name.clone().into(),
                    i64::from(item.quantity).into(),
                    item.price.to_string().into(),
                    item.total.to_string().into(),
                ])
                .build_sqlx(SqliteQueryBuilder);
            sqlx::query_with(&sql, values).execute(&mut *conn).await?;
        }

        let ticket = Self::enqueue(
            conn,
            EntityKind::Order,
            id,
            OutboxAction::Upsert,
            Some(order.customer_id),
        )
        .await?;

        Ok(Committed {
            value: Order {
                id,
                customer_id: order.customer_id,
                customer_name: Some(customer.name),
                order_number: order.order_number,
                total_amount,
                status: order.status,
                items: priced.items,
                created_at: order.created_at,
                updated_at: None,
            },
            ticket,
        })
    }

    async fn remove_order(conn: &mut SqliteConnection, id: EntityId) -> Result<Option<Committed<Order>>> {
        let Some(order) = Self::select_orders(conn, Some(id)).await?.pop() else {
            return Ok(None);
        };

        let (sql, values) = Query::delete()
            .from_table(OrderItemTable::Table)
            .and_where(Expr::col(OrderItemTable::OrderId).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let (sql, values) = Query::delete()
            .from_table(OrderTable::Table)
            .and_where(Expr::col(OrderTable::Id).eq(id))
            .build_sqlx(SqliteQueryBuilder);
        sqlx::query_with(&sql, values).execute(&mut *conn).await?;

        let ticket = Self::enqueue(
            conn,
            EntityKind::Order,
            id,
            OutboxAction::Delete,
            Some(order.customer_id),
        )
        .await?;

        Ok(Some(Committed {
            value: order,
            ticket,
        }))
    }
}

/// Map constraint violations to `Conflict`; everything else passes through.
fn classify(e: StoreError) -> StoreError {
    match e {
        StoreError::Database(sqlx::Error::Database(db))
            if db.is_unique_violation() || db.is_foreign_key_violation() =>
        {
            StoreError::Conflict(db.message().to_string())
        }
        other => other,
    }
}

fn corrupt(table: &'static str, column: &'static str, id: impl ToString, detail: impl ToString) -> StoreError {
    StoreError::Corrupt {
        table,
        column,
        id: id.to_string(),
        detail: detail.to_string(),
    }
}

fn decimal_column(row: &SqliteRow, table: &'static str, column: &'static str, id: EntityId) -> Result<Decimal> {
    let raw: String = row.try_get(column)?;
    Decimal::from_str(&raw)
        .map(money)
        .map_err(|e| corrupt(table, column, id, e))
}

fn timestamp_column(
    row: &SqliteRow,
    table: &'static str,
    column: &'static str,
    id: EntityId,
) -> Result<NaiveDateTime> {
    let raw: String = row.try_get(column)?;
    parse_timestamp(&raw).ok_or_else(|| corrupt(table, column, id, format!("invalid timestamp {raw:?}")))
}

fn customer_from_row(row: &SqliteRow) -> Result<Customer> {
    let id: EntityId = row.try_get("id")?;
    Ok(Customer {
        id,
        name: row.try_get("name")?,
        email: row.try_get("email")?,
        address: row.try_get("address")?,
        city: row.try_get("city")?,
        postal_code: row.try_get("postal_code")?,
        country: row.try_get("country")?,
        created_at: timestamp_column(row, "customer", "created_at", id)?,
    })
}

fn product_from_row(row: &SqliteRow) -> Result<Product> {
    let id: EntityId = row.try_get("id")?;
    Ok(Product {
        id,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        price: decimal_column(row, "product", "price", id)?,
        created_at: timestamp_column(row, "product", "created_at", id)?,
    })
}

fn order_from_row(row: &SqliteRow) -> Result<Order> {
    let id: EntityId = row.try_get("id")?;
    let updated_at = match row.try_get::<Option<String>, _>("updated_at")? {
        Some(raw) => Some(
            parse_timestamp(&raw)
                .ok_or_else(|| corrupt("order", "updated_at", id, format!("invalid timestamp {raw:?}")))?,
        ),
        None => None,
    };

    Ok(Order {
        id,
        customer_id: row.try_get("customer_id")?,
        customer_name: row.try_get("customer_name")?,
        order_number: row.try_get("order_number")?,
        total_amount: decimal_column(row, "order", "total_amount", id)?,
        status: row.try_get("status")?,
        items: Vec::new(),
        created_at: timestamp_column(row, "order", "created_at", id)?,
        updated_at,
    })
}

fn item_from_row(row: &SqliteRow) -> Result<OrderItem> {
    let id: EntityId = row.try_get("id")?;
    let quantity: i64 = row.try_get("quantity")?;
    Ok(OrderItem {
        name: row.try_get("name")?,
        quantity: u32::try_from(quantity).map_err(|e| corrupt("order_item", "quantity", id, e))?,
        price: decimal_column(row, "order_item", "price", id)?,
        total: decimal_column(row, "order_item", "total", id)?,
    })
}

fn outbox_from_row(row: &SqliteRow) -> Result<OutboxEntry> {
    let raw_ticket: String = row.try_get("ticket")?;
    let ticket = Uuid::parse_str(&raw_ticket)
        .map(OutboxTicket)
        .map_err(|e| corrupt("projection_outbox", "ticket", &raw_ticket, e))?;

    let raw_entity: String = row.try_get("entity")?;
    let entity = EntityKind::parse(&raw_entity)
        .ok_or_else(|| corrupt("projection_outbox", "entity", &raw_ticket, &raw_entity))?;

    let raw_action: String = row.try_get("action")?;
    let action = OutboxAction::parse(&raw_action)
        .ok_or_else(|| corrupt("projection_outbox", "action", &raw_ticket, &raw_action))?;

    let retry_count: i64 = row.try_get("retry_count")?;
    let raw_created: String = row.try_get("created_at")?;
    let created_at = parse_timestamp(&raw_created)
        .ok_or_else(|| corrupt("projection_outbox", "created_at", &raw_ticket, &raw_created))?;

    Ok(OutboxEntry {
        ticket,
        entity,
        entity_id: row.try_get("entity_id")?,
        action,
        customer_id: row.try_get("customer_id")?,
        retry_count: u32::try_from(retry_count).unwrap_or(u32::MAX),
        created_at,
    })
}

#[async_trait]
impl SourceOfTruth<Customer> for SqlStore {
    async fn load(&self, id: EntityId) -> Result<Option<Customer>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::select_customers(&mut conn, Some(id)).await?.pop())
    }

    async fn load_all(&self) -> Result<Vec<Customer>> {
        let mut conn = self.pool.acquire().await?;
        Self::select_customers(&mut conn, None).await
    }
}

#[async_trait]
impl CustomerStore for SqlStore {
    async fn insert(&self, customer: NewCustomer) -> Result<Committed<Customer>> {
        let mut conn = self.begin().await?;
        let result = Self::insert_customer(&mut conn, customer).await;
        Self::finish(conn, result).await
    }

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Customer>>> {
        let mut conn = self.begin().await?;
        let result = Self::remove_customer(&mut conn, id).await;
        Self::finish(conn, result).await
    }
}

#[async_trait]
impl SourceOfTruth<Product> for SqlStore {
    async fn load(&self, id: EntityId) -> Result<Option<Product>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::select_products(&mut conn, Some(std::slice::from_ref(&id))).await?.pop())
    }

    async fn load_all(&self) -> Result<Vec<Product>> {
        let mut conn = self.pool.acquire().await?;
        Self::select_products(&mut conn, None).await
    }
}

#[async_trait]
impl ProductStore for SqlStore {
    async fn insert(&self, product: NewProduct) -> Result<Committed<Product>> {
        let mut conn = self.begin().await?;
        let result = Self::insert_product(&mut conn, product).await;
        Self::finish(conn, result).await
    }

    async fn update(&self, id: EntityId, changes: &ProductChanges) -> Result<Option<Committed<Product>>> {
        let mut conn = self.begin().await?;
        let result = Self::update_product(&mut conn, id, changes).await;
        Self::finish(conn, result).await
    }

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Product>>> {
        let mut conn = self.begin().await?;
        let result = Self::remove_product(&mut conn, id).await;
        Self::finish(conn, result).await
    }

    async fn find_by_ids(&self, ids: &[EntityId]) -> Result<HashMap<EntityId, Product>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.pool.acquire().await?;
        let products = Self::select_products(&mut conn, Some(ids)).await?;
        Ok(products.into_iter().map(|p| (p.id, p)).collect())
    }
}

#[async_trait]
impl SourceOfTruth<Order> for SqlStore {
    async fn load(&self, id: EntityId) -> Result<Option<Order>> {
        let mut conn = self.pool.acquire().await?;
        Ok(Self::select_orders(&mut conn, Some(id)).await?.pop())
    }

    async fn load_all(&self) -> Result<Vec<Order>> {
        let mut conn = self.pool.acquire().await?;
        Self::select_orders(&mut conn, None).await
    }
}

#[async_trait]
impl OrderStore for SqlStore {
    async fn insert(&self, order: NewOrder, priced: PricedLines) -> Result<Committed<Order>> {
        let mut conn = self.begin().await?;
        let result = Self::insert_order(&mut conn, order, priced).await;
        Self::finish(conn, result).await
    }

    async fn remove(&self, id: EntityId) -> Result<Option<Committed<Order>>> {
        let mut conn = self.begin().await?;
        let result = Self::remove_order(&mut conn, id).await;
        Self::finish(conn, result).await
    }
}

#[async_trait]
impl ProjectionOutbox for SqlStore {
    async fn pending(&self, limit: u32, max_retries: u32, min_age: Duration) -> Result<Vec<OutboxEntry>> {
        let cutoff = crate::model::now()
            - chrono::Duration::from_std(min_age).unwrap_or_else(|_| chrono::Duration::zero());

        let (sql, values) = Query::select()
            .columns([
                OutboxTable::Ticket,
                OutboxTable::Entity,
                OutboxTable::EntityId,
                OutboxTable::Action,
                OutboxTable::CustomerId,
                OutboxTable::RetryCount,
                OutboxTable::CreatedAt,
            ])
            .from(OutboxTable::Table)
            .and_where(Expr::col(OutboxTable::RetryCount).lt(i64::from(max_retries)))
            .and_where(Expr::col(OutboxTable::CreatedAt).lte(format_timestamp(&cutoff)))
            .order_by(OutboxTable::CreatedAt, SortOrder::Asc)
            .limit(u64::from(limit))
            .build_sqlx(SqliteQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter().map(outbox_from_row).collect()
    }

    async fn complete(&self, ticket: OutboxTicket) -> Result<()> {
        let (sql, values) = Query::delete()
            .from_table(OutboxTable::Table)
            .and_where(Expr::col(OutboxTable::Ticket).eq(ticket.to_string()))
            .build_sqlx(SqliteQueryBuilder);

        sqlx::query_with(&sql, values).execute(&self.pool).await?;
        Ok(())
    }

    async fn record_failure(&self, ticket: OutboxTicket) -> Result<u32> {
        let (sql, values) = Query::update()
            .table(OutboxTable::Table)
            .value(
                OutboxTable::RetryCount,
                Expr::col(OutboxTable::RetryCount).add(1),
            )
            .and_where(Expr::col(OutboxTable::Ticket).eq(ticket.to_string()))
            .returning_col(OutboxTable::RetryCount)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_optional(&self.pool).await?;
        match row {
            Some(row) => {
                let count: i64 = row.try_get("retry_count")?;
                Ok(u32::try_from(count).unwrap_or(u32::MAX))
            }
            None => Ok(0),
        }
    }

    async fn backlog(&self) -> Result<u64> {
        let (sql, values) = Query::select()
            .expr(Expr::col(OutboxTable::Ticket).count())
            .from(OutboxTable::Table)
            .build_sqlx(SqliteQueryBuilder);

        let row = sqlx::query_with(&sql, values).fetch_one(&self.pool).await?;
        let count: i64 = row.try_get(0)?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
