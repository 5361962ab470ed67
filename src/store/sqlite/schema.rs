//! Table definitions for the SQLite source of truth.

use sea_query::Iden;

#[derive(Iden)]
pub enum Customer {
    Table,
    Id,
    Name,
    Email,
    Address,
    City,
    PostalCode,
    Country,
    CreatedAt,
}

#[derive(Iden)]
pub enum Product {
    Table,
    Id,
    Name,
    Description,
    Price,
    CreatedAt,
}

#[derive(Iden)]
pub enum Order {
    #[iden = "order"]
    Table,
    Id,
    CustomerId,
    OrderNumber,
    TotalAmount,
    Status,
    CreatedAt,
    UpdatedAt,
}

#[derive(Iden)]
pub enum OrderItem {
    Table,
    Id,
    OrderId,
    Name,
    Quantity,
    Price,
    Total,
}

#[derive(Iden)]
pub enum ProjectionOutbox {
    Table,
    Ticket,
    Entity,
    EntityId,
    Action,
    CustomerId,
    RetryCount,
    CreatedAt,
}

/// Schema statements, run one at a time by `SqlStore::init`.
pub const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS customer (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        name TEXT NOT NULL,
        email TEXT NOT NULL,
        address TEXT NOT NULL,
        city TEXT NOT NULL,
        postal_code TEXT NOT NULL,
        country TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_customer_email ON customer (email)",
    r#"CREATE TABLE IF NOT EXISTS product (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        name TEXT NOT NULL,
        description TEXT NOT NULL,
        price TEXT NOT NULL,
        created_at TEXT NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS "order" (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        customer_id INTEGER NOT NULL REFERENCES customer (id),
        order_number TEXT NOT NULL,
        total_amount TEXT NOT NULL,
        status TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_order_customer ON "order" (customer_id)"#,
    r#"CREATE TABLE IF NOT EXISTS order_item (
        id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
        order_id INTEGER NOT NULL REFERENCES "order" (id) ON DELETE CASCADE,
        name TEXT NOT NULL,
        quantity INTEGER NOT NULL,
        price TEXT NOT NULL,
        total TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_order_item_order ON order_item (order_id)",
    r#"CREATE TABLE IF NOT EXISTS projection_outbox (
        ticket TEXT PRIMARY KEY NOT NULL,
        entity TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        action TEXT NOT NULL,
        customer_id INTEGER,
        retry_count INTEGER NOT NULL DEFAULT 0,
        created_at TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_projection_outbox_created ON projection_outbox (created_at)",
];
