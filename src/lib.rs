//! Storefront - CQRS write side with cache-resident read projections
//!
//! Customers, products and orders are written to a relational source of
//! truth. Every write also records an outbox entry in the same
//! transaction; the projection sync then writes the matching read model to
//! the key-value cache and retires the entry. Entries whose cache write
//! failed are reconciled against the source by the outbox recovery loop,
//! and whole projection families can be rebuilt from the source on demand.
//!
//! ## Modules
//! - [`model`]: entities, line pricing and the money/timestamp formats
//! - [`store`]: source-of-truth traits, SQLite and in-memory stores, outbox rows
//! - [`cache`]: key-value cache abstraction over Redis
//! - [`projection`]: projection records, repositories and product summaries
//! - [`sync`]: settling projections after commits, recovery and rebuilds
//! - [`commands`]: validated entry points for writes and projection reads

pub mod cache;
pub mod commands;
pub mod config;
pub mod model;
pub mod projection;
pub mod store;
pub mod sync;
pub mod utils;
