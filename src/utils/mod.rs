//! Shared helpers for the storefront binaries.

pub mod bootstrap;
