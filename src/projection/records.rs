//! Projection records and their builders.
//!
//! Field names and formats are the cache wire format shared with every
//! reader of these keys; do not rename without migrating the cache.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{customer_orders_key, EntityKind, Projection, ProjectionError, Result};
use crate::model::{timestamp, Customer, EntityId, Order, OrderItem, Product};

/// Customer read model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerProjection {
    pub id: EntityId,
    pub name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
}

impl Projection for CustomerProjection {
    type Source = Customer;

    const KIND: EntityKind = EntityKind::Customer;

    fn build(customer: &Customer) -> Result<Self> {
        Ok(Self {
            id: customer.id,
            name: customer.name.clone(),
            email: customer.email.clone(),
            address: customer.address.clone(),
            city: customer.city.clone(),
            postal_code: customer.postal_code.clone(),
            country: customer.country.clone(),
            created_at: customer.created_at,
        })
    }

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Product read model. `price` is a JSON number in the cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductProjection {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    #[serde(with = "price_number")]
    pub price: Decimal,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
}

impl Projection for ProductProjection {
    type Source = Product;

    const KIND: EntityKind = EntityKind::Product;

    fn build(product: &Product) -> Result<Self> {
        Ok(Self {
            id: product.id,
            name: product.name.clone(),
            description: product.description.clone(),
            price: crate::model::money(product.price),
            created_at: product.created_at,
        })
    }

    fn id(&self) -> EntityId {
        self.id
    }
}

/// Order read model with the customer name embedded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderProjection {
    pub id: EntityId,
    pub customer_id: EntityId,
    pub customer_name: String,
    pub order_number: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub total_amount: Decimal,
    pub status: String,
    pub items: Vec<OrderItem>,
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
    #[serde(with = "timestamp::option", default)]
    pub updated_at: Option<NaiveDateTime>,
}

impl Projection for OrderProjection {
    type Source = Order;

    const KIND: EntityKind = EntityKind::Order;

    fn build(order: &Order) -> Result<Self> {
        let customer_name = order
            .customer_name
            .clone()
            .ok_or(ProjectionError::MissingRelation {
                entity: EntityKind::Order,
                id: order.id,
                relation: "customer",
            })?;

        Ok(Self {
            id: order.id,
            customer_id: order.customer_id,
            customer_name,
            order_number: order.order_number.clone(),
            total_amount: crate::model::money(order.total_amount),
            status: order.status.clone(),
            items: order.items.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        })
    }

    fn id(&self) -> EntityId {
        self.id
    }

    fn secondary_index_keys(&self) -> Vec<String> {
        vec![customer_orders_key(self.customer_id)]
    }
}

/// Decimal as a JSON number, normalised to two digits on read.
mod price_number {
    use rust_decimal::Decimal;
    use serde::{Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Decimal, serializer: S) -> Result<S::Ok, S::Error> {
        rust_decimal::serde::float::serialize(value, serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Decimal, D::Error> {
        rust_decimal::serde::float::deserialize(deserializer).map(crate::model::money)
    }
}
