//! Product entity.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;

use super::{money, EntityId};

/// Product row as stored in the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub created_at: NaiveDateTime,
}

/// Input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: Decimal,
    pub created_at: NaiveDateTime,
}

impl NewProduct {
    pub fn with_id(self, id: EntityId) -> Product {
        Product {
            id,
            name: self.name,
            description: self.description,
            price: money(self.price),
            created_at: self.created_at,
        }
    }
}

/// Partial update of a product. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<Decimal>,
    pub created_at: Option<NaiveDateTime>,
}

impl ProductChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.price.is_none()
            && self.created_at.is_none()
    }

    /// Apply the changes to a loaded product.
    pub fn apply_to(&self, product: &mut Product) {
        if let Some(name) = &self.name {
            product.name = name.clone();
        }
        if let Some(description) = &self.description {
            product.description = description.clone();
        }
        if let Some(price) = self.price {
            product.price = money(price);
        }
        if let Some(created_at) = self.created_at {
            product.created_at = created_at;
        }
    }
}
