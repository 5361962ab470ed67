//! Customer entity.

use chrono::NaiveDateTime;

use super::EntityId;

/// Customer row as stored in the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: EntityId,
    pub name: String,
    /// Unique across all customers.
    pub email: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub created_at: NaiveDateTime,
}

/// Input for creating a customer. The id is assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCustomer {
    pub name: String,
    pub email: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
    pub created_at: NaiveDateTime,
}

impl NewCustomer {
    /// Attach the store-assigned id.
    pub fn with_id(self, id: EntityId) -> Customer {
        Customer {
            id,
            name: self.name,
            email: self.email,
            address: self.address,
            city: self.city,
            postal_code: self.postal_code,
            country: self.country,
            created_at: self.created_at,
        }
    }
}
