//! Order aggregate and line pricing.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{money, EntityId, Product};

/// One line of an order.
///
/// `name` and `price` are copied from the product when the order is placed
/// and never follow later product changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub name: String,
    pub quantity: u32,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub total: Decimal,
}

/// Order row joined with its items and the owning customer's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: EntityId,
    pub customer_id: EntityId,
    /// Resolved from the customer table; `None` if the row is gone.
    pub customer_name: Option<String>,
    pub order_number: String,
    pub total_amount: Decimal,
    /// Free-form: pending, processing, shipped, delivered, cancelled.
    pub status: String,
    pub items: Vec<OrderItem>,
    pub created_at: NaiveDateTime,
    pub updated_at: Option<NaiveDateTime>,
}

/// Requested product and quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: EntityId,
    /// `None` orders a single unit. An explicit zero is kept as zero.
    pub quantity: Option<u32>,
}

/// Input for placing an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub customer_id: EntityId,
    pub order_number: String,
    pub status: String,
    pub lines: Vec<OrderLine>,
    pub created_at: NaiveDateTime,
}

/// Result of pricing order lines against the product catalogue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PricedLines {
    pub items: Vec<OrderItem>,
    pub total_amount: Decimal,
    /// Lines whose product could not be found.
    pub skipped: Vec<EntityId>,
}

/// Pricing failed because a line total or the order total does not fit a
/// `Decimal`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("order total overflows at product {product_id} (quantity {quantity})")]
pub struct PricingOverflow {
    pub product_id: EntityId,
    pub quantity: u32,
}

/// Snapshot product names and prices into order items and sum the total.
///
/// Lines referring to unknown products are skipped. A missing quantity
/// means one unit.
pub fn price_order_lines(
    lines: &[OrderLine],
    products: &HashMap<EntityId, Product>,
) -> Result<PricedLines, PricingOverflow> {
    let mut items = Vec::with_capacity(lines.len());
    let mut skipped = Vec::new();
    let mut total_amount = Decimal::ZERO;

    for line in lines {
        let Some(product) = products.get(&line.product_id) else {
            skipped.push(line.product_id);
            continue;
        };

        let quantity = line.quantity.unwrap_or(1);
        let overflow = || PricingOverflow {
            product_id: line.product_id,
            quantity,
        };
        let price = money(product.price);
        let total = money(price.checked_mul(Decimal::from(quantity)).ok_or_else(overflow)?);
        total_amount = total_amount.checked_add(total).ok_or_else(overflow)?;

        items.push(OrderItem {
            name: product.name.clone(),
            quantity,
            price,
            total,
        });
    }

    Ok(PricedLines {
        items,
        total_amount: money(total_amount),
        skipped,
    })
}
