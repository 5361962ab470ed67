//! Source-of-truth entity types.
//!
//! These are the shapes the relational store hands back. Projections are
//! built from them, never the other way round.

mod customer;
mod order;
mod product;

pub use customer::{Customer, NewCustomer};
pub use order::{
    price_order_lines, NewOrder, Order, OrderItem, OrderLine, PricedLines, PricingOverflow,
};
pub use product::{NewProduct, Product, ProductChanges};

use chrono::{DateTime, NaiveDateTime};
use rust_decimal::Decimal;

/// Entity identifier (relational auto-increment id).
pub type EntityId = i64;

/// Timestamp format used in the relational store and in cached projections.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Number of fractional digits carried by every money amount.
pub const MONEY_SCALE: u32 = 2;

/// Normalise an amount to exactly two fractional digits.
///
/// `25` becomes `25.00`, `10.005` becomes `10.01`. Midpoints round away
/// from zero.
pub fn money(amount: Decimal) -> Decimal {
    let mut rounded =
        amount.round_dp_with_strategy(MONEY_SCALE, rust_decimal::RoundingStrategy::MidpointAwayFromZero);
    rounded.rescale(MONEY_SCALE);
    rounded
}

/// Render a timestamp in the storefront format.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a timestamp in the storefront format.
///
/// RFC 3339 input is accepted as well and normalised to UTC.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
}

/// Current time truncated to whole seconds.
pub fn now() -> NaiveDateTime {
    let now = chrono::Utc::now().naive_utc();
    parse_timestamp(&format_timestamp(&now)).unwrap_or(now)
}

/// Serde adapter for `NaiveDateTime` in [`TIMESTAMP_FORMAT`].
pub mod timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDateTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_timestamp(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    /// Same format for optional timestamps; `None` is written as `null`.
    pub mod option {
        use chrono::NaiveDateTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            ts: &Option<NaiveDateTime>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match ts {
                Some(ts) => serializer.serialize_some(&crate::model::format_timestamp(ts)),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<NaiveDateTime>, D::Error> {
            let raw = Option::<String>::deserialize(deserializer)?;
            match raw {
                Some(raw) => crate::model::parse_timestamp(&raw)
                    .map(Some)
                    .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
                None => Ok(None),
            }
        }
    }
}
