//! Price catalog model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Calendar unit a time-span price is billed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuUnitType {
    Day,
    Week,
    Month,
    Year,
}

impl SkuUnitType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkuUnitType::Day => "day",
            SkuUnitType::Week => "week",
            SkuUnitType::Month => "month",
            SkuUnitType::Year => "year",
        }
    }

    /// Parse a stored unit type. Unknown units yield `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(SkuUnitType::Day),
            "week" => Some(SkuUnitType::Week),
            "month" => Some(SkuUnitType::Month),
            "year" => Some(SkuUnitType::Year),
            _ => None,
        }
    }
}

impl std::fmt::Display for SkuUnitType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a price is charged once or per time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkuKind {
    OneOff,
    TimeSpan,
}

impl SkuKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkuKind::OneOff => "one_off",
            SkuKind::TimeSpan => "time_span",
        }
    }
}

/// Catalog price row.
///
/// Prices are append-only: a new tier is a new row, so a bill always points
/// at the exact price it was charged with. `unit_type` and `sku_kind` stay as
/// stored strings because the catalog is owned outside this service.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Price {
    pub price_id: i64,
    pub sku_type: i32,
    pub sku_kind: String,
    pub amount: Decimal,
    pub unit_type: String,
    pub unit_count: i32,
    pub resource_id: String,
    pub currency: String,
    pub discount: Decimal,
    pub created_utc: DateTime<Utc>,
}

impl Price {
    pub fn parsed_unit_type(&self) -> Option<SkuUnitType> {
        SkuUnitType::parse(&self.unit_type)
    }

    /// Two prices can be prorated against each other only when they bill
    /// the same span.
    pub fn same_span_as(&self, other: &Price) -> bool {
        self.unit_type == other.unit_type && self.unit_count == other.unit_count
    }
}

/// Input for adding a price to the catalog.
#[derive(Debug, Clone)]
pub struct CreatePrice {
    pub sku_type: i32,
    pub sku_kind: SkuKind,
    pub amount: Decimal,
    pub unit_type: String,
    pub unit_count: i32,
    pub resource_id: String,
    pub currency: String,
    pub discount: Decimal,
}
