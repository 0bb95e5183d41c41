//! Subscription bill model.

use super::ParseEnumError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Bill status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillStatus {
    Paid,
    Failed,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Paid => "paid",
            BillStatus::Failed => "failed",
        }
    }
}

impl TryFrom<String> for BillStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "paid" => Ok(BillStatus::Paid),
            "failed" => Ok(BillStatus::Failed),
            _ => Err(ParseEnumError::new("bill status", value)),
        }
    }
}

/// Why a bill was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillReason {
    Create,
    Upgrade,
    Downgrade,
    Cycle,
    LostPrice,
    BalanceInsufficient,
}

impl BillReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillReason::Create => "subscription_create",
            BillReason::Upgrade => "subscription_upgrade",
            BillReason::Downgrade => "subscription_downgrade",
            BillReason::Cycle => "subscription_cycle",
            BillReason::LostPrice => "lost_price",
            BillReason::BalanceInsufficient => "balance_insufficient",
        }
    }
}

impl std::fmt::Display for BillReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for BillReason {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "subscription_create" => Ok(BillReason::Create),
            "subscription_upgrade" => Ok(BillReason::Upgrade),
            "subscription_downgrade" => Ok(BillReason::Downgrade),
            "subscription_cycle" => Ok(BillReason::Cycle),
            "lost_price" => Ok(BillReason::LostPrice),
            "balance_insufficient" => Ok(BillReason::BalanceInsufficient),
            _ => Err(ParseEnumError::new("bill reason", value)),
        }
    }
}

/// Immutable audit record of one billing event against a subscription.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SubscriptionBill {
    pub bill_id: i64,
    pub subscription_id: i64,
    pub event_uuid: Uuid,
    pub user_uuid: String,
    pub sku_type: i32,
    pub amount_paid: Decimal,
    #[sqlx(try_from = "String")]
    pub status: BillStatus,
    #[sqlx(try_from = "String")]
    pub reason: BillReason,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub price_id: i64,
    pub resource_id: String,
    pub discount: Decimal,
    pub created_utc: DateTime<Utc>,
}

/// Input for inserting a bill.
#[derive(Debug, Clone)]
pub struct NewSubscriptionBill {
    pub subscription_id: i64,
    pub event_uuid: Uuid,
    pub user_uuid: String,
    pub sku_type: i32,
    pub amount_paid: Decimal,
    pub status: BillStatus,
    pub reason: BillReason,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub price_id: i64,
    pub resource_id: String,
    pub discount: Decimal,
}

/// Filter parameters for listing bills.
#[derive(Debug, Clone, Default)]
pub struct ListBillsFilter {
    pub user_uuid: Option<String>,
    pub subscription_id: Option<i64>,
    pub sku_type: Option<i32>,
    pub status: Option<BillStatus>,
    pub created_from: Option<DateTime<Utc>>,
    pub created_to: Option<DateTime<Utc>>,
    pub page: i64,
    pub per_page: i64,
}

/// One page of bills plus totals over the whole filtered set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillListResult {
    pub items: Vec<SubscriptionBill>,
    pub total: i64,
    pub total_amount: Decimal,
}
