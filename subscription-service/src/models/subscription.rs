//! Subscription model and its state table.

use super::{ParseEnumError, Price, SkuUnitType, SubscriptionBill};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Subscription status. `Canceled` is terminal except for reactivation
/// while the last paid period is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Canceled => "canceled",
        }
    }

    /// Status reached by applying `transition`, or `None` when the
    /// transition is not allowed from this status.
    pub fn apply(self, transition: Transition) -> Option<SubscriptionStatus> {
        use SubscriptionStatus::{Active, Canceled};
        use Transition::*;

        match (self, transition) {
            (Active, ChangePrice | Renew) => Some(Active),
            (Active, RenewCancel | Cancel) => Some(Canceled),
            (Canceled, Reactivate) => Some(Active),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<String> for SubscriptionStatus {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "active" => Ok(SubscriptionStatus::Active),
            "canceled" => Ok(SubscriptionStatus::Canceled),
            _ => Err(ParseEnumError::new("subscription status", value)),
        }
    }
}

/// Lifecycle transitions applied to an existing subscription row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    /// Upgrade or downgrade of an active subscription.
    ChangePrice,
    /// Upgrade or downgrade that brings a canceled lineage back while its
    /// period is still open.
    Reactivate,
    Renew,
    /// Renewal that could not be paid for.
    RenewCancel,
    /// User-initiated close.
    Cancel,
}

/// Subscription row. One lineage per (user, SKU type); rows are never deleted.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Subscription {
    pub subscription_id: i64,
    pub user_uuid: String,
    pub sku_type: i32,
    pub price_id: i64,
    pub resource_id: String,
    #[sqlx(try_from = "String")]
    pub status: SubscriptionStatus,
    pub action_user: String,
    pub started_utc: DateTime<Utc>,
    pub ended_utc: Option<DateTime<Utc>>,
    pub last_bill_id: Option<i64>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub amount_paid_total: Decimal,
    pub amount_paid_count: i64,
    pub next_price_id: i64,
    pub next_resource_id: String,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// A downgrade is waiting for the next renewal.
    pub fn has_pending_change(&self) -> bool {
        self.price_id != self.next_price_id
    }

    pub fn period_open_at(&self, now: DateTime<Utc>) -> bool {
        self.current_period_end > now
    }
}

/// Next state of a subscription, assembled completely before it is persisted
/// with a single update.
#[derive(Debug, Clone)]
pub struct SubscriptionDraft {
    inner: Subscription,
}

impl SubscriptionDraft {
    pub fn from_current(current: &Subscription) -> Self {
        Self {
            inner: current.clone(),
        }
    }

    pub fn status(mut self, status: SubscriptionStatus) -> Self {
        self.inner.status = status;
        self
    }

    pub fn action_user(mut self, action_user: &str) -> Self {
        self.inner.action_user = action_user.to_string();
        self
    }

    pub fn ended(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.inner.ended_utc = at;
        self
    }

    /// Make `price` the one billed for the current period.
    pub fn current_price(mut self, price: &Price) -> Self {
        self.inner.price_id = price.price_id;
        self.inner.resource_id = price.resource_id.clone();
        self
    }

    /// Make `price` the one billed at the next renewal.
    pub fn next_price(mut self, price: &Price) -> Self {
        self.inner.next_price_id = price.price_id;
        self.inner.next_resource_id = price.resource_id.clone();
        self
    }

    /// Point the subscription at `bill` and adopt its period.
    pub fn billed(mut self, bill: &SubscriptionBill) -> Self {
        self.inner.last_bill_id = Some(bill.bill_id);
        self.inner.current_period_start = bill.period_start;
        self.inner.current_period_end = bill.period_end;
        self
    }

    pub fn paid(mut self, amount: Decimal) -> Self {
        self.inner.amount_paid_total += amount;
        self.inner.amount_paid_count += 1;
        self
    }

    pub fn build(self) -> Subscription {
        self.inner
    }
}

/// Input for inserting a brand-new subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub user_uuid: String,
    pub sku_type: i32,
    pub price_id: i64,
    pub resource_id: String,
    pub status: SubscriptionStatus,
    pub action_user: String,
    pub started_utc: DateTime<Utc>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub amount_paid_total: Decimal,
    pub amount_paid_count: i64,
    pub next_price_id: i64,
    pub next_resource_id: String,
}

/// Create or change request for a (user, SKU type) lineage.
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub user_uuid: String,
    pub action_user: String,
    pub sku_type: i32,
    pub resource_id: String,
    pub unit_type: SkuUnitType,
    pub event_uuid: Uuid,
}

/// Filter parameters for listing subscriptions.
#[derive(Debug, Clone, Default)]
pub struct ListSubscriptionsFilter {
    pub user_uuid: Option<String>,
    pub sku_type: Option<i32>,
    pub status: Option<SubscriptionStatus>,
    pub started_from: Option<DateTime<Utc>>,
    pub started_to: Option<DateTime<Utc>>,
    pub page: i64,
    pub per_page: i64,
}

/// One page of subscriptions plus totals over the whole filtered set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionListResult {
    pub items: Vec<Subscription>,
    pub total: i64,
    pub paid_total_amount: Decimal,
    pub paid_total_count: i64,
}
