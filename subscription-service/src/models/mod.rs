//! Domain models for subscription-service.

mod bill;
mod price;
mod statement;
mod subscription;

pub use bill::{BillListResult, BillReason, BillStatus, ListBillsFilter, NewSubscriptionBill, SubscriptionBill};
pub use price::{CreatePrice, Price, SkuKind, SkuUnitType};
pub use statement::{BalanceField, NewStatement, Scene, Statement, StatementMeta, UserBalance};
pub use subscription::{
    ListSubscriptionsFilter, NewSubscription, Subscription, SubscriptionDraft,
    SubscriptionListResult, SubscriptionRequest, SubscriptionStatus, Transition,
};

/// A stored enum column held a value this service does not know.
#[derive(Debug, thiserror::Error)]
#[error("unknown {kind}: {value}")]
pub struct ParseEnumError {
    kind: &'static str,
    value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: String) -> Self {
        Self { kind, value }
    }
}
