//! Mid-period price change proration.

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::SubscriptionError;
use crate::models::Price;

/// Billing window of a subscription. Both bounds are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingPeriod {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BillingPeriod {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// Decimal places kept for amounts that reach the ledger.
pub const MONEY_SCALE: u32 = 6;

/// Amount owed now for switching from `pre` to `post` inside `period`.
///
/// Downgrades and same-price switches owe nothing. Upgrades owe the price
/// delta scaled by the share of the period still remaining, rounded to the
/// six decimal places money columns hold (ties to even).
pub fn fee_gap(
    pre: &Price,
    post: &Price,
    now: DateTime<Utc>,
    period: BillingPeriod,
) -> Result<Decimal, SubscriptionError> {
    if !pre.same_span_as(post) {
        return Err(SubscriptionError::InvalidUnitType(format!(
            "cannot prorate {} x {} against {} x {}",
            pre.unit_count, pre.unit_type, post.unit_count, post.unit_type
        )));
    }

    if post.amount <= pre.amount {
        return Ok(Decimal::ZERO);
    }

    let total = (period.end - period.start).num_milliseconds();
    if !period.contains(now) || total <= 0 {
        return Err(SubscriptionError::WrongTimeRange {
            now,
            start: period.start,
            end: period.end,
        });
    }

    let remaining = (period.end - now).num_milliseconds();
    let delta = post.amount - pre.amount;
    Ok((delta * Decimal::from(remaining) / Decimal::from(total))
        .round_dp_with_strategy(MONEY_SCALE, RoundingStrategy::MidpointNearestEven))
}
