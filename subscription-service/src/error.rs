//! Typed failures of the subscription core.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{SubscriptionStatus, Transition};

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("An active subscription already exists for user {user_uuid} and sku type {sku_type}")]
    SubscriptionExists { user_uuid: String, sku_type: i32 },

    #[error("Invalid unit type: {0}")]
    InvalidUnitType(String),

    #[error("Time {now} is outside of period [{start}, {end}]")]
    WrongTimeRange {
        now: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Period of {count} x {unit} from {start} is out of range")]
    PeriodOverflow {
        start: DateTime<Utc>,
        unit: String,
        count: i32,
    },

    #[error("Insufficient balance: available {available}, required {required}")]
    InsufficientBalance { available: Decimal, required: Decimal },

    #[error("Price not found: {0}")]
    PriceNotFound(String),

    #[error("Amount must be positive, got {0}")]
    InvalidAmount(Decimal),

    #[error("Event {0} was already applied")]
    DuplicateEvent(Uuid),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Subscription {subscription_id} in status {status} does not accept {transition:?}")]
    InvalidTransition {
        subscription_id: i64,
        status: SubscriptionStatus,
        transition: Transition,
    },

    #[error("Failed to {context}: {source}")]
    Persistence {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl SubscriptionError {
    /// Low-cardinality label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            SubscriptionError::SubscriptionExists { .. } => "subscription_exists",
            SubscriptionError::InvalidUnitType(_) => "invalid_unit_type",
            SubscriptionError::WrongTimeRange { .. } => "wrong_time_range",
            SubscriptionError::PeriodOverflow { .. } => "period_overflow",
            SubscriptionError::InsufficientBalance { .. } => "insufficient_balance",
            SubscriptionError::PriceNotFound(_) => "price_not_found",
            SubscriptionError::InvalidAmount(_) => "invalid_amount",
            SubscriptionError::DuplicateEvent(_) => "duplicate_event",
            SubscriptionError::NotFound(_) => "not_found",
            SubscriptionError::InvalidTransition { .. } => "invalid_transition",
            SubscriptionError::Persistence { .. } => "persistence",
        }
    }
}

/// Failure reported by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A uniqueness constraint rejected the write. Holds the constraint name.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Tags storage errors with the operation and ids they happened under.
pub trait PersistContext<T> {
    fn persist_ctx<F>(self, context: F) -> Result<T, SubscriptionError>
    where
        F: FnOnce() -> String;
}

impl<T> PersistContext<T> for Result<T, StoreError> {
    fn persist_ctx<F>(self, context: F) -> Result<T, SubscriptionError>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| SubscriptionError::Persistence {
            context: context(),
            source: match e {
                StoreError::Backend(err) => err,
                other => anyhow::Error::new(other),
            },
        })
    }
}

impl From<SubscriptionError> for AppError {
    fn from(err: SubscriptionError) -> Self {
        match err {
            SubscriptionError::SubscriptionExists { .. }
            | SubscriptionError::DuplicateEvent(_)
            | SubscriptionError::InvalidTransition { .. } => {
                AppError::Conflict(anyhow::anyhow!(err.to_string()))
            }
            SubscriptionError::InvalidUnitType(_)
            | SubscriptionError::WrongTimeRange { .. }
            | SubscriptionError::PeriodOverflow { .. }
            | SubscriptionError::InvalidAmount(_)
            | SubscriptionError::InsufficientBalance { .. } => {
                AppError::BadRequest(anyhow::anyhow!(err.to_string()))
            }
            SubscriptionError::PriceNotFound(_) | SubscriptionError::NotFound(_) => {
                AppError::NotFound(anyhow::anyhow!(err.to_string()))
            }
            SubscriptionError::Persistence { context, source } => {
                AppError::DatabaseError(source.context(context))
            }
        }
    }
}
