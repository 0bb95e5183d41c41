//! Ledger statement and user balance models.

use super::{ParseEnumError, Price};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Balance column a delta is applied to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BalanceField {
    Credit,
    Cash,
}

impl BalanceField {
    pub fn as_str(&self) -> &'static str {
        match self {
            BalanceField::Credit => "credit",
            BalanceField::Cash => "cash",
        }
    }
}

/// Business scene a statement was recorded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scene {
    PaySubscription,
    CashCharge,
    CreditCharge,
}

impl Scene {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scene::PaySubscription => "pay_subscription",
            Scene::CashCharge => "cash_charge",
            Scene::CreditCharge => "credit_charge",
        }
    }
}

impl TryFrom<String> for Scene {
    type Error = ParseEnumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "pay_subscription" => Ok(Scene::PaySubscription),
            "cash_charge" => Ok(Scene::CashCharge),
            "credit_charge" => Ok(Scene::CreditCharge),
            _ => Err(ParseEnumError::new("statement scene", value)),
        }
    }
}

/// Dual balance of one user.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserBalance {
    pub user_uuid: String,
    pub credit_balance: Decimal,
    pub cash_balance: Decimal,
    pub updated_utc: DateTime<Utc>,
}

impl UserBalance {
    /// Combined spendable balance.
    pub fn available(&self) -> Decimal {
        self.credit_balance + self.cash_balance
    }
}

/// Ledger entry. Exactly one per event uuid.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Statement {
    pub statement_id: i64,
    pub event_uuid: Uuid,
    pub user_uuid: String,
    pub value: Decimal,
    #[sqlx(try_from = "String")]
    pub scene: Scene,
    pub op_uid: String,
    pub customer_id: String,
    pub resource_id: String,
    pub price_id: Option<i64>,
    pub unit_price: Decimal,
    pub currency: String,
    pub discount: Decimal,
    pub cash_value: Decimal,
    pub credit_value: Decimal,
    pub cash_balance_after: Decimal,
    pub credit_balance_after: Decimal,
    pub recorded_utc: DateTime<Utc>,
}

/// Descriptive fields a caller attaches to a charge.
#[derive(Debug, Clone)]
pub struct StatementMeta {
    pub scene: Scene,
    pub op_uid: String,
    pub customer_id: String,
    pub resource_id: String,
    pub price_id: Option<i64>,
    pub unit_price: Decimal,
    pub currency: String,
    pub discount: Decimal,
}

impl StatementMeta {
    /// Metadata for a subscription payment against `price`.
    pub fn for_price(price: &Price, op_uid: &str) -> Self {
        Self {
            scene: Scene::PaySubscription,
            op_uid: op_uid.to_string(),
            customer_id: price.resource_id.clone(),
            resource_id: price.resource_id.clone(),
            price_id: Some(price.price_id),
            unit_price: price.amount,
            currency: price.currency.clone(),
            discount: price.discount,
        }
    }

    /// Metadata for a balance top-up.
    pub fn top_up(scene: Scene, op_uid: &str, currency: &str) -> Self {
        Self {
            scene,
            op_uid: op_uid.to_string(),
            customer_id: String::new(),
            resource_id: String::new(),
            price_id: None,
            unit_price: Decimal::ZERO,
            currency: currency.to_string(),
            discount: Decimal::ZERO,
        }
    }
}

/// Input for inserting a statement.
#[derive(Debug, Clone)]
pub struct NewStatement {
    pub event_uuid: Uuid,
    pub user_uuid: String,
    pub value: Decimal,
    pub meta: StatementMeta,
    pub cash_value: Decimal,
    pub credit_value: Decimal,
    pub cash_balance_after: Decimal,
    pub credit_balance_after: Decimal,
    pub recorded_utc: DateTime<Utc>,
}
