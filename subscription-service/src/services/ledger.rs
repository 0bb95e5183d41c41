//! Ledger recorder: the only code path that moves money between balances.
//!
//! Every balance change is paired with a statement keyed by the caller's
//! event uuid, and both happen in the caller's unit of work with the user's
//! balance row locked.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::{PersistContext, StoreError, SubscriptionError};
use crate::models::{BalanceField, NewStatement, Scene, Statement, StatementMeta, UserBalance};
use crate::services::metrics;
use crate::services::store::{SubscriptionStore, UnitOfWork};

/// Which balance column a charge lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deduction {
    /// The whole amount goes to one column.
    Field(BalanceField),
    /// Debits drain cash, then credit; whatever is left is charged to cash.
    /// Credits go to cash.
    CashFirst,
}

impl Default for Deduction {
    fn default() -> Self {
        Deduction::Field(BalanceField::Credit)
    }
}

/// A signed balance change to record.
#[derive(Debug, Clone)]
pub struct Charge {
    pub event_uuid: Uuid,
    pub user_uuid: String,
    /// Negative debits the user, positive credits them.
    pub amount: Decimal,
    pub deduction: Deduction,
    pub meta: StatementMeta,
    pub at: DateTime<Utc>,
}

/// Balance top-up request.
#[derive(Debug, Clone)]
pub struct TopUp {
    pub event_uuid: Uuid,
    pub user_uuid: String,
    pub amount: Decimal,
    pub field: BalanceField,
    pub currency: String,
    pub op_uid: String,
}

/// Split of a signed amount into (cash, credit) deltas.
pub fn split_amount(balance: &UserBalance, amount: Decimal, deduction: Deduction) -> (Decimal, Decimal) {
    match deduction {
        Deduction::Field(BalanceField::Cash) => (amount, Decimal::ZERO),
        Deduction::Field(BalanceField::Credit) => (Decimal::ZERO, amount),
        Deduction::CashFirst if amount >= Decimal::ZERO => (amount, Decimal::ZERO),
        Deduction::CashFirst => {
            let cost = -amount;
            let from_cash = cost.min(balance.cash_balance.max(Decimal::ZERO));
            let from_credit = (cost - from_cash).min(balance.credit_balance.max(Decimal::ZERO));
            let shortfall = cost - from_cash - from_credit;
            (-(from_cash + shortfall), -from_credit)
        }
    }
}

pub struct LedgerRecorder<S: SubscriptionStore> {
    store: Arc<S>,
}

impl<S: SubscriptionStore> Clone for LedgerRecorder<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: SubscriptionStore> LedgerRecorder<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Lock the user's balance and fail unless it covers `required`.
    /// A user without a balance row has nothing available.
    #[instrument(skip(self, tx), fields(user_uuid = %user_uuid, required = %required))]
    pub async fn ensure_available(
        &self,
        tx: &mut S::Tx,
        user_uuid: &str,
        required: Decimal,
    ) -> Result<UserBalance, SubscriptionError> {
        let balance = tx
            .lock_balance_for_update(user_uuid)
            .await
            .persist_ctx(|| format!("lock balance of user {}", user_uuid))?;
        let available = balance.as_ref().map(UserBalance::available).unwrap_or(Decimal::ZERO);
        if available < required {
            return Err(SubscriptionError::InsufficientBalance {
                available,
                required,
            });
        }
        match balance {
            Some(balance) => Ok(balance),
            None => self.lock_or_create(tx, user_uuid).await,
        }
    }

    /// Record `charge` and apply it to the user's balance.
    ///
    /// Fails with [`SubscriptionError::DuplicateEvent`] when the event uuid
    /// was already recorded; the balance is left untouched in that case.
    #[instrument(
        skip(self, tx, charge),
        fields(event_uuid = %charge.event_uuid, user_uuid = %charge.user_uuid, amount = %charge.amount)
    )]
    pub async fn charge(
        &self,
        tx: &mut S::Tx,
        charge: Charge,
    ) -> Result<Statement, SubscriptionError> {
        let balance = self.lock_or_create(tx, &charge.user_uuid).await?;

        let existing = tx
            .find_statement_by_event(charge.event_uuid)
            .await
            .persist_ctx(|| format!("check event {}", charge.event_uuid))?;
        if existing.is_some() {
            return Err(SubscriptionError::DuplicateEvent(charge.event_uuid));
        }

        let (cash_delta, credit_delta) = split_amount(&balance, charge.amount, charge.deduction);
        let currency = charge.meta.currency.clone();
        let statement = NewStatement {
            event_uuid: charge.event_uuid,
            user_uuid: charge.user_uuid.clone(),
            value: charge.amount,
            meta: charge.meta,
            cash_value: cash_delta,
            credit_value: credit_delta,
            cash_balance_after: balance.cash_balance + cash_delta,
            credit_balance_after: balance.credit_balance + credit_delta,
            recorded_utc: charge.at,
        };

        let statement = match tx.insert_statement(&statement).await {
            Ok(statement) => statement,
            Err(StoreError::UniqueViolation(_)) => {
                return Err(SubscriptionError::DuplicateEvent(charge.event_uuid));
            }
            Err(e) => {
                return Err(e).persist_ctx(|| {
                    format!("insert statement for event {}", charge.event_uuid)
                });
            }
        };

        for (field, delta) in [
            (BalanceField::Cash, cash_delta),
            (BalanceField::Credit, credit_delta),
        ] {
            if delta.is_zero() {
                continue;
            }
            tx.apply_balance_delta(&charge.user_uuid, field, delta)
                .await
                .persist_ctx(|| {
                    format!(
                        "apply {} delta {} to user {}",
                        field.as_str(),
                        delta,
                        charge.user_uuid
                    )
                })?;
        }

        metrics::record_charge(&currency, charge.amount);
        info!(
            statement_id = statement.statement_id,
            cash_value = %cash_delta,
            credit_value = %credit_delta,
            "Charge recorded"
        );

        Ok(statement)
    }

    /// Add a positive amount to one balance column in its own unit of work.
    ///
    /// Replaying an event that was already applied is not an error; it
    /// returns `None` and leaves the balance alone.
    #[instrument(skip(self, top_up), fields(event_uuid = %top_up.event_uuid, user_uuid = %top_up.user_uuid))]
    pub async fn top_up(&self, top_up: TopUp) -> Result<Option<Statement>, SubscriptionError> {
        if top_up.amount <= Decimal::ZERO {
            return Err(SubscriptionError::InvalidAmount(top_up.amount));
        }

        let scene = match top_up.field {
            BalanceField::Cash => Scene::CashCharge,
            BalanceField::Credit => Scene::CreditCharge,
        };
        let mut tx = self.store.begin().await.persist_ctx(|| "begin top-up".to_string())?;
        let charge = Charge {
            event_uuid: top_up.event_uuid,
            user_uuid: top_up.user_uuid.clone(),
            amount: top_up.amount,
            deduction: Deduction::Field(top_up.field),
            meta: StatementMeta::top_up(scene, &top_up.op_uid, &top_up.currency),
            at: Utc::now(),
        };

        match self.charge(&mut tx, charge).await {
            Ok(statement) => {
                tx.commit()
                    .await
                    .persist_ctx(|| format!("commit top-up {}", top_up.event_uuid))?;
                Ok(Some(statement))
            }
            Err(SubscriptionError::DuplicateEvent(event_uuid)) => {
                warn!(event_uuid = %event_uuid, "Top-up already applied, skipping");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn lock_or_create(
        &self,
        tx: &mut S::Tx,
        user_uuid: &str,
    ) -> Result<UserBalance, SubscriptionError> {
        let ctx = || format!("lock balance of user {}", user_uuid);
        if let Some(balance) = tx.lock_balance_for_update(user_uuid).await.persist_ctx(ctx)? {
            return Ok(balance);
        }

        tx.create_balance(user_uuid)
            .await
            .persist_ctx(|| format!("create balance of user {}", user_uuid))?;
        tx.lock_balance_for_update(user_uuid)
            .await
            .persist_ctx(ctx)?
            .ok_or_else(|| SubscriptionError::NotFound(format!("balance of user {}", user_uuid)))
    }
}
