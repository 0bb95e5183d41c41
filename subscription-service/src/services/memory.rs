//! In-memory store for tests and local runs.
//!
//! A unit of work holds the store-wide lock for its whole lifetime and works
//! on a private copy of the state, which replaces the shared state on
//! commit. Transactions are therefore fully serialized.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BalanceField, BillListResult, CreatePrice, ListBillsFilter, ListSubscriptionsFilter,
    NewStatement, NewSubscription, NewSubscriptionBill, Price, SkuKind, SkuUnitType, Statement,
    Subscription, SubscriptionBill, SubscriptionListResult, SubscriptionStatus, UserBalance,
};
use crate::services::store::{SubscriptionStore, UnitOfWork};

const ACTIVE_LINEAGE_CONSTRAINT: &str = "subscriptions_active_lineage_idx";
const STATEMENT_EVENT_CONSTRAINT: &str = "statements_event_uuid_key";

#[derive(Debug, Clone, Default)]
struct MemoryState {
    prices: Vec<Price>,
    balances: HashMap<String, UserBalance>,
    statements: Vec<Statement>,
    subscriptions: Vec<Subscription>,
    bills: Vec<SubscriptionBill>,
    next_id: i64,
}

impl MemoryState {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn latest_subscription(&self, user_uuid: &str, sku_type: i32) -> Option<Subscription> {
        self.subscriptions
            .iter()
            .filter(|s| s.user_uuid == user_uuid && s.sku_type == sku_type)
            .max_by_key(|s| s.subscription_id)
            .cloned()
    }

    fn active_conflict(&self, user_uuid: &str, sku_type: i32, except: Option<i64>) -> bool {
        self.subscriptions.iter().any(|s| {
            s.user_uuid == user_uuid
                && s.sku_type == sku_type
                && s.is_active()
                && Some(s.subscription_id) != except
        })
    }
}

fn page_bounds(page: i64, per_page: i64) -> (usize, usize) {
    let per_page = per_page.clamp(1, 100);
    let offset = (page.max(1) - 1) * per_page;
    (offset as usize, per_page as usize)
}

fn within(at: DateTime<Utc>, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> bool {
    from.is_none_or(|from| at >= from) && to.is_none_or(|to| at <= to)
}

/// Store backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a catalog price.
    pub async fn insert_price(&self, input: CreatePrice) -> Price {
        let mut state = self.state.lock().await;
        let price = Price {
            price_id: state.next_id(),
            sku_type: input.sku_type,
            sku_kind: input.sku_kind.as_str().to_string(),
            amount: input.amount,
            unit_type: input.unit_type,
            unit_count: input.unit_count,
            resource_id: input.resource_id,
            currency: input.currency,
            discount: input.discount,
            created_utc: Utc::now(),
        };
        state.prices.push(price.clone());
        price
    }

    /// Drop a catalog price, leaving subscriptions that point at it dangling.
    pub async fn remove_price(&self, price_id: i64) -> bool {
        let mut state = self.state.lock().await;
        let before = state.prices.len();
        state.prices.retain(|p| p.price_id != price_id);
        state.prices.len() != before
    }

    /// Move a subscription's period, e.g. to make it due for renewal.
    pub async fn set_period(
        &self,
        subscription_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> bool {
        let mut state = self.state.lock().await;
        match state
            .subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id)
        {
            Some(sub) => {
                sub.current_period_start = start;
                sub.current_period_end = end;
                true
            }
            None => false,
        }
    }

    /// Point a subscription's next renewal at another price.
    pub async fn set_next_price(&self, subscription_id: i64, price_id: i64) -> bool {
        let mut state = self.state.lock().await;
        match state
            .subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription_id)
        {
            Some(sub) => {
                sub.next_price_id = price_id;
                true
            }
            None => false,
        }
    }
}

pub struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl UnitOfWork for MemoryTx {
    async fn find_latest_price(
        &mut self,
        sku_type: i32,
        resource_id: &str,
        unit_type: SkuUnitType,
    ) -> Result<Option<Price>, StoreError> {
        Ok(self
            .working
            .prices
            .iter()
            .filter(|p| {
                p.sku_type == sku_type
                    && p.resource_id == resource_id
                    && p.unit_type == unit_type.as_str()
                    && p.sku_kind == SkuKind::TimeSpan.as_str()
            })
            .max_by_key(|p| (p.created_utc, p.price_id))
            .cloned())
    }

    async fn get_price(&mut self, price_id: i64) -> Result<Option<Price>, StoreError> {
        Ok(self
            .working
            .prices
            .iter()
            .find(|p| p.price_id == price_id)
            .cloned())
    }

    async fn lock_balance_for_update(
        &mut self,
        user_uuid: &str,
    ) -> Result<Option<UserBalance>, StoreError> {
        Ok(self.working.balances.get(user_uuid).cloned())
    }

    async fn create_balance(&mut self, user_uuid: &str) -> Result<(), StoreError> {
        self.working
            .balances
            .entry(user_uuid.to_string())
            .or_insert_with(|| UserBalance {
                user_uuid: user_uuid.to_string(),
                credit_balance: Decimal::ZERO,
                cash_balance: Decimal::ZERO,
                updated_utc: Utc::now(),
            });
        Ok(())
    }

    async fn apply_balance_delta(
        &mut self,
        user_uuid: &str,
        field: BalanceField,
        delta: Decimal,
    ) -> Result<UserBalance, StoreError> {
        let balance = self
            .working
            .balances
            .get_mut(user_uuid)
            .ok_or_else(|| anyhow::anyhow!("balance of user {} does not exist", user_uuid))?;
        match field {
            BalanceField::Cash => balance.cash_balance += delta,
            BalanceField::Credit => balance.credit_balance += delta,
        }
        balance.updated_utc = Utc::now();
        Ok(balance.clone())
    }

    async fn find_statement_by_event(
        &mut self,
        event_uuid: Uuid,
    ) -> Result<Option<Statement>, StoreError> {
        Ok(self
            .working
            .statements
            .iter()
            .find(|s| s.event_uuid == event_uuid)
            .cloned())
    }

    async fn insert_statement(&mut self, input: &NewStatement) -> Result<Statement, StoreError> {
        if self
            .working
            .statements
            .iter()
            .any(|s| s.event_uuid == input.event_uuid)
        {
            return Err(StoreError::UniqueViolation(STATEMENT_EVENT_CONSTRAINT.to_string()));
        }

        let statement = Statement {
            statement_id: self.working.next_id(),
            event_uuid: input.event_uuid,
            user_uuid: input.user_uuid.clone(),
            value: input.value,
            scene: input.meta.scene,
            op_uid: input.meta.op_uid.clone(),
            customer_id: input.meta.customer_id.clone(),
            resource_id: input.meta.resource_id.clone(),
            price_id: input.meta.price_id,
            unit_price: input.meta.unit_price,
            currency: input.meta.currency.clone(),
            discount: input.meta.discount,
            cash_value: input.cash_value,
            credit_value: input.credit_value,
            cash_balance_after: input.cash_balance_after,
            credit_balance_after: input.credit_balance_after,
            recorded_utc: input.recorded_utc,
        };
        self.working.statements.push(statement.clone());
        Ok(statement)
    }

    async fn latest_subscription(
        &mut self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.working.latest_subscription(user_uuid, sku_type))
    }

    async fn lock_subscription_for_update(
        &mut self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .cloned())
    }

    async fn insert_subscription(
        &mut self,
        input: &NewSubscription,
    ) -> Result<Subscription, StoreError> {
        if input.status == SubscriptionStatus::Active
            && self
                .working
                .active_conflict(&input.user_uuid, input.sku_type, None)
        {
            return Err(StoreError::UniqueViolation(ACTIVE_LINEAGE_CONSTRAINT.to_string()));
        }

        let now = Utc::now();
        let subscription = Subscription {
            subscription_id: self.working.next_id(),
            user_uuid: input.user_uuid.clone(),
            sku_type: input.sku_type,
            price_id: input.price_id,
            resource_id: input.resource_id.clone(),
            status: input.status,
            action_user: input.action_user.clone(),
            started_utc: input.started_utc,
            ended_utc: None,
            last_bill_id: None,
            current_period_start: input.current_period_start,
            current_period_end: input.current_period_end,
            amount_paid_total: input.amount_paid_total,
            amount_paid_count: input.amount_paid_count,
            next_price_id: input.next_price_id,
            next_resource_id: input.next_resource_id.clone(),
            created_utc: now,
            updated_utc: now,
        };
        self.working.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<Subscription, StoreError> {
        if subscription.is_active()
            && self.working.active_conflict(
                &subscription.user_uuid,
                subscription.sku_type,
                Some(subscription.subscription_id),
            )
        {
            return Err(StoreError::UniqueViolation(ACTIVE_LINEAGE_CONSTRAINT.to_string()));
        }

        let stored = self
            .working
            .subscriptions
            .iter_mut()
            .find(|s| s.subscription_id == subscription.subscription_id)
            .ok_or_else(|| {
                anyhow::anyhow!("subscription {} does not exist", subscription.subscription_id)
            })?;
        *stored = Subscription {
            updated_utc: Utc::now(),
            ..subscription.clone()
        };
        Ok(stored.clone())
    }

    async fn insert_bill(
        &mut self,
        input: &NewSubscriptionBill,
    ) -> Result<SubscriptionBill, StoreError> {
        let bill = SubscriptionBill {
            bill_id: self.working.next_id(),
            subscription_id: input.subscription_id,
            event_uuid: input.event_uuid,
            user_uuid: input.user_uuid.clone(),
            sku_type: input.sku_type,
            amount_paid: input.amount_paid,
            status: input.status,
            reason: input.reason,
            period_start: input.period_start,
            period_end: input.period_end,
            price_id: input.price_id,
            resource_id: input.resource_id.clone(),
            discount: input.discount,
            created_utc: Utc::now(),
        };
        self.working.bills.push(bill.clone());
        Ok(bill)
    }

    async fn commit(self) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = self;
        *guard = working;
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> Result<MemoryTx, StoreError> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = (*guard).clone();
        Ok(MemoryTx { guard, working })
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .subscriptions
            .iter()
            .find(|s| s.subscription_id == subscription_id)
            .cloned())
    }

    async fn latest_subscription(
        &self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.state.lock().await.latest_subscription(user_uuid, sku_type))
    }

    async fn list_due_renewals(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, i64)>,
        limit: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        let state = self.state.lock().await;
        let mut due: Vec<Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| s.is_active() && s.current_period_end <= now)
            .filter(|s| after.is_none_or(|key| (s.current_period_end, s.subscription_id) > key))
            .cloned()
            .collect();
        due.sort_by_key(|s| (s.current_period_end, s.subscription_id));
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn list_subscriptions(
        &self,
        filter: &ListSubscriptionsFilter,
    ) -> Result<SubscriptionListResult, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&Subscription> = state
            .subscriptions
            .iter()
            .filter(|s| {
                filter.user_uuid.as_deref().is_none_or(|u| s.user_uuid == u)
                    && filter.sku_type.is_none_or(|t| s.sku_type == t)
                    && filter.status.is_none_or(|st| s.status == st)
                    && within(s.started_utc, filter.started_from, filter.started_to)
            })
            .collect();
        matching.sort_by(|a, b| b.subscription_id.cmp(&a.subscription_id));

        let (offset, limit) = page_bounds(filter.page, filter.per_page);
        Ok(SubscriptionListResult {
            total: matching.len() as i64,
            paid_total_amount: matching.iter().map(|s| s.amount_paid_total).sum(),
            paid_total_count: matching.iter().map(|s| s.amount_paid_count).sum(),
            items: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        })
    }

    async fn list_bills(&self, filter: &ListBillsFilter) -> Result<BillListResult, StoreError> {
        let state = self.state.lock().await;
        let mut matching: Vec<&SubscriptionBill> = state
            .bills
            .iter()
            .filter(|b| {
                filter.user_uuid.as_deref().is_none_or(|u| b.user_uuid == u)
                    && filter.subscription_id.is_none_or(|id| b.subscription_id == id)
                    && filter.sku_type.is_none_or(|t| b.sku_type == t)
                    && filter.status.is_none_or(|st| b.status == st)
                    && within(b.created_utc, filter.created_from, filter.created_to)
            })
            .collect();
        matching.sort_by(|a, b| b.bill_id.cmp(&a.bill_id));

        let (offset, limit) = page_bounds(filter.page, filter.per_page);
        Ok(BillListResult {
            total: matching.len() as i64,
            total_amount: matching.iter().map(|b| b.amount_paid).sum(),
            items: matching
                .into_iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect(),
        })
    }

    async fn get_balance(&self, user_uuid: &str) -> Result<Option<UserBalance>, StoreError> {
        Ok(self.state.lock().await.balances.get(user_uuid).cloned())
    }

    async fn get_statement_by_event(
        &self,
        event_uuid: Uuid,
    ) -> Result<Option<Statement>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .statements
            .iter()
            .find(|s| s.event_uuid == event_uuid)
            .cloned())
    }
}
