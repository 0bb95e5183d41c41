//! Storage seams used by the subscription core.
//!
//! A [`SubscriptionStore`] hands out units of work. Every lifecycle
//! transition runs inside exactly one [`UnitOfWork`]: its reads and writes
//! become visible together on [`UnitOfWork::commit`], and dropping it without
//! committing discards all of them.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BalanceField, BillListResult, ListBillsFilter, ListSubscriptionsFilter, NewStatement,
    NewSubscription, NewSubscriptionBill, Price, SkuUnitType, Statement, Subscription,
    SubscriptionBill, SubscriptionListResult, UserBalance,
};

#[async_trait]
pub trait UnitOfWork: Send + Sized {
    /// Latest time-span price for the SKU type, resource and unit.
    async fn find_latest_price(
        &mut self,
        sku_type: i32,
        resource_id: &str,
        unit_type: SkuUnitType,
    ) -> Result<Option<Price>, StoreError>;

    async fn get_price(&mut self, price_id: i64) -> Result<Option<Price>, StoreError>;

    /// Read the balance row and hold an exclusive lock on it until the unit
    /// of work ends.
    async fn lock_balance_for_update(
        &mut self,
        user_uuid: &str,
    ) -> Result<Option<UserBalance>, StoreError>;

    /// Create a zero balance row. Does nothing when the row exists.
    async fn create_balance(&mut self, user_uuid: &str) -> Result<(), StoreError>;

    /// Add `delta` to one balance column and return the updated row.
    async fn apply_balance_delta(
        &mut self,
        user_uuid: &str,
        field: BalanceField,
        delta: Decimal,
    ) -> Result<UserBalance, StoreError>;

    async fn find_statement_by_event(
        &mut self,
        event_uuid: Uuid,
    ) -> Result<Option<Statement>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the event was recorded.
    async fn insert_statement(&mut self, statement: &NewStatement) -> Result<Statement, StoreError>;

    /// Most recent subscription of the (user, SKU type) lineage.
    async fn latest_subscription(
        &mut self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Re-read a subscription and hold an exclusive lock on it until the
    /// unit of work ends.
    async fn lock_subscription_for_update(
        &mut self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Fails with [`StoreError::UniqueViolation`] when the lineage already
    /// has an active subscription.
    async fn insert_subscription(
        &mut self,
        subscription: &NewSubscription,
    ) -> Result<Subscription, StoreError>;

    /// Persist every mutable field of `subscription` in one write.
    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<Subscription, StoreError>;

    async fn insert_bill(&mut self, bill: &NewSubscriptionBill)
        -> Result<SubscriptionBill, StoreError>;

    async fn commit(self) -> Result<(), StoreError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync + 'static {
    type Tx: UnitOfWork;

    async fn begin(&self) -> Result<Self::Tx, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;

    async fn get_subscription(&self, subscription_id: i64)
        -> Result<Option<Subscription>, StoreError>;

    async fn latest_subscription(
        &self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Active subscriptions whose current period ended at or before `now`,
    /// ordered by `(current_period_end, subscription_id)`. When `after` is
    /// set only rows strictly past that key are returned.
    async fn list_due_renewals(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, i64)>,
        limit: i64,
    ) -> Result<Vec<Subscription>, StoreError>;

    async fn list_subscriptions(
        &self,
        filter: &ListSubscriptionsFilter,
    ) -> Result<SubscriptionListResult, StoreError>;

    async fn list_bills(&self, filter: &ListBillsFilter) -> Result<BillListResult, StoreError>;

    async fn get_balance(&self, user_uuid: &str) -> Result<Option<UserBalance>, StoreError>;

    async fn get_statement_by_event(
        &self,
        event_uuid: Uuid,
    ) -> Result<Option<Statement>, StoreError>;
}
