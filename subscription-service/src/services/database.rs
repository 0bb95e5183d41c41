//! PostgreSQL store for subscription-service.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    BalanceField, BillListResult, ListBillsFilter, ListSubscriptionsFilter, NewStatement,
    NewSubscription, NewSubscriptionBill, Price, SkuKind, SkuUnitType, Statement, Subscription,
    SubscriptionBill, SubscriptionListResult, UserBalance,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{SubscriptionStore, UnitOfWork};

fn store_err(context: &str, e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
            StoreError::UniqueViolation(db_err.constraint().unwrap_or_default().to_string())
        }
        e => StoreError::Backend(anyhow::anyhow!("Failed to {}: {}", context, e)),
    }
}

fn page_window(page: i64, per_page: i64) -> (i64, i64) {
    let limit = per_page.clamp(1, 100);
    ((page.max(1) - 1) * limit, limit)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "subscription-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

/// Unit of work over one PostgreSQL transaction. Dropping it rolls back.
pub struct PgUnitOfWork {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    #[instrument(skip(self), fields(sku_type = sku_type, resource_id = %resource_id, unit_type = %unit_type))]
    async fn find_latest_price(
        &mut self,
        sku_type: i32,
        resource_id: &str,
        unit_type: SkuUnitType,
    ) -> Result<Option<Price>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_latest_price"])
            .start_timer();

        let price = sqlx::query_as::<_, Price>(
            r#"
            SELECT price_id, sku_type, sku_kind, amount, unit_type, unit_count, resource_id, currency, discount, created_utc
            FROM prices
            WHERE sku_type = $1 AND resource_id = $2 AND unit_type = $3 AND sku_kind = $4
            ORDER BY created_utc DESC, price_id DESC
            LIMIT 1
            "#,
        )
        .bind(sku_type)
        .bind(resource_id)
        .bind(unit_type.as_str())
        .bind(SkuKind::TimeSpan.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_err("find latest price", e))?;

        timer.observe_duration();

        Ok(price)
    }

    async fn get_price(&mut self, price_id: i64) -> Result<Option<Price>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_price"])
            .start_timer();

        let price = sqlx::query_as::<_, Price>(
            r#"
            SELECT price_id, sku_type, sku_kind, amount, unit_type, unit_count, resource_id, currency, discount, created_utc
            FROM prices
            WHERE price_id = $1
            "#,
        )
        .bind(price_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_err("get price", e))?;

        timer.observe_duration();

        Ok(price)
    }

    async fn lock_balance_for_update(
        &mut self,
        user_uuid: &str,
    ) -> Result<Option<UserBalance>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_balance"])
            .start_timer();

        let balance = sqlx::query_as::<_, UserBalance>(
            r#"
            SELECT user_uuid, credit_balance, cash_balance, updated_utc
            FROM user_balances
            WHERE user_uuid = $1
            FOR UPDATE
            "#,
        )
        .bind(user_uuid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_err("lock balance", e))?;

        timer.observe_duration();

        Ok(balance)
    }

    async fn create_balance(&mut self, user_uuid: &str) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO user_balances (user_uuid)
            VALUES ($1)
            ON CONFLICT (user_uuid) DO NOTHING
            "#,
        )
        .bind(user_uuid)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| store_err("create balance", e))?;

        Ok(())
    }

    async fn apply_balance_delta(
        &mut self,
        user_uuid: &str,
        field: BalanceField,
        delta: Decimal,
    ) -> Result<UserBalance, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["apply_balance_delta"])
            .start_timer();

        let sql = match field {
            BalanceField::Cash => {
                r#"
                UPDATE user_balances
                SET cash_balance = cash_balance + $2, updated_utc = NOW()
                WHERE user_uuid = $1
                RETURNING user_uuid, credit_balance, cash_balance, updated_utc
                "#
            }
            BalanceField::Credit => {
                r#"
                UPDATE user_balances
                SET credit_balance = credit_balance + $2, updated_utc = NOW()
                WHERE user_uuid = $1
                RETURNING user_uuid, credit_balance, cash_balance, updated_utc
                "#
            }
        };

        let balance = sqlx::query_as::<_, UserBalance>(sql)
            .bind(user_uuid)
            .bind(delta)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| store_err("apply balance delta", e))?;

        timer.observe_duration();

        Ok(balance)
    }

    async fn find_statement_by_event(
        &mut self,
        event_uuid: Uuid,
    ) -> Result<Option<Statement>, StoreError> {
        sqlx::query_as::<_, Statement>(
            r#"
            SELECT statement_id, event_uuid, user_uuid, value, scene, op_uid, customer_id, resource_id, price_id,
                   unit_price, currency, discount, cash_value, credit_value, cash_balance_after, credit_balance_after, recorded_utc
            FROM statements
            WHERE event_uuid = $1
            "#,
        )
        .bind(event_uuid)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_err("check duplicated event", e))
    }

    #[instrument(skip(self, input), fields(event_uuid = %input.event_uuid, user_uuid = %input.user_uuid))]
    async fn insert_statement(&mut self, input: &NewStatement) -> Result<Statement, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_statement"])
            .start_timer();

        let statement = sqlx::query_as::<_, Statement>(
            r#"
            INSERT INTO statements (event_uuid, user_uuid, value, scene, op_uid, customer_id, resource_id, price_id,
                                    unit_price, currency, discount, cash_value, credit_value, cash_balance_after,
                                    credit_balance_after, recorded_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING statement_id, event_uuid, user_uuid, value, scene, op_uid, customer_id, resource_id, price_id,
                      unit_price, currency, discount, cash_value, credit_value, cash_balance_after, credit_balance_after, recorded_utc
            "#,
        )
        .bind(input.event_uuid)
        .bind(&input.user_uuid)
        .bind(input.value)
        .bind(input.meta.scene.as_str())
        .bind(&input.meta.op_uid)
        .bind(&input.meta.customer_id)
        .bind(&input.meta.resource_id)
        .bind(input.meta.price_id)
        .bind(input.meta.unit_price)
        .bind(&input.meta.currency)
        .bind(input.meta.discount)
        .bind(input.cash_value)
        .bind(input.credit_value)
        .bind(input.cash_balance_after)
        .bind(input.credit_balance_after)
        .bind(input.recorded_utc)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| store_err("insert statement", e))?;

        timer.observe_duration();

        Ok(statement)
    }

    async fn latest_subscription(
        &mut self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Option<Subscription>, StoreError> {
        sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                   last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                   next_price_id, next_resource_id, created_utc, updated_utc
            FROM subscriptions
            WHERE user_uuid = $1 AND sku_type = $2
            ORDER BY subscription_id DESC
            LIMIT 1
            "#,
        )
        .bind(user_uuid)
        .bind(sku_type)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_err("get latest subscription", e))
    }

    async fn lock_subscription_for_update(
        &mut self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["lock_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                   last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                   next_price_id, next_resource_id, created_utc, updated_utc
            FROM subscriptions
            WHERE subscription_id = $1
            FOR UPDATE
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| store_err("lock subscription", e))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, input), fields(user_uuid = %input.user_uuid, sku_type = input.sku_type))]
    async fn insert_subscription(
        &mut self,
        input: &NewSubscription,
    ) -> Result<Subscription, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            INSERT INTO subscriptions (user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc,
                                       current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                                       next_price_id, next_resource_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                      last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                      next_price_id, next_resource_id, created_utc, updated_utc
            "#,
        )
        .bind(&input.user_uuid)
        .bind(input.sku_type)
        .bind(input.price_id)
        .bind(&input.resource_id)
        .bind(input.status.as_str())
        .bind(&input.action_user)
        .bind(input.started_utc)
        .bind(input.current_period_start)
        .bind(input.current_period_end)
        .bind(input.amount_paid_total)
        .bind(input.amount_paid_count)
        .bind(input.next_price_id)
        .bind(&input.next_resource_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| store_err("insert subscription", e))?;

        timer.observe_duration();

        Ok(subscription)
    }

    #[instrument(skip(self, subscription), fields(subscription_id = subscription.subscription_id))]
    async fn update_subscription(
        &mut self,
        subscription: &Subscription,
    ) -> Result<Subscription, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_subscription"])
            .start_timer();

        let updated = sqlx::query_as::<_, Subscription>(
            r#"
            UPDATE subscriptions
            SET price_id = $2, resource_id = $3, status = $4, action_user = $5, ended_utc = $6, last_bill_id = $7,
                current_period_start = $8, current_period_end = $9, amount_paid_total = $10, amount_paid_count = $11,
                next_price_id = $12, next_resource_id = $13, updated_utc = NOW()
            WHERE subscription_id = $1
            RETURNING subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                      last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                      next_price_id, next_resource_id, created_utc, updated_utc
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(subscription.price_id)
        .bind(&subscription.resource_id)
        .bind(subscription.status.as_str())
        .bind(&subscription.action_user)
        .bind(subscription.ended_utc)
        .bind(subscription.last_bill_id)
        .bind(subscription.current_period_start)
        .bind(subscription.current_period_end)
        .bind(subscription.amount_paid_total)
        .bind(subscription.amount_paid_count)
        .bind(subscription.next_price_id)
        .bind(&subscription.next_resource_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| store_err("update subscription", e))?;

        timer.observe_duration();

        Ok(updated)
    }

    #[instrument(skip(self, input), fields(subscription_id = input.subscription_id, reason = %input.reason))]
    async fn insert_bill(
        &mut self,
        input: &NewSubscriptionBill,
    ) -> Result<SubscriptionBill, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_bill"])
            .start_timer();

        let bill = sqlx::query_as::<_, SubscriptionBill>(
            r#"
            INSERT INTO subscription_bills (subscription_id, event_uuid, user_uuid, sku_type, amount_paid, status, reason,
                                            period_start, period_end, price_id, resource_id, discount)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING bill_id, subscription_id, event_uuid, user_uuid, sku_type, amount_paid, status, reason,
                      period_start, period_end, price_id, resource_id, discount, created_utc
            "#,
        )
        .bind(input.subscription_id)
        .bind(input.event_uuid)
        .bind(&input.user_uuid)
        .bind(input.sku_type)
        .bind(input.amount_paid)
        .bind(input.status.as_str())
        .bind(input.reason.as_str())
        .bind(input.period_start)
        .bind(input.period_end)
        .bind(input.price_id)
        .bind(&input.resource_id)
        .bind(input.discount)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| store_err("insert bill", e))?;

        timer.observe_duration();

        Ok(bill)
    }

    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| store_err("commit transaction", e))
    }
}

#[async_trait]
impl SubscriptionStore for Database {
    type Tx = PgUnitOfWork;

    async fn begin(&self) -> Result<PgUnitOfWork, StoreError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| store_err("begin transaction", e))?;
        Ok(PgUnitOfWork { tx })
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| store_err("run health check", e))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<Option<Subscription>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_subscription"])
            .start_timer();

        let subscription = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                   last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                   next_price_id, next_resource_id, created_utc, updated_utc
            FROM subscriptions
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("get subscription", e))?;

        timer.observe_duration();

        Ok(subscription)
    }

    async fn latest_subscription(
        &self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Option<Subscription>, StoreError> {
        let mut tx = self.begin().await?;
        let subscription = tx.latest_subscription(user_uuid, sku_type).await?;
        tx.commit().await?;
        Ok(subscription)
    }

    #[instrument(skip(self))]
    async fn list_due_renewals(
        &self,
        now: DateTime<Utc>,
        after: Option<(DateTime<Utc>, i64)>,
        limit: i64,
    ) -> Result<Vec<Subscription>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_due_renewals"])
            .start_timer();

        let due = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                   last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                   next_price_id, next_resource_id, created_utc, updated_utc
            FROM subscriptions
            WHERE status = 'active' AND current_period_end <= $1
              AND ($2::timestamptz IS NULL OR (current_period_end, subscription_id) > ($2, $3))
            ORDER BY current_period_end, subscription_id
            LIMIT $4
            "#,
        )
        .bind(now)
        .bind(after.map(|(end, _)| end))
        .bind(after.map(|(_, id)| id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list due renewals", e))?;

        timer.observe_duration();

        Ok(due)
    }

    #[instrument(skip(self, filter))]
    async fn list_subscriptions(
        &self,
        filter: &ListSubscriptionsFilter,
    ) -> Result<SubscriptionListResult, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_subscriptions"])
            .start_timer();

        let (offset, limit) = page_window(filter.page, filter.per_page);
        let status = filter.status.map(|s| s.as_str());

        let (total, paid_total_amount, paid_total_count) =
            sqlx::query_as::<_, (i64, Decimal, i64)>(
                r#"
                SELECT COUNT(*), COALESCE(SUM(amount_paid_total), 0), COALESCE(SUM(amount_paid_count), 0)::BIGINT
                FROM subscriptions
                WHERE ($1::varchar IS NULL OR user_uuid = $1)
                  AND ($2::integer IS NULL OR sku_type = $2)
                  AND ($3::varchar IS NULL OR status = $3)
                  AND ($4::timestamptz IS NULL OR started_utc >= $4)
                  AND ($5::timestamptz IS NULL OR started_utc <= $5)
                "#,
            )
            .bind(filter.user_uuid.as_deref())
            .bind(filter.sku_type)
            .bind(status)
            .bind(filter.started_from)
            .bind(filter.started_to)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| store_err("count subscriptions", e))?;

        let items = sqlx::query_as::<_, Subscription>(
            r#"
            SELECT subscription_id, user_uuid, sku_type, price_id, resource_id, status, action_user, started_utc, ended_utc,
                   last_bill_id, current_period_start, current_period_end, amount_paid_total, amount_paid_count,
                   next_price_id, next_resource_id, created_utc, updated_utc
            FROM subscriptions
            WHERE ($1::varchar IS NULL OR user_uuid = $1)
              AND ($2::integer IS NULL OR sku_type = $2)
              AND ($3::varchar IS NULL OR status = $3)
              AND ($4::timestamptz IS NULL OR started_utc >= $4)
              AND ($5::timestamptz IS NULL OR started_utc <= $5)
            ORDER BY subscription_id DESC
            OFFSET $6
            LIMIT $7
            "#,
        )
        .bind(filter.user_uuid.as_deref())
        .bind(filter.sku_type)
        .bind(status)
        .bind(filter.started_from)
        .bind(filter.started_to)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list subscriptions", e))?;

        timer.observe_duration();

        Ok(SubscriptionListResult {
            items,
            total,
            paid_total_amount,
            paid_total_count,
        })
    }

    #[instrument(skip(self, filter))]
    async fn list_bills(&self, filter: &ListBillsFilter) -> Result<BillListResult, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_bills"])
            .start_timer();

        let (offset, limit) = page_window(filter.page, filter.per_page);
        let status = filter.status.map(|s| s.as_str());

        let (total, total_amount) = sqlx::query_as::<_, (i64, Decimal)>(
            r#"
            SELECT COUNT(*), COALESCE(SUM(amount_paid), 0)
            FROM subscription_bills
            WHERE ($1::varchar IS NULL OR user_uuid = $1)
              AND ($2::bigint IS NULL OR subscription_id = $2)
              AND ($3::integer IS NULL OR sku_type = $3)
              AND ($4::varchar IS NULL OR status = $4)
              AND ($5::timestamptz IS NULL OR created_utc >= $5)
              AND ($6::timestamptz IS NULL OR created_utc <= $6)
            "#,
        )
        .bind(filter.user_uuid.as_deref())
        .bind(filter.subscription_id)
        .bind(filter.sku_type)
        .bind(status)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| store_err("count bills", e))?;

        let items = sqlx::query_as::<_, SubscriptionBill>(
            r#"
            SELECT bill_id, subscription_id, event_uuid, user_uuid, sku_type, amount_paid, status, reason,
                   period_start, period_end, price_id, resource_id, discount, created_utc
            FROM subscription_bills
            WHERE ($1::varchar IS NULL OR user_uuid = $1)
              AND ($2::bigint IS NULL OR subscription_id = $2)
              AND ($3::integer IS NULL OR sku_type = $3)
              AND ($4::varchar IS NULL OR status = $4)
              AND ($5::timestamptz IS NULL OR created_utc >= $5)
              AND ($6::timestamptz IS NULL OR created_utc <= $6)
            ORDER BY bill_id DESC
            OFFSET $7
            LIMIT $8
            "#,
        )
        .bind(filter.user_uuid.as_deref())
        .bind(filter.subscription_id)
        .bind(filter.sku_type)
        .bind(status)
        .bind(filter.created_from)
        .bind(filter.created_to)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| store_err("list bills", e))?;

        timer.observe_duration();

        Ok(BillListResult {
            items,
            total,
            total_amount,
        })
    }

    async fn get_balance(&self, user_uuid: &str) -> Result<Option<UserBalance>, StoreError> {
        sqlx::query_as::<_, UserBalance>(
            r#"
            SELECT user_uuid, credit_balance, cash_balance, updated_utc
            FROM user_balances
            WHERE user_uuid = $1
            "#,
        )
        .bind(user_uuid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| store_err("get balance", e))
    }

    async fn get_statement_by_event(
        &self,
        event_uuid: Uuid,
    ) -> Result<Option<Statement>, StoreError> {
        let mut tx = self.begin().await?;
        let statement = tx.find_statement_by_event(event_uuid).await?;
        tx.commit().await?;
        Ok(statement)
    }
}
