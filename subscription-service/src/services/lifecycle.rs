//! Subscription lifecycle: create, price change, renewal and cancellation.
//!
//! Each public operation runs in one unit of work. The subscription's next
//! state is assembled with [`SubscriptionDraft`] and written once, after the
//! charge and the bill. Methods ending in `_at` take the clock as an argument;
//! the plain variants use the current time.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::{PersistContext, StoreError, SubscriptionError};
use crate::models::{
    BillListResult, BillReason, BillStatus, ListBillsFilter, ListSubscriptionsFilter,
    NewSubscription, NewSubscriptionBill, Price, StatementMeta, Subscription, SubscriptionBill,
    SubscriptionDraft, SubscriptionListResult, SubscriptionRequest, SubscriptionStatus,
    Transition, UserBalance,
};
use crate::services::ledger::{Charge, Deduction, LedgerRecorder};
use crate::services::metrics;
use crate::services::period::{month_diff, period_end};
use crate::services::proration::{fee_gap, BillingPeriod};
use crate::services::store::{SubscriptionStore, UnitOfWork};

/// Actor recorded on transitions the service makes by itself.
pub const SYSTEM_ACTOR: &str = "system";

/// Result of renewing one subscription.
#[derive(Debug, Clone)]
pub enum RenewOutcome {
    Renewed(Subscription),
    /// The renewal could not be paid for and the subscription was closed.
    Canceled {
        subscription: Subscription,
        reason: BillReason,
    },
    /// The subscription was no longer active or no longer due.
    Skipped,
}

/// Counts from one renewal sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenewalReport {
    pub renewed: u32,
    pub canceled_lost_price: u32,
    pub canceled_insufficient_balance: u32,
    pub skipped: u32,
    pub failed: u32,
}

impl RenewalReport {
    pub fn processed(&self) -> u32 {
        self.renewed
            + self.canceled_lost_price
            + self.canceled_insufficient_balance
            + self.skipped
            + self.failed
    }
}

fn debit(amount: Decimal) -> Decimal {
    if amount.is_zero() {
        Decimal::ZERO
    } else {
        -amount
    }
}

fn next_status(
    current: &Subscription,
    transition: Transition,
) -> Result<SubscriptionStatus, SubscriptionError> {
    current
        .status
        .apply(transition)
        .ok_or(SubscriptionError::InvalidTransition {
            subscription_id: current.subscription_id,
            status: current.status,
            transition,
        })
}

/// Bill skeleton for `subscription`: paid, zero amount, current price and period.
fn bill_for(subscription: &Subscription, event_uuid: Uuid, reason: BillReason) -> NewSubscriptionBill {
    NewSubscriptionBill {
        subscription_id: subscription.subscription_id,
        event_uuid,
        user_uuid: subscription.user_uuid.clone(),
        sku_type: subscription.sku_type,
        amount_paid: Decimal::ZERO,
        status: BillStatus::Paid,
        reason,
        period_start: subscription.current_period_start,
        period_end: subscription.current_period_end,
        price_id: subscription.price_id,
        resource_id: subscription.resource_id.clone(),
        discount: Decimal::ZERO,
    }
}

fn observe<T>(operation: &str, result: &Result<T, SubscriptionError>) {
    match result {
        Ok(_) => metrics::record_operation(operation, "ok"),
        Err(e) => {
            metrics::record_operation(operation, "error");
            metrics::record_error(e.kind());
        }
    }
}

pub struct SubscriptionManager<S: SubscriptionStore> {
    store: Arc<S>,
    ledger: LedgerRecorder<S>,
}

impl<S: SubscriptionStore> Clone for SubscriptionManager<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            ledger: self.ledger.clone(),
        }
    }
}

impl<S: SubscriptionStore> SubscriptionManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            ledger: LedgerRecorder::new(Arc::clone(&store)),
            store,
        }
    }

    pub fn ledger(&self) -> &LedgerRecorder<S> {
        &self.ledger
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    // -------------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------------

    pub async fn create_subscription(
        &self,
        request: SubscriptionRequest,
    ) -> Result<Subscription, SubscriptionError> {
        self.create_subscription_at(request, Utc::now()).await
    }

    /// Start a subscription for the requested resource.
    ///
    /// A lineage whose last period is still open is reused through a price
    /// change instead of starting a new row.
    #[instrument(
        skip(self, request),
        fields(user_uuid = %request.user_uuid, sku_type = request.sku_type, resource_id = %request.resource_id)
    )]
    pub async fn create_subscription_at(
        &self,
        request: SubscriptionRequest,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let result = self.create(&request, now).await;
        observe("create", &result);
        result
    }

    async fn create(
        &self,
        request: &SubscriptionRequest,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut tx = self.begin().await?;

        let latest = tx
            .latest_subscription(&request.user_uuid, request.sku_type)
            .await
            .persist_ctx(|| {
                format!(
                    "get subscription of user {} sku type {}",
                    request.user_uuid, request.sku_type
                )
            })?;
        if latest.as_ref().is_some_and(Subscription::is_active) {
            return Err(SubscriptionError::SubscriptionExists {
                user_uuid: request.user_uuid.clone(),
                sku_type: request.sku_type,
            });
        }

        let price = self.resolve_price(&mut tx, request).await?;

        let subscription = match latest {
            Some(prior) if prior.period_open_at(now) => {
                let prior = self.lock_subscription(&mut tx, prior.subscription_id).await?;
                if prior.is_active() {
                    return Err(SubscriptionError::SubscriptionExists {
                        user_uuid: request.user_uuid.clone(),
                        sku_type: request.sku_type,
                    });
                }
                info!(
                    subscription_id = prior.subscription_id,
                    "Reusing subscription with an open period"
                );
                self.change_price(
                    &mut tx,
                    prior,
                    &price,
                    Transition::Reactivate,
                    &request.action_user,
                    request.event_uuid,
                    now,
                )
                .await?
            }
            _ => self.start_subscription(&mut tx, &price, request, now).await?,
        };

        self.commit(tx, subscription.subscription_id).await?;
        Ok(subscription)
    }

    async fn start_subscription(
        &self,
        tx: &mut S::Tx,
        price: &Price,
        request: &SubscriptionRequest,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let end = period_end(now, price, now, 0)?;

        self.ledger
            .ensure_available(tx, &request.user_uuid, price.amount)
            .await?;
        self.ledger
            .charge(
                tx,
                Charge {
                    event_uuid: request.event_uuid,
                    user_uuid: request.user_uuid.clone(),
                    amount: debit(price.amount),
                    deduction: Deduction::CashFirst,
                    meta: StatementMeta::for_price(price, &request.action_user),
                    at: now,
                },
            )
            .await?;

        let new_subscription = NewSubscription {
            user_uuid: request.user_uuid.clone(),
            sku_type: request.sku_type,
            price_id: price.price_id,
            resource_id: price.resource_id.clone(),
            status: SubscriptionStatus::Active,
            action_user: request.action_user.clone(),
            started_utc: now,
            current_period_start: now,
            current_period_end: end,
            amount_paid_total: price.amount,
            amount_paid_count: 1,
            next_price_id: price.price_id,
            next_resource_id: price.resource_id.clone(),
        };
        let inserted = match tx.insert_subscription(&new_subscription).await {
            Ok(subscription) => subscription,
            Err(StoreError::UniqueViolation(_)) => {
                return Err(SubscriptionError::SubscriptionExists {
                    user_uuid: request.user_uuid.clone(),
                    sku_type: request.sku_type,
                });
            }
            Err(e) => {
                return Err(e).persist_ctx(|| {
                    format!(
                        "insert subscription for user {} price {}",
                        request.user_uuid, price.price_id
                    )
                });
            }
        };

        let bill = self
            .write_bill(
                tx,
                NewSubscriptionBill {
                    amount_paid: price.amount,
                    discount: price.discount,
                    ..bill_for(&inserted, request.event_uuid, BillReason::Create)
                },
            )
            .await?;

        let subscription = SubscriptionDraft::from_current(&inserted)
            .billed(&bill)
            .build();
        let subscription = self.save(tx, &subscription).await?;

        info!(
            subscription_id = subscription.subscription_id,
            price_id = price.price_id,
            amount = %price.amount,
            period_end = %subscription.current_period_end,
            "Subscription created"
        );

        Ok(subscription)
    }

    // -------------------------------------------------------------------------
    // Price change
    // -------------------------------------------------------------------------

    pub async fn update_subscription_resource(
        &self,
        request: SubscriptionRequest,
    ) -> Result<Subscription, SubscriptionError> {
        self.update_subscription_resource_at(request, Utc::now()).await
    }

    /// Move a lineage to another resource of the same SKU type.
    ///
    /// Active subscriptions change price in place. A canceled subscription
    /// is brought back while its period is open. Once that period has ended
    /// the lineage starts over with a new subscription charged in full.
    #[instrument(
        skip(self, request),
        fields(user_uuid = %request.user_uuid, sku_type = request.sku_type, resource_id = %request.resource_id)
    )]
    pub async fn update_subscription_resource_at(
        &self,
        request: SubscriptionRequest,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let result = self.update_resource(&request, now).await;
        observe("update_resource", &result);
        result
    }

    async fn update_resource(
        &self,
        request: &SubscriptionRequest,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut tx = self.begin().await?;
        let current = self
            .lock_lineage(&mut tx, &request.user_uuid, request.sku_type)
            .await?;
        let price = self.resolve_price(&mut tx, request).await?;

        if current.is_active()
            && (current.next_price_id == price.price_id
                || current.next_resource_id == price.resource_id)
        {
            warn!(
                subscription_id = current.subscription_id,
                next_price_id = current.next_price_id,
                "Requested resource is already scheduled, nothing to update"
            );
            return Ok(current);
        }

        if !current.is_active() && !current.period_open_at(now) {
            info!(
                subscription_id = current.subscription_id,
                period_end = %current.current_period_end,
                "Canceled period has ended, starting a new subscription"
            );
            let subscription = self.start_subscription(&mut tx, &price, request, now).await?;
            self.commit(tx, subscription.subscription_id).await?;
            return Ok(subscription);
        }

        let transition = if current.is_active() {
            Transition::ChangePrice
        } else {
            Transition::Reactivate
        };
        let subscription = self
            .change_price(
                &mut tx,
                current,
                &price,
                transition,
                &request.action_user,
                request.event_uuid,
                now,
            )
            .await?;

        self.commit(tx, subscription.subscription_id).await?;
        Ok(subscription)
    }

    /// Switch `current` to `post` mid-period.
    ///
    /// Upgrades charge the prorated gap and take effect now. Downgrades
    /// charge nothing and only schedule `post` for the next renewal. Both
    /// write a bill.
    #[allow(clippy::too_many_arguments)]
    async fn change_price(
        &self,
        tx: &mut S::Tx,
        current: Subscription,
        post: &Price,
        transition: Transition,
        action_user: &str,
        event_uuid: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let status = next_status(&current, transition)?;

        let pre = tx
            .get_price(current.price_id)
            .await
            .persist_ctx(|| format!("get price {}", current.price_id))?
            .ok_or_else(|| {
                SubscriptionError::PriceNotFound(format!(
                    "price {} of subscription {}",
                    current.price_id, current.subscription_id
                ))
            })?;

        let period = BillingPeriod::new(current.current_period_start, current.current_period_end);
        let gap = fee_gap(&pre, post, now, period)?;
        let upgrade_now = gap > Decimal::ZERO;

        if upgrade_now {
            self.ledger
                .ensure_available(tx, &current.user_uuid, gap)
                .await?;
        }
        self.ledger
            .charge(
                tx,
                Charge {
                    event_uuid,
                    user_uuid: current.user_uuid.clone(),
                    amount: debit(gap),
                    deduction: Deduction::CashFirst,
                    meta: StatementMeta::for_price(post, action_user),
                    at: now,
                },
            )
            .await?;

        let month_offset = month_diff(current.started_utc, current.current_period_start);
        let end = period_end(
            current.current_period_start,
            post,
            current.started_utc,
            month_offset,
        )?;
        let reason = if upgrade_now || post.amount >= pre.amount {
            BillReason::Upgrade
        } else {
            BillReason::Downgrade
        };

        let bill = self
            .write_bill(
                tx,
                NewSubscriptionBill {
                    amount_paid: gap,
                    period_end: end,
                    price_id: post.price_id,
                    resource_id: post.resource_id.clone(),
                    discount: post.discount,
                    ..bill_for(&current, event_uuid, reason)
                },
            )
            .await?;

        let mut draft = SubscriptionDraft::from_current(&current)
            .status(status)
            .action_user(action_user)
            .ended(None)
            .next_price(post)
            .paid(gap);
        if upgrade_now {
            draft = draft.current_price(post).billed(&bill);
        }
        let subscription = self.save(tx, &draft.build()).await?;

        info!(
            subscription_id = subscription.subscription_id,
            from_price_id = pre.price_id,
            to_price_id = post.price_id,
            fee_gap = %gap,
            reason = %reason,
            "Subscription price changed"
        );

        Ok(subscription)
    }

    // -------------------------------------------------------------------------
    // Cancel
    // -------------------------------------------------------------------------

    pub async fn cancel_subscription(
        &self,
        user_uuid: &str,
        sku_type: i32,
        action_user: &str,
    ) -> Result<Subscription, SubscriptionError> {
        self.cancel_subscription_at(user_uuid, sku_type, action_user, Utc::now())
            .await
    }

    /// Close the active subscription of a lineage. The paid period is kept,
    /// so the lineage can be brought back until it ends. Closing a lineage
    /// that is not active changes nothing.
    #[instrument(skip(self, action_user))]
    pub async fn cancel_subscription_at(
        &self,
        user_uuid: &str,
        sku_type: i32,
        action_user: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let result = self.cancel(user_uuid, sku_type, action_user, now).await;
        observe("cancel", &result);
        result
    }

    async fn cancel(
        &self,
        user_uuid: &str,
        sku_type: i32,
        action_user: &str,
        now: DateTime<Utc>,
    ) -> Result<Subscription, SubscriptionError> {
        let mut tx = self.begin().await?;
        let current = self.lock_lineage(&mut tx, user_uuid, sku_type).await?;

        let Some(status) = current.status.apply(Transition::Cancel) else {
            warn!(
                subscription_id = current.subscription_id,
                status = %current.status,
                "Subscription is not active, nothing to cancel"
            );
            return Ok(current);
        };

        let draft = SubscriptionDraft::from_current(&current)
            .status(status)
            .action_user(action_user)
            .ended(Some(now))
            .build();
        let subscription = self.save(&mut tx, &draft).await?;
        self.commit(tx, subscription.subscription_id).await?;

        info!(subscription_id = subscription.subscription_id, "Subscription canceled");

        Ok(subscription)
    }

    // -------------------------------------------------------------------------
    // Renewal
    // -------------------------------------------------------------------------

    pub async fn renew_due_subscriptions(
        &self,
        batch_size: i64,
    ) -> Result<RenewalReport, SubscriptionError> {
        self.renew_due_subscriptions_at(Utc::now(), batch_size).await
    }

    /// Renew every active subscription whose period ended by `now`, paging
    /// through them `batch_size` rows at a time.
    ///
    /// One subscription failing never stops the sweep; it is logged and
    /// counted in the report. Each subscription is renewed at most once per
    /// sweep.
    #[instrument(skip(self))]
    pub async fn renew_due_subscriptions_at(
        &self,
        now: DateTime<Utc>,
        batch_size: i64,
    ) -> Result<RenewalReport, SubscriptionError> {
        let batch_size = batch_size.max(1);
        let mut report = RenewalReport::default();
        let mut after = None;
        let mut seen = HashSet::new();
        loop {
            let due = self
                .store
                .list_due_renewals(now, after, batch_size)
                .await
                .persist_ctx(|| format!("list subscriptions due at {}", now))?;
            let exhausted = (due.len() as i64) < batch_size;
            after = due
                .last()
                .map(|s| (s.current_period_end, s.subscription_id));

            for subscription in due {
                // A renewed row can sort past the cursor again while still overdue.
                if seen.insert(subscription.subscription_id) {
                    self.renew_listed(&subscription, now, &mut report).await;
                }
            }

            if exhausted {
                break;
            }
        }

        if report.processed() > 0 {
            info!(
                renewed = report.renewed,
                canceled_lost_price = report.canceled_lost_price,
                canceled_insufficient_balance = report.canceled_insufficient_balance,
                skipped = report.skipped,
                failed = report.failed,
                "Renewal sweep finished"
            );
        }

        Ok(report)
    }

    async fn renew_listed(
        &self,
        subscription: &Subscription,
        now: DateTime<Utc>,
        report: &mut RenewalReport,
    ) {
        let outcome = self
            .renew_subscription_at(subscription.subscription_id, Uuid::new_v4(), now)
            .await;
        let label = match outcome {
            Ok(RenewOutcome::Renewed(_)) => {
                report.renewed += 1;
                "renewed"
            }
            Ok(RenewOutcome::Canceled {
                reason: BillReason::LostPrice,
                ..
            }) => {
                report.canceled_lost_price += 1;
                "canceled_lost_price"
            }
            Ok(RenewOutcome::Canceled { .. }) => {
                report.canceled_insufficient_balance += 1;
                "canceled_balance_insufficient"
            }
            Ok(RenewOutcome::Skipped) => {
                report.skipped += 1;
                "skipped"
            }
            Err(e) => {
                error!(
                    subscription_id = subscription.subscription_id,
                    error = %e,
                    "Failed to renew subscription"
                );
                report.failed += 1;
                "failed"
            }
        };
        metrics::record_renewal(label);
    }

    /// Renew one subscription whose period has ended.
    ///
    /// A missing next price or a balance that cannot cover it closes the
    /// subscription with a failed bill; that is a successful outcome.
    #[instrument(skip(self))]
    pub async fn renew_subscription_at(
        &self,
        subscription_id: i64,
        event_uuid: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RenewOutcome, SubscriptionError> {
        let mut tx = self.begin().await?;
        let current = self.lock_subscription(&mut tx, subscription_id).await?;
        if !current.is_active() || current.period_open_at(now) {
            return Ok(RenewOutcome::Skipped);
        }

        let next = tx
            .get_price(current.next_price_id)
            .await
            .persist_ctx(|| format!("get price {}", current.next_price_id))?;
        let Some(next) = next else {
            warn!(
                subscription_id,
                next_price_id = current.next_price_id,
                "Next price no longer exists, canceling subscription"
            );
            return self
                .cancel_renewal(tx, current, BillReason::LostPrice, None, event_uuid, now)
                .await;
        };

        let funded = self
            .ledger
            .ensure_available(&mut tx, &current.user_uuid, next.amount)
            .await;
        match funded {
            Ok(_) => {}
            Err(SubscriptionError::InsufficientBalance {
                available,
                required,
            }) => {
                warn!(
                    subscription_id,
                    available = %available,
                    required = %required,
                    "Balance cannot cover renewal, canceling subscription"
                );
                return self
                    .cancel_renewal(
                        tx,
                        current,
                        BillReason::BalanceInsufficient,
                        Some(&next),
                        event_uuid,
                        now,
                    )
                    .await;
            }
            Err(e) => return Err(e),
        }

        let status = next_status(&current, Transition::Renew)?;
        let start = current.current_period_end;
        let end = period_end(
            start,
            &next,
            current.started_utc,
            month_diff(current.started_utc, start),
        )?;

        self.ledger
            .charge(
                &mut tx,
                Charge {
                    event_uuid,
                    user_uuid: current.user_uuid.clone(),
                    amount: debit(next.amount),
                    deduction: Deduction::CashFirst,
                    meta: StatementMeta::for_price(&next, SYSTEM_ACTOR),
                    at: now,
                },
            )
            .await?;

        let bill = self
            .write_bill(
                &mut tx,
                NewSubscriptionBill {
                    amount_paid: next.amount,
                    period_start: start,
                    period_end: end,
                    price_id: next.price_id,
                    resource_id: next.resource_id.clone(),
                    discount: next.discount,
                    ..bill_for(&current, event_uuid, BillReason::Cycle)
                },
            )
            .await?;

        let draft = SubscriptionDraft::from_current(&current)
            .status(status)
            .current_price(&next)
            .next_price(&next)
            .billed(&bill)
            .paid(next.amount)
            .build();
        let subscription = self.save(&mut tx, &draft).await?;
        self.commit(tx, subscription_id).await?;

        info!(
            subscription_id,
            price_id = next.price_id,
            amount = %next.amount,
            period_end = %subscription.current_period_end,
            "Subscription renewed"
        );

        Ok(RenewOutcome::Renewed(subscription))
    }

    /// Close `current` with a failed bill over the empty period `[now, now]`.
    async fn cancel_renewal(
        &self,
        mut tx: S::Tx,
        current: Subscription,
        reason: BillReason,
        price: Option<&Price>,
        event_uuid: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RenewOutcome, SubscriptionError> {
        let status = next_status(&current, Transition::RenewCancel)?;

        let bill = self
            .write_bill(
                &mut tx,
                NewSubscriptionBill {
                    amount_paid: price.map(|p| p.amount).unwrap_or(Decimal::ZERO),
                    status: BillStatus::Failed,
                    period_start: now,
                    period_end: now,
                    price_id: current.next_price_id,
                    resource_id: current.next_resource_id.clone(),
                    discount: price.map(|p| p.discount).unwrap_or(Decimal::ZERO),
                    ..bill_for(&current, event_uuid, reason)
                },
            )
            .await?;

        let draft = SubscriptionDraft::from_current(&current)
            .status(status)
            .action_user(SYSTEM_ACTOR)
            .ended(Some(now))
            .billed(&bill)
            .build();
        let subscription = self.save(&mut tx, &draft).await?;
        self.commit(tx, subscription.subscription_id).await?;

        info!(
            subscription_id = subscription.subscription_id,
            reason = %reason,
            "Subscription canceled at renewal"
        );

        Ok(RenewOutcome::Canceled {
            subscription,
            reason,
        })
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub async fn get_subscription(
        &self,
        subscription_id: i64,
    ) -> Result<Subscription, SubscriptionError> {
        self.store
            .get_subscription(subscription_id)
            .await
            .persist_ctx(|| format!("get subscription {}", subscription_id))?
            .ok_or_else(|| SubscriptionError::NotFound(format!("subscription {}", subscription_id)))
    }

    /// Latest subscription of the (user, SKU type) lineage.
    pub async fn subscription_status(
        &self,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Subscription, SubscriptionError> {
        self.store
            .latest_subscription(user_uuid, sku_type)
            .await
            .persist_ctx(|| format!("get subscription of user {} sku type {}", user_uuid, sku_type))?
            .ok_or_else(|| {
                SubscriptionError::NotFound(format!(
                    "subscription of user {} sku type {}",
                    user_uuid, sku_type
                ))
            })
    }

    pub async fn list_subscriptions(
        &self,
        filter: &ListSubscriptionsFilter,
    ) -> Result<SubscriptionListResult, SubscriptionError> {
        self.store
            .list_subscriptions(filter)
            .await
            .persist_ctx(|| "list subscriptions".to_string())
    }

    pub async fn list_bills(
        &self,
        filter: &ListBillsFilter,
    ) -> Result<BillListResult, SubscriptionError> {
        self.store
            .list_bills(filter)
            .await
            .persist_ctx(|| "list subscription bills".to_string())
    }

    pub async fn get_balance(&self, user_uuid: &str) -> Result<UserBalance, SubscriptionError> {
        self.store
            .get_balance(user_uuid)
            .await
            .persist_ctx(|| format!("get balance of user {}", user_uuid))?
            .ok_or_else(|| SubscriptionError::NotFound(format!("balance of user {}", user_uuid)))
    }

    // -------------------------------------------------------------------------
    // Unit of work helpers
    // -------------------------------------------------------------------------

    async fn begin(&self) -> Result<S::Tx, SubscriptionError> {
        self.store
            .begin()
            .await
            .persist_ctx(|| "begin transaction".to_string())
    }

    async fn commit(&self, tx: S::Tx, subscription_id: i64) -> Result<(), SubscriptionError> {
        tx.commit()
            .await
            .persist_ctx(|| format!("commit changes to subscription {}", subscription_id))
    }

    async fn resolve_price(
        &self,
        tx: &mut S::Tx,
        request: &SubscriptionRequest,
    ) -> Result<Price, SubscriptionError> {
        tx.find_latest_price(request.sku_type, &request.resource_id, request.unit_type)
            .await
            .persist_ctx(|| format!("find price of resource {}", request.resource_id))?
            .ok_or_else(|| {
                SubscriptionError::PriceNotFound(format!(
                    "sku type {} resource {} unit {}",
                    request.sku_type, request.resource_id, request.unit_type
                ))
            })
    }

    async fn lock_subscription(
        &self,
        tx: &mut S::Tx,
        subscription_id: i64,
    ) -> Result<Subscription, SubscriptionError> {
        tx.lock_subscription_for_update(subscription_id)
            .await
            .persist_ctx(|| format!("lock subscription {}", subscription_id))?
            .ok_or_else(|| SubscriptionError::NotFound(format!("subscription {}", subscription_id)))
    }

    /// Lock the latest subscription of a lineage.
    async fn lock_lineage(
        &self,
        tx: &mut S::Tx,
        user_uuid: &str,
        sku_type: i32,
    ) -> Result<Subscription, SubscriptionError> {
        let latest = tx
            .latest_subscription(user_uuid, sku_type)
            .await
            .persist_ctx(|| format!("get subscription of user {} sku type {}", user_uuid, sku_type))?
            .ok_or_else(|| {
                SubscriptionError::NotFound(format!(
                    "subscription of user {} sku type {}",
                    user_uuid, sku_type
                ))
            })?;
        self.lock_subscription(tx, latest.subscription_id).await
    }

    async fn write_bill(
        &self,
        tx: &mut S::Tx,
        bill: NewSubscriptionBill,
    ) -> Result<SubscriptionBill, SubscriptionError> {
        let inserted = tx.insert_bill(&bill).await.persist_ctx(|| {
            format!(
                "insert {} bill for subscription {}",
                bill.reason, bill.subscription_id
            )
        })?;
        metrics::record_bill(inserted.reason.as_str(), inserted.status.as_str());
        Ok(inserted)
    }

    async fn save(
        &self,
        tx: &mut S::Tx,
        subscription: &Subscription,
    ) -> Result<Subscription, SubscriptionError> {
        match tx.update_subscription(subscription).await {
            Ok(saved) => Ok(saved),
            Err(StoreError::UniqueViolation(_)) => Err(SubscriptionError::SubscriptionExists {
                user_uuid: subscription.user_uuid.clone(),
                sku_type: subscription.sku_type,
            }),
            Err(e) => Err(e).persist_ctx(|| {
                format!(
                    "update subscription {} of user {} price {}",
                    subscription.subscription_id, subscription.user_uuid, subscription.price_id
                )
            }),
        }
    }
}
