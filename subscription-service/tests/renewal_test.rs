//! Period renewal sweep tests.

mod common;

use chrono::Duration;
use common::{at, monthly, TestContext, SKU_TYPE};
use rust_decimal_macros::dec;
use subscription_service::models::{BillReason, BillStatus, SubscriptionStatus};
use subscription_service::services::RenewOutcome;
use uuid::Uuid;

#[tokio::test]
async fn renewal_charges_next_price_and_advances_period() {
    let ctx = TestContext::new();
    let price = ctx.monthly_price("basic", dec!(1000)).await;
    ctx.fund("user-1", dec!(2000), dec!(0)).await;

    ctx.manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 31))
        .await
        .unwrap();

    let now = at(2024, 2, 29) + Duration::hours(1);
    let report = ctx.manager.renew_due_subscriptions_at(now, 100).await.unwrap();
    assert_eq!(report.renewed, 1);
    assert_eq!(report.processed(), 1);

    let sub = ctx.manager.subscription_status("user-1", SKU_TYPE).await.unwrap();
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.current_period_start, at(2024, 2, 29));
    // Month ends follow the anchor day, not the shortened February.
    assert_eq!(sub.current_period_end, at(2024, 3, 31));
    assert_eq!(sub.price_id, price.price_id);
    assert_eq!(sub.amount_paid_total, dec!(2000));
    assert_eq!(sub.amount_paid_count, 2);
    assert_eq!(ctx.balance("user-1").await.cash_balance, dec!(0));

    let bills = ctx.bills_of("user-1").await;
    let cycle = &bills.items[0];
    assert_eq!(cycle.reason, BillReason::Cycle);
    assert_eq!(cycle.status, BillStatus::Paid);
    assert_eq!(cycle.amount_paid, dec!(1000));
    assert_eq!(cycle.period_start, at(2024, 2, 29));
    assert_eq!(cycle.period_end, at(2024, 3, 31));
    assert_eq!(sub.last_bill_id, Some(cycle.bill_id));
}

#[tokio::test]
async fn renewal_applies_scheduled_downgrade() {
    let ctx = TestContext::new();
    let basic = ctx.monthly_price("basic", dec!(1000)).await;
    ctx.monthly_price("pro", dec!(1500)).await;
    ctx.fund("user-1", dec!(2500), dec!(0)).await;

    ctx.manager
        .create_subscription_at(monthly("user-1", "pro"), at(2024, 1, 1))
        .await
        .unwrap();
    ctx.manager
        .update_subscription_resource_at(monthly("user-1", "basic"), at(2024, 1, 15))
        .await
        .unwrap();

    let report = ctx
        .manager
        .renew_due_subscriptions_at(at(2024, 2, 1) + Duration::hours(1), 100)
        .await
        .unwrap();
    assert_eq!(report.renewed, 1);

    let sub = ctx.manager.subscription_status("user-1", SKU_TYPE).await.unwrap();
    assert_eq!(sub.price_id, basic.price_id);
    assert_eq!(sub.resource_id, "basic");
    assert!(!sub.has_pending_change());
    assert_eq!(sub.current_period_end, at(2024, 3, 1));
    assert_eq!(ctx.balance("user-1").await.cash_balance, dec!(0));
}

#[tokio::test]
async fn renewal_with_missing_price_cancels_subscription() {
    let ctx = TestContext::new();
    let price = ctx.monthly_price("basic", dec!(1000)).await;
    ctx.fund("user-1", dec!(2000), dec!(0)).await;

    let sub = ctx
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 1))
        .await
        .unwrap();
    assert!(ctx.store.remove_price(price.price_id).await);

    let now = at(2024, 2, 1) + Duration::hours(1);
    let outcome = ctx
        .manager
        .renew_subscription_at(sub.subscription_id, Uuid::new_v4(), now)
        .await
        .unwrap();

    let RenewOutcome::Canceled {
        subscription,
        reason,
    } = outcome
    else {
        panic!("Expected cancellation, got {outcome:?}");
    };
    assert_eq!(reason, BillReason::LostPrice);
    assert_eq!(subscription.status, SubscriptionStatus::Canceled);
    assert_eq!(subscription.ended_utc, Some(now));
    assert_eq!(subscription.action_user, "system");
    assert_eq!(subscription.current_period_start, now);
    assert_eq!(subscription.current_period_end, now);

    let bills = ctx.bills_of("user-1").await;
    let failed = &bills.items[0];
    assert_eq!(failed.reason, BillReason::LostPrice);
    assert_eq!(failed.status, BillStatus::Failed);
    assert_eq!(failed.amount_paid, dec!(0));
    assert_eq!(failed.period_start, now);
    assert_eq!(failed.period_end, now);
    assert_eq!(ctx.balance("user-1").await.cash_balance, dec!(1000));
}

#[tokio::test]
async fn renewal_without_balance_cancels_subscription() {
    let ctx = TestContext::new();
    ctx.monthly_price("basic", dec!(1000)).await;
    ctx.fund("user-1", dec!(1000), dec!(400)).await;

    let sub = ctx
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 1))
        .await
        .unwrap();

    let now = at(2024, 2, 1) + Duration::hours(1);
    let outcome = ctx
        .manager
        .renew_subscription_at(sub.subscription_id, Uuid::new_v4(), now)
        .await
        .unwrap();
    assert!(matches!(
        outcome,
        RenewOutcome::Canceled {
            reason: BillReason::BalanceInsufficient,
            ..
        }
    ));

    let bills = ctx.bills_of("user-1").await;
    assert_eq!(bills.items[0].status, BillStatus::Failed);
    assert_eq!(bills.items[0].amount_paid, dec!(1000));

    let balance = ctx.balance("user-1").await;
    assert_eq!(balance.cash_balance, dec!(0));
    assert_eq!(balance.credit_balance, dec!(400));
}

#[tokio::test]
async fn subscription_with_open_period_is_skipped() {
    let ctx = TestContext::new();
    ctx.monthly_price("basic", dec!(1000)).await;
    ctx.fund("user-1", dec!(2000), dec!(0)).await;

    let sub = ctx
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 1))
        .await
        .unwrap();

    let report = ctx
        .manager
        .renew_due_subscriptions_at(at(2024, 1, 20), 100)
        .await
        .unwrap();
    assert_eq!(report.processed(), 0);

    let outcome = ctx
        .manager
        .renew_subscription_at(sub.subscription_id, Uuid::new_v4(), at(2024, 1, 20))
        .await
        .unwrap();
    assert!(matches!(outcome, RenewOutcome::Skipped));
    assert_eq!(ctx.balance("user-1").await.cash_balance, dec!(1000));
}

#[tokio::test]
async fn canceled_subscription_is_not_renewed() {
    let ctx = TestContext::new();
    ctx.monthly_price("basic", dec!(1000)).await;
    ctx.fund("user-1", dec!(2000), dec!(0)).await;

    ctx.manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 1))
        .await
        .unwrap();
    ctx.manager
        .cancel_subscription_at("user-1", SKU_TYPE, "user-1", at(2024, 1, 10))
        .await
        .unwrap();

    let report = ctx
        .manager
        .renew_due_subscriptions_at(at(2024, 2, 5), 100)
        .await
        .unwrap();
    assert_eq!(report.processed(), 0);
    assert_eq!(ctx.balance("user-1").await.cash_balance, dec!(1000));
}

#[tokio::test]
async fn sweep_counts_each_outcome() {
    let ctx = TestContext::new();
    ctx.monthly_price("plan-a", dec!(100)).await;
    ctx.monthly_price("plan-b", dec!(100)).await;
    let lost = ctx.monthly_price("plan-c", dec!(100)).await;

    ctx.fund("user-a", dec!(200), dec!(0)).await;
    ctx.fund("user-b", dec!(100), dec!(0)).await;
    ctx.fund("user-c", dec!(200), dec!(0)).await;

    let created = at(2024, 5, 1);
    for (user, plan) in [("user-a", "plan-a"), ("user-b", "plan-b"), ("user-c", "plan-c")] {
        ctx.manager
            .create_subscription_at(monthly(user, plan), created)
            .await
            .unwrap();
    }
    ctx.store.remove_price(lost.price_id).await;

    let report = ctx
        .manager
        .renew_due_subscriptions_at(at(2024, 6, 1) + Duration::minutes(5), 100)
        .await
        .unwrap();

    assert_eq!(report.renewed, 1);
    assert_eq!(report.canceled_insufficient_balance, 1);
    assert_eq!(report.canceled_lost_price, 1);
    assert_eq!(report.failed, 0);
    assert_eq!(report.processed(), 3);
}

#[tokio::test]
async fn sweep_respects_batch_size() {
    let ctx = TestContext::new();
    ctx.monthly_price("basic", dec!(100)).await;

    for user in ["user-1", "user-2", "user-3"] {
        ctx.fund(user, dec!(200), dec!(0)).await;
        ctx.manager
            .create_subscription_at(monthly(user, "basic"), at(2024, 5, 1))
            .await
            .unwrap();
    }

    let now = at(2024, 6, 2);
    let first = ctx.manager.renew_due_subscriptions_at(now, 2).await.unwrap();
    assert_eq!(first.renewed, 3);
    assert_eq!(first.processed(), 3);

    let second = ctx.manager.renew_due_subscriptions_at(now, 2).await.unwrap();
    assert_eq!(second.processed(), 0);
}

#[tokio::test]
async fn failing_subscription_does_not_starve_later_ones() {
    let ctx = TestContext::new();
    ctx.monthly_price("basic", dec!(100)).await;
    // A unit the period calculator rejects, so renewing onto it errors.
    let broken = ctx.unit_price("broken", dec!(100), "fortnight").await;

    ctx.fund("user-1", dec!(500), dec!(0)).await;
    ctx.fund("user-2", dec!(500), dec!(0)).await;
    let stuck = ctx
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 5, 1))
        .await
        .unwrap();
    let healthy = ctx
        .manager
        .create_subscription_at(monthly("user-2", "basic"), at(2024, 5, 2))
        .await
        .unwrap();
    assert!(ctx
        .store
        .set_next_price(stuck.subscription_id, broken.price_id)
        .await);

    let now = at(2024, 6, 3);
    let first = ctx.manager.renew_due_subscriptions_at(now, 1).await.unwrap();
    assert_eq!(first.failed, 1);
    assert_eq!(first.renewed, 1);

    let renewed = ctx
        .manager
        .get_subscription(healthy.subscription_id)
        .await
        .unwrap();
    assert_eq!(renewed.current_period_start, at(2024, 6, 2));
    assert_eq!(renewed.current_period_end, at(2024, 7, 2));

    let second = ctx.manager.renew_due_subscriptions_at(now, 1).await.unwrap();
    assert_eq!(second.failed, 1);
    assert_eq!(second.renewed, 0);

    let still_due = ctx.manager.get_subscription(stuck.subscription_id).await.unwrap();
    assert_eq!(still_due.status, SubscriptionStatus::Active);
    assert_eq!(still_due.current_period_end, at(2024, 6, 1));
}

#[tokio::test]
async fn overdue_subscription_catches_up_one_period_per_sweep() {
    let ctx = TestContext::new();
    ctx.monthly_price("basic", dec!(100)).await;
    ctx.fund("user-1", dec!(1000), dec!(0)).await;

    let sub = ctx
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 1))
        .await
        .unwrap();
    ctx.store
        .set_period(sub.subscription_id, at(2023, 11, 1), at(2023, 12, 1))
        .await;

    let now = at(2024, 1, 15);
    let first = ctx.manager.renew_due_subscriptions_at(now, 10).await.unwrap();
    assert_eq!(first.renewed, 1);
    let after_first = ctx.manager.get_subscription(sub.subscription_id).await.unwrap();
    assert_eq!(after_first.current_period_start, at(2023, 12, 1));

    let second = ctx.manager.renew_due_subscriptions_at(now, 10).await.unwrap();
    assert_eq!(second.renewed, 1);
    let after_second = ctx.manager.get_subscription(sub.subscription_id).await.unwrap();
    assert_eq!(after_second.current_period_start, at(2024, 1, 1));
    assert!(after_second.period_open_at(now));
}
