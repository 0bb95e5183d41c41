//! Lifecycle tests against the PostgreSQL store.
//!
//! Each test migrates its own schema. Set `TEST_DATABASE_URL` to run them
//! against a specific server.

mod common;

use chrono::Duration;
use common::postgres::PgContext;
use common::{at, monthly, SKU_TYPE};
use rust_decimal_macros::dec;
use subscription_service::error::{StoreError, SubscriptionError};
use subscription_service::models::{
    BillReason, ListBillsFilter, NewStatement, NewSubscription, Scene, StatementMeta,
    SubscriptionStatus,
};
use subscription_service::services::{SubscriptionStore, UnitOfWork};
use uuid::Uuid;

#[tokio::test]
async fn create_persists_subscription_bill_and_statement() {
    let Some(pg) = PgContext::spawn().await else {
        return;
    };
    let price = pg.monthly_price("basic", dec!(1000)).await;
    pg.fund("user-1", dec!(600), dec!(600)).await;

    let req = monthly("user-1", "basic");
    let event_uuid = req.event_uuid;
    let sub = pg
        .manager
        .create_subscription_at(req, at(2024, 1, 31))
        .await
        .expect("Failed to create subscription");

    let stored = pg.manager.get_subscription(sub.subscription_id).await.unwrap();
    assert_eq!(stored.status, SubscriptionStatus::Active);
    assert_eq!(stored.price_id, price.price_id);
    assert_eq!(stored.current_period_start, at(2024, 1, 31));
    assert_eq!(stored.current_period_end, at(2024, 2, 29));
    assert_eq!(stored.amount_paid_total, dec!(1000));
    assert!(stored.last_bill_id.is_some());

    let statement = pg
        .db
        .get_statement_by_event(event_uuid)
        .await
        .unwrap()
        .expect("Statement should be recorded");
    assert_eq!(statement.cash_value, dec!(-600));
    assert_eq!(statement.credit_value, dec!(-400));

    let balance = pg.balance("user-1").await;
    assert_eq!(balance.cash_balance, dec!(0));
    assert_eq!(balance.credit_balance, dec!(200));

    pg.cleanup().await;
}

#[tokio::test]
async fn prorated_upgrade_reads_back_exactly() {
    let Some(pg) = PgContext::spawn().await else {
        return;
    };
    pg.monthly_price("basic", dec!(1000)).await;
    let pro = pg.monthly_price("pro", dec!(1500)).await;
    pg.fund("user-1", dec!(2000), dec!(0)).await;

    pg.manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 1, 1))
        .await
        .unwrap();
    let upgraded = pg
        .manager
        .update_subscription_resource_at(monthly("user-1", "pro"), at(2024, 1, 11))
        .await
        .expect("Failed to upgrade");
    assert_eq!(upgraded.price_id, pro.price_id);
    assert_eq!(upgraded.amount_paid_total, dec!(1338.709677));

    let stored = pg.manager.get_subscription(upgraded.subscription_id).await.unwrap();
    assert_eq!(stored.amount_paid_total, upgraded.amount_paid_total);

    let bills = pg
        .manager
        .list_bills(&ListBillsFilter {
            subscription_id: Some(upgraded.subscription_id),
            page: 1,
            per_page: 10,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(bills.items[0].reason, BillReason::Upgrade);
    assert_eq!(bills.items[0].amount_paid, dec!(338.709677));
    assert_eq!(bills.total_amount, stored.amount_paid_total);
    assert_eq!(pg.balance("user-1").await.cash_balance, dec!(661.290323));

    pg.cleanup().await;
}

#[tokio::test]
async fn renewal_sweep_pages_through_due_rows() {
    let Some(pg) = PgContext::spawn().await else {
        return;
    };
    pg.monthly_price("basic", dec!(100)).await;

    let mut ids = Vec::new();
    for (i, user) in ["user-1", "user-2", "user-3"].into_iter().enumerate() {
        pg.fund(user, dec!(300), dec!(0)).await;
        let sub = pg
            .manager
            .create_subscription_at(monthly(user, "basic"), at(2024, 1, 1 + i as u32))
            .await
            .unwrap();
        ids.push(sub.subscription_id);
    }

    let now = at(2024, 2, 3) + Duration::hours(1);
    let report = pg.manager.renew_due_subscriptions_at(now, 1).await.unwrap();
    assert_eq!(report.renewed, 3);
    assert_eq!(report.failed, 0);

    for id in ids {
        let sub = pg.manager.get_subscription(id).await.unwrap();
        assert!(sub.period_open_at(now));
        assert_eq!(sub.amount_paid_count, 2);
    }
    assert_eq!(pg.balance("user-1").await.cash_balance, dec!(100));

    let again = pg.manager.renew_due_subscriptions_at(now, 1).await.unwrap();
    assert_eq!(again.processed(), 0);

    pg.cleanup().await;
}

#[tokio::test]
async fn reused_event_is_rejected_by_store_and_manager() {
    let Some(pg) = PgContext::spawn().await else {
        return;
    };
    pg.monthly_price("basic", dec!(1000)).await;
    pg.fund("user-1", dec!(1000), dec!(0)).await;
    pg.fund("user-2", dec!(1000), dec!(0)).await;

    let first = monthly("user-1", "basic");
    let event_uuid = first.event_uuid;
    pg.manager
        .create_subscription_at(first, at(2024, 3, 1))
        .await
        .unwrap();

    let mut replay = monthly("user-2", "basic");
    replay.event_uuid = event_uuid;
    let err = pg
        .manager
        .create_subscription_at(replay, at(2024, 3, 1))
        .await
        .expect_err("Create should fail");
    assert!(matches!(err, SubscriptionError::DuplicateEvent(id) if id == event_uuid));
    assert_eq!(pg.balance("user-2").await.cash_balance, dec!(1000));

    let mut tx = pg.db.begin().await.unwrap();
    let err = tx
        .insert_statement(&NewStatement {
            event_uuid,
            user_uuid: "user-2".to_string(),
            value: dec!(5),
            meta: StatementMeta::top_up(Scene::CreditCharge, "ops", "CNY"),
            cash_value: dec!(0),
            credit_value: dec!(5),
            cash_balance_after: dec!(1000),
            credit_balance_after: dec!(5),
            recorded_utc: at(2024, 3, 1),
        })
        .await
        .expect_err("Insert should fail");
    assert!(matches!(
        err,
        StoreError::UniqueViolation(ref name) if name == "statements_event_uuid_key"
    ));

    pg.cleanup().await;
}

#[tokio::test]
async fn second_active_subscription_in_lineage_is_rejected() {
    let Some(pg) = PgContext::spawn().await else {
        return;
    };
    let price = pg.monthly_price("basic", dec!(1000)).await;
    pg.fund("user-1", dec!(3000), dec!(0)).await;

    let sub = pg
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 3, 1))
        .await
        .unwrap();

    let err = pg
        .manager
        .create_subscription_at(monthly("user-1", "basic"), at(2024, 3, 2))
        .await
        .expect_err("Create should fail");
    assert!(matches!(err, SubscriptionError::SubscriptionExists { .. }));

    let mut tx = pg.db.begin().await.unwrap();
    let err = tx
        .insert_subscription(&NewSubscription {
            user_uuid: "user-1".to_string(),
            sku_type: SKU_TYPE,
            price_id: price.price_id,
            resource_id: price.resource_id.clone(),
            status: SubscriptionStatus::Active,
            action_user: "user-1".to_string(),
            started_utc: at(2024, 3, 2),
            current_period_start: at(2024, 3, 2),
            current_period_end: at(2024, 4, 2),
            amount_paid_total: dec!(0),
            amount_paid_count: 0,
            next_price_id: price.price_id,
            next_resource_id: price.resource_id.clone(),
        })
        .await
        .expect_err("Insert should fail");
    assert!(matches!(
        err,
        StoreError::UniqueViolation(ref name) if name == "subscriptions_active_lineage_idx"
    ));
    drop(tx);

    let latest = pg.manager.subscription_status("user-1", SKU_TYPE).await.unwrap();
    assert_eq!(latest.subscription_id, sub.subscription_id);

    pg.cleanup().await;
}
