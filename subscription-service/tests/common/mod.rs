//! Common test utilities for subscription-service integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use std::sync::{Arc, Once};
use subscription_service::models::{
    BalanceField, BillListResult, CreatePrice, ListBillsFilter, Price, SkuKind, SkuUnitType,
    SubscriptionRequest, UserBalance,
};
use subscription_service::config::{DatabaseConfig, RenewalConfig, SubscriptionConfig};
use subscription_service::services::{MemoryStore, SubscriptionManager, SubscriptionStore, TopUp};
use subscription_service::startup::Application;
use uuid::Uuid;

pub mod postgres;

pub const SKU_TYPE: i32 = 1;

static INIT: Once = Once::new();

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,subscription_service=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Midnight UTC on the given day.
pub fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
}

pub fn request(user_uuid: &str, resource_id: &str, unit_type: SkuUnitType) -> SubscriptionRequest {
    SubscriptionRequest {
        user_uuid: user_uuid.to_string(),
        action_user: user_uuid.to_string(),
        sku_type: SKU_TYPE,
        resource_id: resource_id.to_string(),
        unit_type,
        event_uuid: Uuid::new_v4(),
    }
}

pub fn monthly(user_uuid: &str, resource_id: &str) -> SubscriptionRequest {
    request(user_uuid, resource_id, SkuUnitType::Month)
}

pub fn catalog_price(
    resource_id: &str,
    amount: Decimal,
    unit_type: &str,
    unit_count: i32,
) -> CreatePrice {
    CreatePrice {
        sku_type: SKU_TYPE,
        sku_kind: SkuKind::TimeSpan,
        amount,
        unit_type: unit_type.to_string(),
        unit_count,
        resource_id: resource_id.to_string(),
        currency: "CNY".to_string(),
        discount: Decimal::ZERO,
    }
}

/// Top up both balance columns. Zero amounts are skipped.
pub async fn fund<S: SubscriptionStore>(
    manager: &SubscriptionManager<S>,
    user_uuid: &str,
    cash: Decimal,
    credit: Decimal,
) {
    for (field, amount) in [(BalanceField::Cash, cash), (BalanceField::Credit, credit)] {
        if amount.is_zero() {
            continue;
        }
        manager
            .ledger()
            .top_up(TopUp {
                event_uuid: Uuid::new_v4(),
                user_uuid: user_uuid.to_string(),
                amount,
                field,
                currency: "CNY".to_string(),
                op_uid: "test".to_string(),
            })
            .await
            .expect("Failed to fund user");
    }
}

/// A running HTTP surface over an in-memory store.
pub struct TestApp {
    pub http_address: String,
    pub http_port: u16,
}

impl TestApp {
    pub async fn spawn() -> Self {
        init_tracing();

        let config = SubscriptionConfig {
            common: service_core::config::Config { port: 0 },
            service_name: "subscription-service".to_string(),
            service_version: "test".to_string(),
            log_level: "debug".to_string(),
            otlp_endpoint: None,
            database: DatabaseConfig {
                url: String::new(),
                max_connections: 1,
                min_connections: 1,
            },
            renewal: RenewalConfig {
                enabled: false,
                ..Default::default()
            },
        };

        let app = Application::with_store(config, Arc::new(MemoryStore::new()))
            .await
            .expect("Failed to build application");
        let http_port = app.http_port();
        tokio::spawn(app.run_until_stopped());

        Self {
            http_address: format!("http://127.0.0.1:{}", http_port),
            http_port,
        }
    }
}

/// Lifecycle manager over a fresh in-memory store.
pub struct TestContext {
    pub store: Arc<MemoryStore>,
    pub manager: SubscriptionManager<MemoryStore>,
}

impl TestContext {
    pub fn new() -> Self {
        init_tracing();
        let store = Arc::new(MemoryStore::new());
        let manager = SubscriptionManager::new(Arc::clone(&store));
        Self { store, manager }
    }

    pub async fn price(
        &self,
        resource_id: &str,
        amount: Decimal,
        unit_type: SkuUnitType,
        unit_count: i32,
    ) -> Price {
        self.store
            .insert_price(catalog_price(resource_id, amount, unit_type.as_str(), unit_count))
            .await
    }

    /// A single-unit price with a raw unit string, valid or not.
    pub async fn unit_price(&self, resource_id: &str, amount: Decimal, unit_type: &str) -> Price {
        self.store
            .insert_price(catalog_price(resource_id, amount, unit_type, 1))
            .await
    }

    pub async fn monthly_price(&self, resource_id: &str, amount: Decimal) -> Price {
        self.price(resource_id, amount, SkuUnitType::Month, 1).await
    }

    pub async fn fund(&self, user_uuid: &str, cash: Decimal, credit: Decimal) {
        fund(&self.manager, user_uuid, cash, credit).await;
    }

    pub async fn balance(&self, user_uuid: &str) -> UserBalance {
        self.manager
            .get_balance(user_uuid)
            .await
            .expect("Balance should exist")
    }

    pub async fn bills_of(&self, user_uuid: &str) -> BillListResult {
        self.manager
            .list_bills(&ListBillsFilter {
                user_uuid: Some(user_uuid.to_string()),
                page: 1,
                per_page: 100,
                ..Default::default()
            })
            .await
            .expect("Failed to list bills")
    }
}
