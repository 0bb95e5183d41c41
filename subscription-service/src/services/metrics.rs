//! Prometheus metrics for subscription-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, HistogramVec, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Lifecycle operations by operation and result (no user or SKU labels).
pub static SUBSCRIPTION_OPERATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_operations_total",
        "Total number of subscription lifecycle operations",
        &["operation", "status"]
    )
    .expect("Failed to register subscription_operations_total")
});

/// Bills written, by reason and status.
pub static BILLS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_bills_total",
        "Total number of subscription bills written",
        &["reason", "status"]
    )
    .expect("Failed to register bills_total")
});

/// Absolute value of charges recorded, by currency.
pub static CHARGE_AMOUNT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_charge_amount_total",
        "Sum of absolute charge amounts recorded in the ledger",
        &["currency", "direction"]
    )
    .expect("Failed to register charge_amount_total")
});

/// Renewal sweep outcomes.
pub static RENEWALS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_renewals_total",
        "Total number of renewal attempts by outcome",
        &["outcome"]
    )
    .expect("Failed to register renewals_total")
});

/// Error counter for alerting.
pub static ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "subscription_errors_total",
        "Total number of errors by type",
        &["error_type"]
    )
    .expect("Failed to register errors_total")
});

/// Database query duration histogram.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "subscription_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .expect("Failed to register db_query_duration")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&SUBSCRIPTION_OPERATIONS_TOTAL);
    Lazy::force(&BILLS_TOTAL);
    Lazy::force(&CHARGE_AMOUNT_TOTAL);
    Lazy::force(&RENEWALS_TOTAL);
    Lazy::force(&ERRORS_TOTAL);
    Lazy::force(&DB_QUERY_DURATION);
}

/// Get metrics in Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder
        .encode_to_string(&metric_families)
        .unwrap_or_default()
}

pub fn record_operation(operation: &str, status: &str) {
    SUBSCRIPTION_OPERATIONS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
}

pub fn record_bill(reason: &str, status: &str) {
    BILLS_TOTAL.with_label_values(&[reason, status]).inc();
}

pub fn record_charge(currency: &str, amount: Decimal) {
    let direction = if amount.is_sign_negative() { "debit" } else { "credit" };
    if let Some(value) = amount.abs().to_f64() {
        CHARGE_AMOUNT_TOTAL
            .with_label_values(&[currency, direction])
            .inc_by(value);
    }
}

pub fn record_renewal(outcome: &str) {
    RENEWALS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn record_error(error_type: &str) {
    ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}
