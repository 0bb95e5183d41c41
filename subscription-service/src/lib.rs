//! Subscription Service - recurring SKU subscriptions with prorated plan
//! changes, scheduled renewals and a dual-balance ledger.

pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod startup;
