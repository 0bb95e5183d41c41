//! Services module for subscription-service.

pub mod database;
pub mod ledger;
pub mod lifecycle;
pub mod memory;
pub mod metrics;
pub mod period;
pub mod proration;
pub mod renewal;
pub mod store;

pub use database::{Database, PgUnitOfWork};
pub use ledger::{Charge, Deduction, LedgerRecorder, TopUp};
pub use lifecycle::{RenewOutcome, RenewalReport, SubscriptionManager, SYSTEM_ACTOR};
pub use memory::{MemoryStore, MemoryTx};
pub use metrics::{get_metrics, init_metrics};
pub use renewal::RenewalWorker;
pub use store::{SubscriptionStore, UnitOfWork};
