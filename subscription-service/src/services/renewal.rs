//! Background renewal sweeper.

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RenewalConfig;
use crate::services::lifecycle::SubscriptionManager;
use crate::services::metrics;
use crate::services::store::SubscriptionStore;

/// Periodically renews subscriptions whose period has ended.
pub struct RenewalWorker<S: SubscriptionStore> {
    config: RenewalConfig,
    manager: SubscriptionManager<S>,
    shutdown_token: CancellationToken,
}

impl<S: SubscriptionStore> RenewalWorker<S> {
    pub fn new(config: RenewalConfig, manager: SubscriptionManager<S>) -> Self {
        Self {
            config,
            manager,
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Token that stops the sweeper when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// Run sweeps until the shutdown token is cancelled. The first sweep
    /// runs immediately.
    pub async fn run(self) {
        if !self.config.enabled {
            tracing::info!("Renewal sweeper disabled by configuration");
            return;
        }

        tracing::info!(
            interval_secs = self.config.interval().as_secs(),
            batch_size = self.config.batch_size,
            "Starting renewal sweeper"
        );

        let mut ticker = interval(self.config.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => {
                    tracing::info!("Renewal sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.manager.renew_due_subscriptions(self.config.batch_size).await {
                        metrics::record_error(e.kind());
                        tracing::error!(error = %e, "Renewal sweep failed");
                    }
                }
            }
        }
    }
}
