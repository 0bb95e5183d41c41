//! Application startup and lifecycle management.

use crate::config::SubscriptionConfig;
use crate::services::{
    get_metrics, init_metrics, Database, RenewalWorker, SubscriptionManager, SubscriptionStore,
};
use axum::{
    extract::State, http::StatusCode, middleware, response::IntoResponse, routing::get, Json,
    Router,
};
use serde_json::json;
use service_core::error::AppError;
use service_core::middleware::metrics::metrics_middleware;
use service_core::middleware::tracing::request_id_middleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// State for health check endpoints.
struct HealthState<S> {
    store: Arc<S>,
    service_name: String,
    service_version: String,
}

impl<S> Clone for HealthState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            service_name: self.service_name.clone(),
            service_version: self.service_version.clone(),
        }
    }
}

/// Health check endpoint for Docker/K8s liveness probes.
async fn health_check<S: SubscriptionStore>(
    State(state): State<HealthState<S>>,
) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => {
            tracing::debug!("Health check passed");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "ok",
                    "service": state.service_name,
                    "version": state.service_version
                })),
            )
        }
        Err(e) => {
            tracing::warn!(error = %e, "Health check failed - store unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "service": state.service_name,
                    "error": e.to_string()
                })),
            )
        }
    }
}

/// Readiness check endpoint for K8s readiness probes.
async fn readiness_check<S: SubscriptionStore>(
    State(state): State<HealthState<S>>,
) -> impl IntoResponse {
    match state.store.health_check().await {
        Ok(_) => StatusCode::OK,
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Metrics endpoint for Prometheus scraping.
async fn metrics_handler() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        get_metrics(),
    )
}

/// Application container for managing server lifecycle.
pub struct Application<S: SubscriptionStore> {
    http_port: u16,
    http_listener: TcpListener,
    config: SubscriptionConfig,
    manager: SubscriptionManager<S>,
}

impl Application<Database> {
    /// Build the application against PostgreSQL and apply migrations.
    pub async fn build(config: SubscriptionConfig) -> Result<Self, AppError> {
        Self::build_internal(config, true).await
    }

    /// Build the application without running migrations.
    pub async fn build_without_migrations(config: SubscriptionConfig) -> Result<Self, AppError> {
        Self::build_internal(config, false).await
    }

    async fn build_internal(
        config: SubscriptionConfig,
        run_migrations: bool,
    ) -> Result<Self, AppError> {
        let db = Database::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
        )
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to connect to PostgreSQL");
            e
        })?;

        if run_migrations {
            db.run_migrations().await.map_err(|e| {
                tracing::error!(error = %e, "Failed to run migrations");
                e
            })?;
        }

        Self::with_store(config, Arc::new(db)).await
    }
}

impl<S: SubscriptionStore> Application<S> {
    /// Build the application over an already constructed store.
    pub async fn with_store(config: SubscriptionConfig, store: Arc<S>) -> Result<Self, AppError> {
        init_metrics();

        let http_addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let http_listener = TcpListener::bind(http_addr).await.map_err(|e| {
            tracing::error!(error = %e, addr = %http_addr, "Failed to bind HTTP listener");
            AppError::from(e)
        })?;
        let http_port = http_listener.local_addr()?.port();

        tracing::info!(http_port = http_port, "Subscription service listener bound");

        Ok(Self {
            http_port,
            http_listener,
            config,
            manager: SubscriptionManager::new(store),
        })
    }

    /// Get the HTTP port the server is listening on.
    pub fn http_port(&self) -> u16 {
        self.http_port
    }

    pub fn manager(&self) -> &SubscriptionManager<S> {
        &self.manager
    }

    /// Serve health and metrics endpoints and run the renewal sweeper until
    /// stopped. Dropping the returned future stops the sweeper.
    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        let health_state = HealthState {
            store: Arc::clone(self.manager.store()),
            service_name: self.config.service_name.clone(),
            service_version: self.config.service_version.clone(),
        };

        let http_router = Router::new()
            .route("/health", get(health_check::<S>))
            .route("/ready", get(readiness_check::<S>))
            .route("/metrics", get(metrics_handler))
            .layer(TraceLayer::new_for_http())
            .layer(middleware::from_fn(metrics_middleware))
            .layer(middleware::from_fn(request_id_middleware))
            .with_state(health_state);

        let worker = RenewalWorker::new(self.config.renewal.clone(), self.manager.clone());
        let _stop_worker = worker.shutdown_token().drop_guard();
        tokio::spawn(worker.run());

        tracing::info!(
            service = %self.config.service_name,
            version = %self.config.service_version,
            http_port = self.http_port,
            renewal_enabled = self.config.renewal.enabled,
            "Service ready to accept connections"
        );

        axum::serve(self.http_listener, http_router)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "HTTP server error");
                std::io::Error::other(format!("HTTP server error: {}", e))
            })
    }
}
