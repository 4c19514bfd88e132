pub mod adapters;
pub mod concurrency;
pub mod config;
pub mod models;
pub mod monitors;
pub mod orchestrator;
pub mod pool_manager;
pub mod retry;
pub mod router;
pub mod handlers {
    pub mod admin;
    pub mod bots;
    pub mod intake;
}
pub mod alerting;
pub mod db;
pub mod errors;
pub mod health;
pub mod middleware;
pub mod observability;
pub mod secrets;
pub mod webhook;

use axum::{
    routing::{get, patch, post},
    Router as AxumRouter,
};
use jsonwebtoken::DecodingKey;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use alerting::{AlertConfig, AlertManager};
pub use concurrency::EventQueueRegistry;
pub use config::PlatformConfigState;
pub use db::Db;
pub use models::*;
pub use observability::MetricsCollector;
pub use orchestrator::Orchestrator;
pub use pool_manager::PoolManager;
pub use secrets::SecretsManager;
pub use webhook::{WebhookConfig, WebhookNotifier};

use adapters::PlatformAdapter;

/// Application state shared across handlers (spec §1, §3).
#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub secrets: SecretsManager,
    pub metrics: MetricsCollector,
    pub rate_limiter: middleware::rate_limit::RateLimiter,
    pub bot_rate_limiter: middleware::rate_limit::RateLimiter,
    /// Decodes bearer JWTs issued by the external auth collaborator.
    pub jwt_decoding_key: DecodingKey,
    /// Frozen router configuration (priority list, per-platform limits).
    pub platform_config: PlatformConfigState,
    /// One slot manager per pool-backed platform (currently just Coolify).
    pub pool_managers: HashMap<DeploymentPlatform, PoolManager>,
    /// One adapter per configured deployment platform.
    pub adapters: HashMap<DeploymentPlatform, Arc<dyn PlatformAdapter>>,
    /// Process-wide deployment-concurrency semaphore, shared by every
    /// adapter and `PoolManager` (spec §4.3/§5 - one gate, not one per
    /// platform).
    pub deploy_gate: concurrency::DeploymentGate,
    /// Process-wide image-pull-lock registry, shared the same way.
    pub pull_locks: concurrency::ImagePullLockRegistry,
    /// Owns createBot/deploy/release (spec §4.6, C5).
    pub orchestrator: Orchestrator,
    /// Per-bot batched event ingest (spec §4.7).
    pub event_queues: EventQueueRegistry,
    /// Alert manager for threshold-based notifications.
    pub alerts: AlertManager,
    /// Webhook notifier for the DONE callback and operator alerts.
    pub webhooks: WebhookNotifier,
}

/// Build the API router: the Bot RPC surface (spec §6, user-facing,
/// auth + ownership gated), the Infrastructure RPC surface (spec §6,
/// admin-gated), and the bot-container intake surface (spec §4.7, C7,
/// intentionally ungated), plus health endpoints.
pub async fn app(state: Arc<AppState>) -> AxumRouter {
    use axum::http::{header, HeaderValue, Method};

    let allowed_origins: Vec<HeaderValue> = std::env::var("ALLOWED_ORIGINS")
        .unwrap_or_default()
        .split(',')
        .filter_map(|o| o.trim().parse::<HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT])
        .allow_credentials(true);

    // Bot RPC surface (spec §6): owner CRUD plus deploy/cancel/remove lifecycle actions.
    let bot_routes = AxumRouter::new()
        .route("/bots", get(handlers::bots::list_bots))
        .route("/bots", post(handlers::bots::create_bot))
        .route("/bots/active-count", get(handlers::bots::get_active_bot_count))
        .route("/bots/{id}", get(handlers::bots::get_bot))
        .route("/bots/{id}", patch(handlers::bots::update_bot))
        .route("/bots/{id}", axum::routing::delete(handlers::bots::delete_bot))
        .route("/bots/{id}/deploy", post(handlers::bots::deploy_bot))
        .route("/bots/{id}/cancel", post(handlers::bots::cancel_deployment))
        .route("/bots/{id}/remove-from-call", post(handlers::bots::remove_from_call))
        .route("/bots/{id}/screenshots", post(handlers::bots::add_screenshot))
        .route("/bots/{id}/log-level", patch(handlers::bots::update_log_level))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::rate_limit_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state.clone());

    // Infrastructure RPC surface (spec §6): platform config plus pool/queue visibility.
    let admin_routes = AxumRouter::new()
        .route("/config", get(handlers::admin::list_config))
        .route("/config/{key}", get(handlers::admin::get_config))
        .route("/config", patch(handlers::admin::update_config))
        .route("/config/audit", get(handlers::admin::get_audit_log))
        .route("/config/test-webhook", post(handlers::admin::test_webhook))
        .route("/config/sync-env", post(handlers::admin::sync_env_to_db))
        .route("/infra/pool-stats/{platform}", get(handlers::admin::pool_stats))
        .route("/infra/queue-stats/{platform}", get(handlers::admin::queue_stats))
        .route("/infra/capacity", get(handlers::admin::platform_capacity))
        .route("/infra/global-queue", get(handlers::admin::global_queue))
        .layer(axum::middleware::from_fn(middleware::admin_middleware))
        .layer(axum::middleware::from_fn_with_state(state.clone(), middleware::auth_middleware))
        .with_state(state.clone());

    // Bot-container contract (spec §4.7, C7): intentionally not ownership-gated.
    let intake_routes = AxumRouter::new()
        .route("/bot/{id}/heartbeat", post(handlers::intake::send_heartbeat))
        .route("/bot/{id}/events", post(handlers::intake::report_event))
        .route("/bot/{id}/status", post(handlers::intake::update_status))
        .route("/pool-slot/{uuid}", get(handlers::intake::get_pool_slot))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit::bot_rate_limit_middleware,
        ))
        .with_state(state.clone());

    let health_routes = AxumRouter::new()
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .route("/health", get(health::health_detail))
        .with_state(state.clone());

    AxumRouter::new()
        .nest("/v1", bot_routes)
        .nest("/v1/admin", admin_routes)
        .nest("/v1", intake_routes)
        .nest("/v1", health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
