//! intake-hub library interface
//!
//! The hub owns the Submission Store and everything that writes to it:
//! per-id critical sections, the Audit Recorder, the engine entry points,
//! the Presence Registry, and the HTTP + SSE surface.

pub mod api;
pub mod audit;
pub mod engine;
pub mod error;
pub mod presence;
pub mod store;

pub use crate::engine::Engine;
pub use crate::error::{ApiError, ApiResult};
pub use crate::presence::PresenceRegistry;

use axum::Router;
use chrono::{DateTime, Utc};
use intake_common::config::HubConfig;
use intake_common::events::EventBus;
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub presence: PresenceRegistry,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Cancelled at shutdown; ends long-lived SSE streams
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, presence: PresenceRegistry) -> Self {
        Self {
            engine,
            presence,
            startup_time: Utc::now(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire an engine and presence registry over `pool` as configured
    pub fn from_config(pool: SqlitePool, config: &HubConfig) -> Self {
        let bus = EventBus::new(config.engine.event_bus_capacity);
        let engine = Engine::new(pool, bus, config.engine.mutation_timeout());
        let presence = PresenceRegistry::new(config.presence.heartbeat_timeout());
        Self::new(Arc::new(engine), presence)
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::submission_routes())
        .merge(api::presence_routes())
        .route("/api/events", get(api::event_stream))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
