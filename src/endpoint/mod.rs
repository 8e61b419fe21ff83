//! External interfaces (§6): the streaming WebSocket endpoint and the HTTP
//! control plane, sharing one `AppState`.

pub mod control;
pub mod protocol;
pub mod ws;

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::asr::ProviderPool;
use crate::auth::AuthVerifier;
use crate::latency::LatencyMonitor;
use crate::orchestrator::{InterruptHandler, PipelineOrchestrator};
use crate::rag::RefreshLoop;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PipelineOrchestrator>,
    pub interrupts: Arc<InterruptHandler>,
    pub sessions: Arc<SessionStore>,
    pub auth: Arc<dyn AuthVerifier>,
    pub asr_pool: Arc<ProviderPool>,
    pub latency: Arc<LatencyMonitor>,
    pub refresh: Arc<RefreshLoop>,
    /// Flips to `true` to drain connections with close code 1001 (§4.13).
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

    control::router().route("/stream", get(ws::ws_upgrade)).with_state(state).layer(middleware)
}
