mod handlers;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::gateway::Gateway;
use crate::registry::Registry;

/// Shared state available to all handlers via `State<AppState>`.
///
/// Cheap to clone: the registry and gateway share their internals.
#[derive(Debug, Clone)]
pub struct AppState {
    pub registry: Registry,
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(registry: Registry, gateway: Gateway) -> Self {
        Self { registry, gateway }
    }
}

/// Build the task API.
///
/// CORS allows any origin. That is only reasonable while the server is bound
/// to loopback; [`crate::server`] warns when it is not.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/scripts", get(handlers::list_scripts))
        .route("/scripts/{id}", get(handlers::execute_script))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
