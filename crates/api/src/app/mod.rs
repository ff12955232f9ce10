//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: engine, stores and the realtime relay
//! - `routes/`: HTTP routes + handlers (one file per document area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use tallyerp_infra::config::AppConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router around already-wired services.
pub fn build_app(services: Arc<services::AppServices>) -> Router {
    // Protected routes: require the caller context headers.
    let protected = routes::router()
        .layer(Extension(services))
        .layer(axum::middleware::from_fn(middleware::context_middleware));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(protected)
        .layer(ServiceBuilder::new())
}

/// Router over in-memory stores; used by the black-box tests.
pub fn build_in_memory_app(config: &AppConfig) -> Router {
    build_app(Arc::new(services::AppServices::in_memory(config)))
}
