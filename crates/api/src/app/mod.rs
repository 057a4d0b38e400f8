//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: stores, collaborators and export services
//! - `routes/`: HTTP routes + handlers (one file per area)
//! - `dto.rs`: request DTOs and JSON mapping helpers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use exportkit_infra::ExportConfig;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router with default collaborators (public entrypoint
/// used by `main.rs`).
pub fn build_app(config: &ExportConfig) -> Router {
    let services = services::build_services(config, services::Collaborators::default());
    build_app_with_services(config, services)
}

/// Build the router around pre-wired services.
pub fn build_app_with_services(config: &ExportConfig, services: services::AppServices) -> Router {
    let jwt = Arc::new(exportkit_auth::Hs256JwtValidator::new(
        config.jwt_secret.clone().into_bytes(),
    ));
    let auth_state = middleware::AuthState { jwt };

    // Protected routes: require a bearer token and derive the owner from it.
    let protected = routes::router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .merge(routes::public_router())
        .merge(protected)
        .layer(Extension(Arc::new(services)))
        .layer(ServiceBuilder::new())
}
