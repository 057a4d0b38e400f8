use axum::{Router, routing::get};

pub mod downloads;
pub mod exports;
pub mod schedules;
pub mod system;

/// Router for all authenticated (owner-scoped) endpoints.
pub fn router() -> Router {
    Router::new()
        .route("/whoami", get(system::whoami))
        .route("/artifacts/:token", get(downloads::ephemeral_artifact))
        .nest("/exports", exports::router())
        .nest("/schedules", schedules::router())
}

/// Endpoints reachable without a bearer token.
pub fn public_router() -> Router {
    Router::new()
        .route("/health", get(system::health))
        .route("/storage/:bucket/*path", get(downloads::signed_object))
}
