use std::sync::Arc;

use axum::{extract::State, http::HeaderMap, middleware::Next, response::Response};
use chrono::Utc;
use tracing::debug;

use exportkit_auth::JwtValidator;
use exportkit_infra::exports::ExportError;

use crate::app::errors;
use crate::context::OwnerContext;

#[derive(Clone)]
pub struct AuthState {
    pub jwt: Arc<dyn JwtValidator>,
}

/// Rejects requests without a valid bearer token before any handler runs.
pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(token) = extract_bearer(req.headers()) else {
        return errors::export_error_to_response(ExportError::AuthenticationRequired);
    };

    let claims = match state.jwt.validate(token, Utc::now()) {
        Ok(claims) => claims,
        Err(e) => {
            debug!(error = %e, "bearer token rejected");
            return errors::export_error_to_response(ExportError::AuthenticationRequired);
        }
    };

    req.extensions_mut()
        .insert(OwnerContext::new(claims.sub, claims.roles));

    next.run(req).await
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?;
    let header = header.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        return None;
    }
    Some(token)
}
