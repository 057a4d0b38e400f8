use axum::{Json, http::StatusCode, response::IntoResponse};

use crate::context::OwnerContext;

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn whoami(
    axum::extract::Extension(owner): axum::extract::Extension<OwnerContext>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "owner_id": owner.owner_id().to_string(),
        "roles": owner.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
    }))
}
