use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use exportkit_exports::ExportRequest;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_export).get(list_exports))
        .route("/:id", get(get_export).delete(delete_export))
        .route("/:id/refresh-url", post(refresh_download_url))
}

/// Runs the export in-request; the response carries the terminal job.
pub async fn create_export(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<ExportRequest>,
) -> axum::response::Response {
    match services.exports.create(owner.owner_id(), body).await {
        Ok(created) => (
            StatusCode::CREATED,
            Json(serde_json::json!({
                "export": dto::export_to_json(&created.export),
                "download_url": created.download_url,
            })),
        )
            .into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn list_exports(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Query(query): Query<dto::ListExportsQuery>,
) -> axum::response::Response {
    let page = match services.exports.list_exports(owner.owner_id(), query.page_request()) {
        Ok(p) => p,
        Err(e) => return errors::export_error_to_response(e),
    };

    let items = page.items.iter().map(dto::export_to_json).collect::<Vec<_>>();
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "items": items,
            "total": page.total,
            "page": page.page,
            "page_size": page.page_size,
        })),
    )
        .into_response()
}

pub async fn get_export(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_export_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.exports.get_export(owner.owner_id(), id) {
        Ok(job) => (StatusCode::OK, Json(dto::export_to_json(&job))).into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn delete_export(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_export_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.exports.delete_export(owner.owner_id(), id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn refresh_download_url(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_export_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    let url = match services.exports.refresh_download_url(owner.owner_id(), id).await {
        Ok(url) => url,
        Err(e) => return errors::export_error_to_response(e),
    };
    match services.exports.get_export(owner.owner_id(), id) {
        Ok(job) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "download_url": url,
                "download_url_expires_at": job.download_url_expires_at,
            })),
        )
            .into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}
