//! Artifact downloads: signed object-storage links and in-process fallbacks.

use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query},
    http::{StatusCode, header},
    response::IntoResponse,
};

use exportkit_infra::exports::StoredObject;

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

/// Public; the URL signature is the credential.
pub async fn signed_object(
    Extension(services): Extension<Arc<AppServices>>,
    Path((bucket, path)): Path<(String, String)>,
    Query(query): Query<dto::SignedUrlQuery>,
) -> axum::response::Response {
    match services.storage.open_signed(&bucket, &path, &query.into()) {
        Ok(object) => object_response(object),
        Err(e) => errors::storage_error_to_response(e),
    }
}

pub async fn ephemeral_artifact(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(token): Path<String>,
) -> axum::response::Response {
    match services.exports.download_ephemeral(owner.owner_id(), &token) {
        Ok(object) => object_response(object),
        Err(e) => errors::export_error_to_response(e),
    }
}

fn object_response(object: StoredObject) -> axum::response::Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, object.content_type)],
        object.bytes,
    )
        .into_response()
}
