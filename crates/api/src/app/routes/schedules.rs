use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use exportkit_exports::{NewSchedule, SchedulePatch};

use crate::app::services::AppServices;
use crate::app::{dto, errors};
use crate::context::OwnerContext;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_schedule).get(list_schedules))
        .route(
            "/:id",
            get(get_schedule).patch(update_schedule).delete(delete_schedule),
        )
        .route("/:id/toggle", post(toggle_schedule))
}

pub async fn create_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Json(body): Json<NewSchedule>,
) -> axum::response::Response {
    match services.schedules.create(owner.owner_id(), body) {
        Ok(s) => (StatusCode::CREATED, Json(dto::schedule_to_json(&s))).into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn list_schedules(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
) -> axum::response::Response {
    match services.schedules.list(owner.owner_id()) {
        Ok(list) => {
            let items = list.iter().map(dto::schedule_to_json).collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn get_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_schedule_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.schedules.get(owner.owner_id(), id) {
        Ok(s) => (StatusCode::OK, Json(dto::schedule_to_json(&s))).into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn update_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
    Json(body): Json<SchedulePatch>,
) -> axum::response::Response {
    let id = match errors::parse_schedule_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.schedules.update(owner.owner_id(), id, body) {
        Ok(s) => (StatusCode::OK, Json(dto::schedule_to_json(&s))).into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn toggle_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
    Json(body): Json<dto::ToggleScheduleRequest>,
) -> axum::response::Response {
    let id = match errors::parse_schedule_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.schedules.toggle_enabled(owner.owner_id(), id, body.enabled) {
        Ok(s) => (StatusCode::OK, Json(dto::schedule_to_json(&s))).into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}

pub async fn delete_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(owner): Extension<OwnerContext>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_schedule_id(&id) {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match services.schedules.delete(owner.owner_id(), id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::export_error_to_response(e),
    }
}
