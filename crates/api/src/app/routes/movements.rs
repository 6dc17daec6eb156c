use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
};

use invrecon_core::{MovementId, ProjectId};

use crate::app::dto;
use crate::app::errors::{self, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/projects/:project_id/stockmovements", get(list_movements))
        .route(
            "/projects/:project_id/stockmovements/:movement_id",
            get(get_movement).delete(delete_movement),
        )
        .route("/projects/:project_id/stockmovements/:movement_id/status", patch(update_status))
}

fn ids(project: &str, movement: &str) -> Result<(ProjectId, MovementId), axum::response::Response> {
    Ok((parse_id(project, "project id")?, parse_id(movement, "movement id")?))
}

pub async fn list_movements(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
    Query(query): Query<dto::MovementQuery>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let filter = match query.into_filter() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.list_movements(project_id, &filter).await {
        Ok(movements) => Json(movements).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, movement)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, movement_id) = match ids(&project, &movement) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.get_movement(project_id, movement_id).await {
        Ok(movement) => Json(movement).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, movement)): Path<(String, String)>,
    Json(body): Json<dto::MovementStatusRequest>,
) -> axum::response::Response {
    let (project_id, movement_id) = match ids(&project, &movement) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.update_status(project_id, movement_id, body.status).await {
        Ok(movement) => Json(movement).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Drafts and cancelled movements only.
pub async fn delete_movement(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, movement)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, movement_id) = match ids(&project, &movement) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.delete_movement(project_id, movement_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
