use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};

use invrecon_core::ProjectId;

use crate::app::errors::{self, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/projects/:project_id/balances/rebuild", post(rebuild_balances))
        .route("/projects/:project_id/stream", get(stream))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn rebuild_balances(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.rebuild_balances(project_id).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
) -> axum::response::Response {
    match parse_id::<ProjectId>(&project, "project id") {
        Ok(project_id) => services.project_sse_stream(project_id).into_response(),
        Err(r) => r,
    }
}
