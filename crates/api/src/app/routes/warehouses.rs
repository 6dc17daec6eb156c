use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, Query},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};

use invrecon_core::{ProjectId, WarehouseId};

use crate::app::errors::{self, parse_id};
use crate::app::services::AppServices;
use crate::app::dto;

pub fn router() -> Router {
    Router::new()
        .route("/projects/:project_id/warehouses", post(create_warehouse).get(list_warehouses))
        .route("/projects/:project_id/warehouses/transfer", post(create_transfer))
        .route(
            "/projects/:project_id/warehouses/:warehouse_id",
            get(get_warehouse).patch(update_warehouse).delete(delete_warehouse),
        )
        .route("/projects/:project_id/warehouses/:warehouse_id/active", patch(set_active))
        .route("/projects/:project_id/warehouses/:warehouse_id/inbound", post(create_inbound))
        .route("/projects/:project_id/warehouses/:warehouse_id/outbound", post(create_outbound))
        .route("/projects/:project_id/warehouses/:warehouse_id/inventorycheck", post(create_inventory_check))
        .route("/projects/:project_id/warehouses/:warehouse_id/inventory", get(list_inventory))
        .route("/projects/:project_id/warehouses/:warehouse_id/inventory/summary", get(inventory_summary))
}

fn ids(project: &str, warehouse: &str) -> Result<(ProjectId, WarehouseId), axum::response::Response> {
    Ok((parse_id(project, "project id")?, parse_id(warehouse, "warehouse id")?))
}

pub async fn create_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
    Json(body): Json<dto::CreateWarehouseRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.registry.create(project_id, input).await {
        Ok(warehouse) => (StatusCode::CREATED, Json(warehouse)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_warehouses(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
    Query(query): Query<dto::ListWarehousesQuery>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.registry.list(project_id, query.active.unwrap_or(false)).await {
        Ok(warehouses) => Json(warehouses).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.registry.get(project_id, warehouse_id).await {
        Ok(warehouse) => Json(warehouse).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
    Json(body): Json<dto::UpdateWarehouseRequest>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.registry.update(project_id, warehouse_id, body.into()).await {
        Ok(warehouse) => Json(warehouse).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn set_active(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
    Json(body): Json<dto::SetActiveRequest>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.registry.set_active(project_id, warehouse_id, body.is_active).await {
        Ok(warehouse) => Json(warehouse).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn delete_warehouse(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.registry.delete(project_id, warehouse_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn create_inbound(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
    Json(body): Json<dto::MovementRequest>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.create_inbound(project_id, warehouse_id, input).await {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn create_outbound(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
    Json(body): Json<dto::MovementRequest>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.create_outbound(project_id, warehouse_id, input).await {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Answers with the outgoing leg; it links to the incoming one.
pub async fn create_transfer(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
    Json(body): Json<dto::TransferRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.create_transfer(project_id, input).await {
        Ok(transfer) => (StatusCode::CREATED, Json(transfer.outbound)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn create_inventory_check(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
    Json(body): Json<dto::InventoryCheckRequest>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.create_inventory_check(project_id, warehouse_id, input).await {
        Ok(Some(movement)) => (StatusCode::CREATED, Json(movement)).into_response(),
        Ok(None) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_inventory(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.list_balances(project_id, warehouse_id).await {
        Ok(balances) => Json(balances).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn inventory_summary(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, warehouse)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, warehouse_id) = match ids(&project, &warehouse) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.ledger.inventory_summary(project_id, warehouse_id).await {
        Ok(summary) => Json(summary).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
