use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
};

use invrecon_core::{InvoiceId, ProjectId, WarehouseId};

use crate::app::dto;
use crate::app::errors::{self, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/projects/:project_id/einvoices", post(register_invoice).get(list_invoices))
        .route(
            "/projects/:project_id/einvoices/:invoice_id",
            get(get_invoice).patch(assign_cost_center),
        )
        .route("/projects/:project_id/einvoices/:invoice_id/process", post(process_invoice))
        .route("/projects/:project_id/einvoices/:invoice_id/payment-status", patch(update_payment_status))
        .route(
            "/projects/:project_id/einvoices/:invoice_id/raw-product-status",
            patch(update_raw_product_status),
        )
}

fn ids(project: &str, invoice: &str) -> Result<(ProjectId, InvoiceId), axum::response::Response> {
    Ok((parse_id(project, "project id")?, parse_id(invoice, "invoice id")?))
}

pub async fn register_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
    Json(body): Json<dto::RegisterInvoiceRequest>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let input = match body.into_input() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.engine.register_invoice(project_id, input).await {
        Ok(invoice) => (StatusCode::CREATED, Json(invoice)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
    Path(project): Path<String>,
) -> axum::response::Response {
    let project_id: ProjectId = match parse_id(&project, "project id") {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.engine.list_invoices(project_id).await {
        Ok(invoices) => Json(invoices).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, invoice)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, invoice_id) = match ids(&project, &invoice) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.engine.get_invoice(project_id, invoice_id).await {
        Ok(invoice) => Json(invoice).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

/// Cost-center assignment. Answers with the EXPENSE movement it created.
pub async fn assign_cost_center(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, invoice)): Path<(String, String)>,
    Json(body): Json<dto::AssignCostCenterRequest>,
) -> axum::response::Response {
    let (project_id, invoice_id) = match ids(&project, &invoice) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let cost_center_id: WarehouseId = match parse_id(&body.cost_center_id, "costCenterId") {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services
        .engine
        .assign_to_cost_center(project_id, invoice_id, cost_center_id)
        .await
    {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn process_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, invoice)): Path<(String, String)>,
    Json(body): Json<dto::ProcessInvoiceRequest>,
) -> axum::response::Response {
    let (project_id, invoice_id) = match ids(&project, &invoice) {
        Ok(v) => v,
        Err(r) => return r,
    };
    let warehouse_id: WarehouseId = match parse_id(&body.warehouse_id, "warehouseId") {
        Ok(v) => v,
        Err(r) => return r,
    };
    let selection = match body.selection() {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services
        .engine
        .process_to_warehouse(project_id, invoice_id, warehouse_id, selection)
        .await
    {
        Ok(movement) => (StatusCode::CREATED, Json(movement)).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_payment_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, invoice)): Path<(String, String)>,
    Json(body): Json<dto::PaymentStatusRequest>,
) -> axum::response::Response {
    let (project_id, invoice_id) = match ids(&project, &invoice) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services
        .engine
        .update_payment_status(project_id, invoice_id, body.payment_status)
        .await
    {
        Ok(invoice) => Json(invoice).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn update_raw_product_status(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, invoice)): Path<(String, String)>,
    Json(body): Json<dto::RawProductStatusRequest>,
) -> axum::response::Response {
    let (project_id, invoice_id) = match ids(&project, &invoice) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services
        .engine
        .update_raw_product_status(project_id, invoice_id, body.raw_product_status)
        .await
    {
        Ok(invoice) => Json(invoice).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}
