use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::put,
};

use invrecon_core::{ProjectId, RawProductId};
use invrecon_invoicing::RawProduct;

use crate::app::dto;
use crate::app::errors::{self, parse_id};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new().route(
        "/projects/:project_id/rawproducts/:raw_product_id",
        put(upsert_raw_product).get(get_raw_product),
    )
}

fn ids(project: &str, product: &str) -> Result<(ProjectId, RawProductId), axum::response::Response> {
    Ok((parse_id(project, "project id")?, parse_id(product, "raw product id")?))
}

pub async fn upsert_raw_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, product)): Path<(String, String)>,
    Json(body): Json<dto::RawProductRequest>,
) -> axum::response::Response {
    let (project_id, raw_product_id) = match ids(&project, &product) {
        Ok(v) => v,
        Err(r) => return r,
    };

    let product = RawProduct {
        id: raw_product_id,
        project_id,
        article_code: body.article_code,
        description: body.description,
        unit: body.unit,
        purchase_history: body.purchase_history,
    };
    match services.catalog.upsert(product) {
        Ok(product) => Json(product).into_response(),
        Err(e) => errors::engine_error_to_response(e),
    }
}

pub async fn get_raw_product(
    Extension(services): Extension<Arc<AppServices>>,
    Path((project, product)): Path<(String, String)>,
) -> axum::response::Response {
    let (project_id, raw_product_id) = match ids(&project, &product) {
        Ok(v) => v,
        Err(r) => return r,
    };

    match services.catalog.get(project_id, raw_product_id) {
        Some(product) => {
            let last_unit_price = product.last_unit_price();
            let average_unit_price = product.average_unit_price();
            Json(serde_json::json!({
                "product": product,
                "lastUnitPrice": last_unit_price,
                "averageUnitPrice": average_unit_price,
            }))
            .into_response()
        }
        None => errors::json_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("raw product {raw_product_id} not found"),
        ),
    }
}
