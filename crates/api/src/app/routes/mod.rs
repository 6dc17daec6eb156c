use axum::Router;

pub mod einvoices;
pub mod movements;
pub mod raw_products;
pub mod system;
pub mod warehouses;

/// Router for every project-scoped endpoint (`/projects/:project_id/...`).
pub fn router() -> Router {
    Router::new()
        .merge(warehouses::router())
        .merge(movements::router())
        .merge(einvoices::router())
        .merge(raw_products::router())
        .merge(system::router())
}
