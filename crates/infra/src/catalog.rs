//! Raw-product catalog boundary.
//!
//! The catalog itself is owned by the extraction pipeline. The engine consumes
//! two lookups: article code to product id (when turning invoice lines into
//! movement details) and product by id.

use invrecon_core::{ProjectId, RawProductId};
use invrecon_invoicing::RawProduct;

use crate::error::EngineError;
use crate::read_model::{InMemoryProjectStore, ProjectStore};

pub trait RawProductCatalog: Send + Sync {
    /// Resolve an invoice article code. Codes compare trimmed and case-insensitive.
    fn resolve_article(&self, project_id: ProjectId, article_code: &str) -> Option<RawProductId>;

    fn get(&self, project_id: ProjectId, id: RawProductId) -> Option<RawProduct>;

    /// Register or replace a product.
    fn upsert(&self, product: RawProduct) -> Result<RawProduct, EngineError>;
}

fn normalize(article_code: &str) -> String {
    article_code.trim().to_lowercase()
}

/// Catalog kept in two project-scoped maps: products by id, ids by article code.
#[derive(Debug, Default)]
pub struct InMemoryRawProductCatalog {
    products: InMemoryProjectStore<RawProductId, RawProduct>,
    by_article: InMemoryProjectStore<String, RawProductId>,
}

impl InMemoryRawProductCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RawProductCatalog for InMemoryRawProductCatalog {
    fn resolve_article(&self, project_id: ProjectId, article_code: &str) -> Option<RawProductId> {
        self.by_article.get(project_id, &normalize(article_code))
    }

    fn get(&self, project_id: ProjectId, id: RawProductId) -> Option<RawProduct> {
        self.products.get(project_id, &id)
    }

    fn upsert(&self, product: RawProduct) -> Result<RawProduct, EngineError> {
        product.validate()?;

        let code = normalize(&product.article_code);
        if let Some(owner) = self.by_article.get(product.project_id, &code) {
            if owner != product.id {
                return Err(EngineError::Conflict(format!(
                    "article code {} already belongs to product {owner}",
                    product.article_code
                )));
            }
        }
        if let Some(previous) = self.products.get(product.project_id, &product.id) {
            let previous_code = normalize(&previous.article_code);
            if previous_code != code {
                self.by_article.remove(product.project_id, &previous_code);
            }
        }

        self.by_article.upsert(product.project_id, code, product.id);
        self.products.upsert(product.project_id, product.id, product.clone());
        Ok(product)
    }
}
