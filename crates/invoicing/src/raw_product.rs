//! Raw-product read model.
//!
//! Products are created and enriched by the extraction pipeline. The engine only
//! reads them to resolve invoice article codes and to look at price trends.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use invrecon_core::{DomainError, InvoiceId, ProjectId, RawProductId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseHistory {
    pub invoice_id: InvoiceId,
    pub purchase_date: DateTime<Utc>,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawProduct {
    pub id: RawProductId,
    pub project_id: ProjectId,
    pub article_code: String,
    pub description: Option<String>,
    pub unit: Option<String>,
    #[serde(default)]
    pub purchase_history: Vec<PurchaseHistory>,
}

impl RawProduct {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.article_code.trim().is_empty() {
            return Err(DomainError::validation("article code cannot be empty"));
        }
        for (idx, entry) in self.purchase_history.iter().enumerate() {
            if entry.quantity < Decimal::ZERO || entry.unit_price < Decimal::ZERO {
                return Err(DomainError::validation(format!(
                    "purchase {idx}: quantity and unit price cannot be negative"
                )));
            }
        }
        Ok(())
    }

    /// Unit price of the most recent purchase.
    pub fn last_unit_price(&self) -> Option<Decimal> {
        self.purchase_history
            .iter()
            .max_by_key(|p| p.purchase_date)
            .map(|p| p.unit_price)
    }

    /// Quantity-weighted mean unit price over the whole history.
    pub fn average_unit_price(&self) -> Option<Decimal> {
        let quantity: Decimal = self.purchase_history.iter().map(|p| p.quantity).sum();
        if quantity.is_zero() {
            return None;
        }
        let value: Decimal = self
            .purchase_history
            .iter()
            .map(|p| p.quantity * p.unit_price)
            .sum();
        value.checked_div(quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u32) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(&format!("2024-03-{day:02}T09:00:00Z"))
            .unwrap()
            .with_timezone(&Utc)
    }

    fn purchase(day: u32, qty: i64, price_cents: i64) -> PurchaseHistory {
        let quantity = Decimal::from(qty);
        let unit_price = Decimal::new(price_cents, 2);
        PurchaseHistory {
            invoice_id: InvoiceId::new(),
            purchase_date: at(day),
            quantity,
            unit_price,
            total_price: quantity * unit_price,
        }
    }

    fn product(history: Vec<PurchaseHistory>) -> RawProduct {
        RawProduct {
            id: RawProductId::new(),
            project_id: ProjectId::new(),
            article_code: "FLOUR-25".to_string(),
            description: Some("Flour 25kg".to_string()),
            unit: Some("bag".to_string()),
            purchase_history: history,
        }
    }

    #[test]
    fn price_trends() {
        let p = product(vec![purchase(5, 10, 400), purchase(1, 10, 200)]);
        assert_eq!(p.last_unit_price(), Some(Decimal::from(4)));
        assert_eq!(p.average_unit_price(), Some(Decimal::from(3)));
    }

    #[test]
    fn empty_history_has_no_prices() {
        let p = product(Vec::new());
        assert_eq!(p.last_unit_price(), None);
        assert_eq!(p.average_unit_price(), None);
    }

    #[test]
    fn blank_article_code_is_rejected() {
        let mut p = product(Vec::new());
        p.article_code = "  ".to_string();
        assert!(matches!(p.validate(), Err(DomainError::Validation(_))));
    }
}
