//! Inventory counts.
//!
//! A count compares the quantity the books expect with what was found on the
//! shelf. Each difference becomes one adjustment row; matching lines produce
//! nothing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use invrecon_core::{DomainError, RawProductId};

use crate::movement::Direction;

/// One counted product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountedLine {
    pub raw_product_id: RawProductId,
    pub expected_qty: Decimal,
    pub actual_qty: Decimal,
    /// Cost used for surplus stock found during the count.
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

/// Correction derived from a counted line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub raw_product_id: RawProductId,
    pub direction: Direction,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub notes: Option<String>,
}

/// `delta = actual − expected`; positive deltas come IN, negative go OUT.
pub fn adjustments(lines: &[CountedLine]) -> Result<Vec<Adjustment>, DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("an inventory check needs at least one line"));
    }

    let mut out = Vec::new();
    for (idx, line) in lines.iter().enumerate() {
        if lines[..idx].iter().any(|l| l.raw_product_id == line.raw_product_id) {
            return Err(DomainError::validation(format!(
                "line {idx}: product {} is counted twice",
                line.raw_product_id
            )));
        }
        if line.expected_qty < Decimal::ZERO || line.actual_qty < Decimal::ZERO {
            return Err(DomainError::validation(format!(
                "line {idx}: counted quantities cannot be negative"
            )));
        }
        if line.unit_price < Decimal::ZERO {
            return Err(DomainError::validation(format!("line {idx}: unit price cannot be negative")));
        }

        let delta = line.actual_qty - line.expected_qty;
        if delta.is_zero() {
            continue;
        }

        out.push(Adjustment {
            raw_product_id: line.raw_product_id,
            direction: if delta > Decimal::ZERO { Direction::In } else { Direction::Out },
            quantity: delta.abs(),
            unit_price: line.unit_price,
            notes: line.notes.clone(),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counted(expected: i64, actual: i64) -> CountedLine {
        CountedLine {
            raw_product_id: RawProductId::new(),
            expected_qty: Decimal::from(expected),
            actual_qty: Decimal::from(actual),
            unit_price: Decimal::new(300, 2),
            notes: None,
        }
    }

    #[test]
    fn shortage_becomes_outgoing_adjustment() {
        let adj = adjustments(&[counted(15, 12)]).unwrap();
        assert_eq!(adj.len(), 1);
        assert_eq!(adj[0].direction, Direction::Out);
        assert_eq!(adj[0].quantity, Decimal::from(3));
    }

    #[test]
    fn surplus_becomes_incoming_adjustment() {
        let adj = adjustments(&[counted(4, 9)]).unwrap();
        assert_eq!(adj[0].direction, Direction::In);
        assert_eq!(adj[0].quantity, Decimal::from(5));
        assert_eq!(adj[0].unit_price, Decimal::new(300, 2));
    }

    #[test]
    fn matching_lines_are_skipped() {
        let adj = adjustments(&[counted(7, 7), counted(1, 0)]).unwrap();
        assert_eq!(adj.len(), 1);
        assert!(adjustments(&[counted(2, 2)]).unwrap().is_empty());
    }

    #[test]
    fn negative_counts_are_rejected() {
        assert!(matches!(
            adjustments(&[counted(-1, 2)]),
            Err(DomainError::Validation(_))
        ));
        assert!(matches!(adjustments(&[]), Err(DomainError::Validation(_))));
    }

    #[test]
    fn a_product_is_counted_once() {
        let line = counted(3, 1);
        assert!(matches!(
            adjustments(&[line.clone(), line]),
            Err(DomainError::Validation(_))
        ));
    }
}
