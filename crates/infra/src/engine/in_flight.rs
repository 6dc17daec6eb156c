//! Per-invoice mutual exclusion for reconciliation operations.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use invrecon_core::InvoiceId;

use crate::error::EngineError;

/// Registry of invoices with a reconciliation in progress in this process.
///
/// A second request for an invoice that is already in flight fails fast with a
/// conflict instead of queueing. Across processes the optimistic version check
/// on the invoice record catches the same race at commit time.
#[derive(Debug, Clone, Default)]
pub struct InFlightInvoices {
    inner: Arc<Mutex<HashSet<InvoiceId>>>,
}

impl InFlightInvoices {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<InvoiceId>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark an invoice as in flight until the returned guard drops.
    pub fn acquire(&self, invoice_id: InvoiceId) -> Result<InFlightGuard, EngineError> {
        if !self.lock().insert(invoice_id) {
            return Err(EngineError::Conflict(format!(
                "invoice {invoice_id} is already being processed"
            )));
        }
        Ok(InFlightGuard {
            registry: self.clone(),
            invoice_id,
        })
    }

    pub fn is_processing(&self, invoice_id: InvoiceId) -> bool {
        self.lock().contains(&invoice_id)
    }

    pub fn in_flight(&self) -> Vec<InvoiceId> {
        let mut ids: Vec<InvoiceId> = self.lock().iter().copied().collect();
        ids.sort();
        ids
    }
}

/// Clears the in-flight mark on drop, whether the operation succeeded or not.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: InFlightInvoices,
    invoice_id: InvoiceId,
}

impl InFlightGuard {
    pub fn invoice_id(&self) -> InvoiceId {
        self.invoice_id
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.invoice_id);
    }
}
