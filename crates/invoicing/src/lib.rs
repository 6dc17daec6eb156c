//! Invoice reconciliation domain.
//!
//! Business rules for supplier invoices (four independent status axes and
//! line-level processing flags) plus the raw-product read model. Pure domain
//! logic, no IO.

pub mod invoice;
pub mod raw_product;

pub use invoice::{
    AssignCostCenter, ChangePaymentStatus, ChangeRawProductStatus, CostCenterAssigned,
    CostCenterStatus, EInvoice, InventoryStatus, InvoiceCommand, InvoiceEvent, InvoiceLine,
    InvoiceRegistered, InvoiceStatus, LineSelection, LinesProcessed, NewInvoiceLine,
    PaymentStatus, PaymentStatusChanged, ProcessLines, RawProductStatus,
    RawProductStatusChanged, RegisterInvoice,
};
pub use raw_product::{PurchaseHistory, RawProduct};
