//! Shared domain building blocks: ids, errors and the aggregate traits.
//!
//! Identifiers, the domain error model and the aggregate contracts used by the
//! warehouse, stock and invoicing crates. No IO lives here.

pub mod aggregate;
pub mod entity;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use entity::Entity;
pub use error::{DomainError, DomainResult};
pub use id::{InvoiceId, MovementId, PartnerId, ProjectId, RawProductId, SupplierId, WarehouseId};
