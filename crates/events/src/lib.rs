//! Change notifications.
//!
//! Domain crates describe what happened as typed [`Event`]s. After a unit of
//! work commits, the infra layer wraps them in [`EventEnvelope`]s and publishes
//! them on an [`EventBus`] so subscribers (the SSE stream, tests, future
//! read models) can react without polling the store.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod scope;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use scope::ProjectScoped;
