//! Project-isolated read model storage.

pub mod project_store;

pub use project_store::{InMemoryProjectStore, ProjectStore};
