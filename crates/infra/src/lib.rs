//! Infrastructure layer: transactional ledger storage, the balance projector,
//! the engine services and configuration.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod projections;
pub mod read_model;
pub mod store;

pub use error::EngineError;

#[cfg(test)]
mod integration_tests;
