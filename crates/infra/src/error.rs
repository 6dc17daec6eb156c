//! Error kinds surfaced by the engine services.

use thiserror::Error;

use invrecon_core::DomainError;

use crate::store::StoreError;

/// Service-level error. Every failure a caller can observe is one of these four.
///
/// Validation and conflict errors are raised before anything is written;
/// transport errors roll the whole unit of work back.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("storage unavailable: {0}")]
    Transport(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Transport(_) => "transport",
        }
    }
}

impl From<DomainError> for EngineError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) | DomainError::InvalidId(msg) => EngineError::Validation(msg),
            DomainError::NotFound(what) => EngineError::NotFound(what),
            DomainError::Conflict(msg) => EngineError::Conflict(msg),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Concurrency(msg) => EngineError::Conflict(msg),
            StoreError::NotFound(what) => EngineError::NotFound(what),
            StoreError::Serialization(msg) | StoreError::Transport(msg) => EngineError::Transport(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_ids_are_validation_errors() {
        let err: EngineError = DomainError::invalid_id("nope").into();
        assert_eq!(err, EngineError::Validation("nope".to_string()));
    }

    #[test]
    fn lost_races_are_conflicts() {
        let err: EngineError = StoreError::Concurrency("version 3 != 4".to_string()).into();
        assert_eq!(err.kind(), "conflict");
    }
}
