//! Resource graph execution engine for Jumppad.
//!
//! This crate ties together the resource model, the state store and the client
//! capabilities into the `Engine`: the central API for applying, destroying,
//! refreshing and inspecting a blueprint. A `Registry` maps every resource type
//! to its `Provider`; `graph` builds the dependency DAG; `scheduler` walks it
//! with bounded parallelism; `reconcile` turns desired resources and prior
//! state into the working set a run operates on.

pub mod blueprint;
pub mod concurrency;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod graph;
pub mod lifecycle;
pub mod provider;
pub mod reconcile;
pub mod registry;
pub mod scheduler;

pub use blueprint::{load_blueprint, LoadedBlueprint};
pub use concurrency::{install_signal_handler, CancellationToken, StoreLock};
pub use config::{ApplyOptions, DestroyOptions, EngineConfig};
pub use engine::{DiffReport, Engine, ResourceStatus};
pub use error::{ConfigError, ProviderError, ProviderErrorKind};
pub use events::{Event, EventSink};
pub use graph::Graph;
pub use lifecycle::validate_transition;
pub use provider::{Provider, ProviderContext};
pub use registry::{Registry, RegistryBuilder};
pub use scheduler::{Direction, NodeFailure, Report};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("store error: {0}")]
    Store(#[from] jumppad_store::StoreError),
    #[error("schema error: {0}")]
    Schema(#[from] jumppad_schema::SchemaError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("operation cancelled")]
    Cancelled,
    #[error("{0}")]
    Aggregate(Report),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// True for failures caused by the state file rather than the run.
    pub fn is_state_error(&self) -> bool {
        matches!(
            self,
            Self::Store(
                jumppad_store::StoreError::Corrupt { .. }
                    | jumppad_store::StoreError::UnknownKind { .. }
                    | jumppad_store::StoreError::LockFailed(_)
            )
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display() {
        let e = CoreError::from(ConfigError::Cycle(vec!["a".to_owned(), "b".to_owned()]));
        assert_eq!(e.to_string(), "configuration error: cycle: a, b");
    }

    #[test]
    fn corrupt_state_is_a_state_error() {
        let e = CoreError::from(jumppad_store::StoreError::Corrupt {
            path: "s.json".into(),
            reason: "bad".to_owned(),
        });
        assert!(e.is_state_error());
        assert!(!CoreError::Cancelled.is_state_error());
    }
}
