use serde::{Deserialize, Serialize};

/// Lifecycle status of a resource within and across runs.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    PendingCreation,
    PendingUpdate,
    PendingModification,
    Applied,
    Failed,
    Destroyed,
    Disabled,
}

impl Status {
    pub fn is_pending(self) -> bool {
        matches!(
            self,
            Status::PendingCreation | Status::PendingUpdate | Status::PendingModification
        )
    }

    /// Terminal statuses end a resource's participation in a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Applied | Status::Failed | Status::Destroyed | Status::Disabled
        )
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::PendingCreation => write!(f, "pending_creation"),
            Status::PendingUpdate => write!(f, "pending_update"),
            Status::PendingModification => write!(f, "pending_modification"),
            Status::Applied => write!(f, "applied"),
            Status::Failed => write!(f, "failed"),
            Status::Destroyed => write!(f, "destroyed"),
            Status::Disabled => write!(f, "disabled"),
        }
    }
}
