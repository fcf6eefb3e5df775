use std::fmt;

use {
    boltline_protocol::{ActionId, BoltAction},
    serde::Serialize,
};

/// Lifecycle of an action. `Complete`, `Aborted` and `Failed` are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Running,
    Complete,
    Aborted,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Aborted | Self::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Aborted => write!(f, "aborted"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Snapshot of one registered action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionState {
    #[serde(rename = "actionId")]
    pub action_id: ActionId,
    pub action: BoltAction,
    pub status: ActionStatus,
    /// Set once the action has been dispatched.
    pub executed: bool,
    /// Opaque failure message; details go to the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionState {
    pub(crate) fn pending(action_id: ActionId, action: BoltAction) -> Self {
        Self {
            action_id,
            action,
            status: ActionStatus::Pending,
            executed: false,
            error: None,
        }
    }
}

/// Broadcast whenever an action's status changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionUpdate {
    /// Key of the artifact lane (the message id).
    pub artifact: String,
    #[serde(rename = "actionId")]
    pub action_id: ActionId,
    pub status: ActionStatus,
}
