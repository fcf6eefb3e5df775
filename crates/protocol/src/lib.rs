//! Artifact/action protocol definitions.
//!
//! Model responses embed work items as pseudo-XML:
//!
//! ```text
//! <boltArtifact title="Todo app" id="todo-app">
//!   <boltAction type="file" filePath="index.js">console.log(1)</boltAction>
//!   <boltAction type="shell">node index.js</boltAction>
//! </boltArtifact>
//! ```
//!
//! Attributes are always double-quoted. Everything outside an artifact is
//! display text.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

// ── Wire constants ──────────────────────────────────────────────────────────

pub const ARTIFACT_TAG: &str = "boltArtifact";
pub const ACTION_TAG: &str = "boltAction";

pub mod attributes {
    pub const ID: &str = "id";
    pub const TITLE: &str = "title";
    pub const TYPE: &str = "type";
    pub const FILE_PATH: &str = "filePath";
}

pub mod action_types {
    pub const SHELL: &str = "shell";
    pub const FILE: &str = "file";
}

/// Attributes of a tag that carry no protocol meaning, kept verbatim.
pub type ExtraAttributes = BTreeMap<String, String>;

// ── Identifiers ─────────────────────────────────────────────────────────────

/// Sequential action number, assigned in discovery order within a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub u32);

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Artifacts ───────────────────────────────────────────────────────────────

/// An artifact discovered in a message. Identity is the message id: the
/// protocol produces at most one artifact per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Author-supplied id. Missing ids are tolerated; such an artifact is
    /// simply not actionable for most hosts.
    pub id: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: ExtraAttributes,
}

// ── Actions ─────────────────────────────────────────────────────────────────

/// A single unit of work inside an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BoltAction {
    Shell {
        content: String,
    },
    File {
        /// Empty when the tag had no `filePath`.
        #[serde(rename = "filePath")]
        file_path: String,
        content: String,
    },
    /// Any other `type` value. Registered by hosts but never executed.
    Unknown {
        #[serde(rename = "actionType")]
        action_type: Option<String>,
        content: String,
    },
}

impl BoltAction {
    pub fn content(&self) -> &str {
        match self {
            Self::Shell { content } | Self::File { content, .. } | Self::Unknown { content, .. } => {
                content
            },
        }
    }

    /// Replace the body, applying the protocol's normalisation: surrounding
    /// whitespace is trimmed and file bodies end with exactly one newline.
    pub fn with_body(self, body: &str) -> Self {
        let trimmed = body.trim();
        match self {
            Self::Shell { .. } => Self::Shell {
                content: trimmed.to_string(),
            },
            Self::File { file_path, .. } => Self::File {
                file_path,
                content: format!("{trimmed}\n"),
            },
            Self::Unknown { action_type, .. } => Self::Unknown {
                action_type,
                content: trimmed.to_string(),
            },
        }
    }

    /// Whether an execution engine knows how to run this action.
    pub fn is_executable(&self) -> bool {
        !matches!(self, Self::Unknown { .. })
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Shell { .. } => action_types::SHELL,
            Self::File { .. } => action_types::FILE,
            Self::Unknown { action_type, .. } => action_type.as_deref().unwrap_or("unknown"),
        }
    }
}

/// An action open/close notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActionEvent {
    #[serde(rename = "artifactId")]
    pub artifact_id: Option<String>,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(rename = "actionId")]
    pub action_id: ActionId,
    pub action: BoltAction,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: ExtraAttributes,
}

// ── Parser events ───────────────────────────────────────────────────────────

/// Element lifecycle transitions discovered while parsing, in buffer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ParserEvent {
    ArtifactOpen(ArtifactRef),
    ArtifactClose(ArtifactRef),
    ActionOpen(ActionEvent),
    ActionClose(ActionEvent),
}

impl ParserEvent {
    pub fn message_id(&self) -> &str {
        match self {
            Self::ArtifactOpen(a) | Self::ArtifactClose(a) => &a.message_id,
            Self::ActionOpen(a) | Self::ActionClose(a) => &a.message_id,
        }
    }
}
