/// Config schema types (runner, sandbox, parser).
use std::{collections::BTreeMap, fmt, path::PathBuf};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoltlineConfig {
    pub runner: RunnerConfig,
    pub sandbox: SandboxConfig,
    pub parser: ParserConfig,
}

/// How actions are executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Shell used as `<shell> -c <command>` for shell actions.
    pub shell: String,
    /// Mark shell actions with a non-zero exit code as failed.
    pub fail_on_nonzero_exit: bool,
    /// Environment added to every shell action.
    pub env: BTreeMap<String, String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            shell: "sh".into(),
            fail_on_nonzero_exit: false,
            // Package managers must never wait for a confirmation prompt.
            env: BTreeMap::from([("npm_config_yes".to_string(), "true".to_string())]),
        }
    }
}

/// Sandbox backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxBackend {
    /// Host filesystem and processes under `root`.
    #[default]
    Local,
    /// Nothing touches the host.
    Memory,
}

impl fmt::Display for SandboxBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub backend: SandboxBackend,
    /// Root directory of the local backend.
    pub root: PathBuf,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            backend: SandboxBackend::default(),
            root: PathBuf::from("./workspace"),
        }
    }
}

/// What replaces an artifact in the display text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaceholderStyle {
    /// `<div class="__boltArtifact__" data-message-id="..."></div>`
    #[default]
    Default,
    /// Artifacts are removed from the display text.
    None,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub placeholder: PlaceholderStyle,
}
