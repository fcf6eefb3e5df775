//! Execution environments for actions.
//!
//! A [`Sandbox`] owns a directory tree and can run shell commands inside it.
//! Paths handed to a sandbox are always interpreted relative to its root.

pub mod error;
pub mod local;
pub mod memory;

use std::path::{Component, Path, PathBuf};

use {async_trait::async_trait, tokio::sync::mpsc};

pub use {
    error::{Context, Error, Result},
    local::LocalSandbox,
    memory::{MemorySandbox, ScriptedCommand},
};

/// Options for [`Sandbox::spawn`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOpts {
    /// Extra environment variables for the command.
    pub env: Vec<(String, String)>,
    /// Working directory relative to the sandbox root.
    pub working_dir: Option<String>,
}

/// A command started by a sandbox.
#[async_trait]
pub trait SandboxProcess: Send {
    /// Combined stdout/stderr stream. Returns `None` once taken.
    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>>;

    /// Wait for the command to exit and return its exit code. Commands
    /// terminated by a signal report `-1`.
    async fn wait(&mut self) -> Result<i32>;

    /// Terminate the command.
    async fn kill(&mut self) -> Result<()>;
}

/// Trait for execution environments.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Human-readable backend name ("local", "memory").
    fn backend_name(&self) -> &'static str;

    async fn spawn(&self, command: &str, opts: &SpawnOpts) -> Result<Box<dyn SandboxProcess>>;

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()>;

    async fn write_file(&self, path: &str, content: &str) -> Result<()>;
}

/// Normalise a sandbox path to a relative path. A leading `/` refers to the
/// sandbox root; `..` is rejected.
pub fn sandbox_relative(path: &str) -> Result<PathBuf> {
    let mut relative = PathBuf::new();
    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => relative.push(part),
            Component::CurDir => {},
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(Error::PathEscape {
                    path: path.to_string(),
                });
            },
        }
    }
    Ok(relative)
}
