//! In-memory sandbox for dry runs and tests.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet},
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use {async_trait::async_trait, tokio::sync::mpsc, tracing::debug};

use crate::{Error, Result, Sandbox, SandboxProcess, SpawnOpts, sandbox_relative};

/// Canned behaviour for a command run in a [`MemorySandbox`].
#[derive(Debug, Clone, Default)]
pub struct ScriptedCommand {
    /// Output chunks delivered as soon as the command starts.
    pub output: Vec<String>,
    pub exit_code: i32,
    /// Time the command takes before exiting.
    pub delay: Option<Duration>,
    /// Never exit on its own; only `kill()` ends it.
    pub hang: bool,
}

#[derive(Debug, Default)]
struct MemoryState {
    files: BTreeMap<PathBuf, String>,
    dirs: BTreeSet<PathBuf>,
    scripts: HashMap<String, ScriptedCommand>,
    failing_paths: HashSet<PathBuf>,
    write_delays: HashMap<PathBuf, Duration>,
    spawned: Vec<String>,
    kills: HashMap<String, usize>,
}

/// Files and directories held in memory. Commands complete immediately with
/// exit code 0 unless scripted.
#[derive(Debug, Clone, Default)]
pub struct MemorySandbox {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySandbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Script the behaviour of `command`.
    pub fn script(&self, command: impl Into<String>, scripted: ScriptedCommand) {
        self.lock().scripts.insert(command.into(), scripted);
    }

    /// Make every mkdir and write targeting `path` fail.
    pub fn fail_path(&self, path: &str) -> Result<()> {
        let path = sandbox_relative(path)?;
        self.lock().failing_paths.insert(path);
        Ok(())
    }

    /// Make writes to `path` take `delay` before the content lands.
    pub fn slow_write(&self, path: &str, delay: Duration) -> Result<()> {
        let path = sandbox_relative(path)?;
        self.lock().write_delays.insert(path, delay);
        Ok(())
    }

    pub fn file(&self, path: &str) -> Option<String> {
        let path = sandbox_relative(path).ok()?;
        self.lock().files.get(&path).cloned()
    }

    pub fn files(&self) -> BTreeMap<PathBuf, String> {
        self.lock().files.clone()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        sandbox_relative(path).is_ok_and(|p| is_root(&p) || self.lock().dirs.contains(&p))
    }

    /// Commands in spawn order.
    pub fn spawned(&self) -> Vec<String> {
        self.lock().spawned.clone()
    }

    pub fn kill_count(&self, command: &str) -> usize {
        self.lock().kills.get(command).copied().unwrap_or(0)
    }
}

fn is_root(path: &Path) -> bool {
    path.as_os_str().is_empty()
}

fn parent_exists(state: &MemoryState, path: &Path) -> bool {
    path.parent()
        .is_none_or(|parent| is_root(parent) || state.dirs.contains(parent))
}

fn not_found(path: &Path) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        format!("no such directory: {}", path.display()),
    ))
}

#[async_trait]
impl Sandbox for MemorySandbox {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn spawn(&self, command: &str, _opts: &SpawnOpts) -> Result<Box<dyn SandboxProcess>> {
        let script = {
            let mut state = self.lock();
            state.spawned.push(command.to_string());
            state.scripts.get(command).cloned().unwrap_or_default()
        };
        debug!(command, "memory sandbox spawn");

        let (tx, rx) = mpsc::unbounded_channel();
        for chunk in &script.output {
            let _ = tx.send(chunk.clone());
        }

        Ok(Box::new(MemoryProcess {
            command: command.to_string(),
            script,
            state: Arc::clone(&self.state),
            output: Some(rx),
            killed: false,
        }))
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let dir = sandbox_relative(path)?;
        let mut state = self.lock();
        if state.failing_paths.contains(&dir) {
            return Err(Error::message(format!("mkdir refused: {}", dir.display())));
        }
        if is_root(&dir) {
            return Ok(());
        }

        if recursive {
            for ancestor in dir.ancestors().filter(|a| !is_root(a)) {
                state.dirs.insert(ancestor.to_path_buf());
            }
        } else {
            if !parent_exists(&state, &dir) {
                return Err(not_found(&dir));
            }
            state.dirs.insert(dir);
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let file = sandbox_relative(path)?;
        let delay = self.lock().write_delays.get(&file).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if state.failing_paths.contains(&file) {
            return Err(Error::message(format!("write refused: {}", file.display())));
        }
        if !parent_exists(&state, &file) {
            return Err(not_found(&file));
        }
        state.files.insert(file, content.to_string());
        Ok(())
    }
}

struct MemoryProcess {
    command: String,
    script: ScriptedCommand,
    state: Arc<Mutex<MemoryState>>,
    output: Option<mpsc::UnboundedReceiver<String>>,
    killed: bool,
}

#[async_trait]
impl SandboxProcess for MemoryProcess {
    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.take()
    }

    async fn wait(&mut self) -> Result<i32> {
        if self.killed {
            return Ok(-1);
        }
        if self.script.hang {
            return std::future::pending().await;
        }
        if let Some(delay) = self.script.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self.script.exit_code)
    }

    async fn kill(&mut self) -> Result<()> {
        self.killed = true;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state.kills.entry(self.command.clone()).or_default() += 1;
        Ok(())
    }
}
