//! Host filesystem and processes, confined to a root directory.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
};

use {
    async_trait::async_trait,
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
        sync::mpsc,
    },
    tracing::{debug, info, warn},
};

use crate::{Error, Result, Sandbox, SandboxProcess, SpawnOpts, sandbox_relative};

/// Runs commands as `<shell> -c <command>` inside `root`.
#[derive(Debug, Clone)]
pub struct LocalSandbox {
    root: PathBuf,
    shell: String,
}

impl LocalSandbox {
    /// Create the sandbox, creating `root` if it does not exist.
    pub async fn new(root: impl Into<PathBuf>, shell: impl Into<String>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|source| Error::Root {
                path: root.clone(),
                source,
            })?;
        let shell = shell.into();
        info!(root = %root.display(), shell = %shell, "local sandbox ready");
        Ok(Self { root, shell })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute host path for a sandbox path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(sandbox_relative(path)?))
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn spawn(&self, command: &str, opts: &SpawnOpts) -> Result<Box<dyn SandboxProcess>> {
        let cwd = match opts.working_dir.as_deref() {
            Some(dir) => self.resolve(dir)?,
            None => self.root.clone(),
        };
        debug!(command, cwd = %cwd.display(), "spawning");

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(command).current_dir(&cwd);
        for (k, v) in &opts.env {
            cmd.env(k, v);
        }
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Prevent the child from inheriting stdin.
        cmd.stdin(Stdio::null());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|source| Error::Spawn {
            command: command.to_string(),
            source,
        })?;

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, tx));
        }

        Ok(Box::new(LocalProcess {
            child,
            output: Some(rx),
        }))
    }

    async fn mkdir(&self, path: &str, recursive: bool) -> Result<()> {
        let dir = self.resolve(path)?;
        if recursive {
            tokio::fs::create_dir_all(&dir).await?;
        } else {
            tokio::fs::create_dir(&dir).await?;
        }
        Ok(())
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<()> {
        let file = self.resolve(path)?;
        tokio::fs::write(&file, content).await?;
        Ok(())
    }
}

struct LocalProcess {
    child: Child,
    output: Option<mpsc::UnboundedReceiver<String>>,
}

#[async_trait]
impl SandboxProcess for LocalProcess {
    fn take_output(&mut self) -> Option<mpsc::UnboundedReceiver<String>> {
        self.output.take()
    }

    async fn wait(&mut self) -> Result<i32> {
        let status = self.child.wait().await?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }
}

/// Forward a pipe line by line, keeping line terminators. Invalid UTF-8 is
/// replaced rather than dropped.
async fn forward_lines<R>(pipe: R, tx: mpsc::UnboundedSender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                if tx.send(String::from_utf8_lossy(&line).into_owned()).is_err() {
                    break;
                }
            },
            Err(e) => {
                warn!(error = %e, "failed to read process output");
                break;
            },
        }
    }
}
