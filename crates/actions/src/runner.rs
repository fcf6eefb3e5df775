use std::sync::Arc;

use {
    anyhow::{Context, Result, bail},
    boltline_protocol::{ActionId, BoltAction},
    boltline_sandbox::{Sandbox, SpawnOpts},
    tokio_util::sync::CancellationToken,
    tracing::{debug, error},
};

/// Receives the combined output of running shell actions.
pub trait ActionOutputSink: Send + Sync {
    fn output(&self, artifact: &str, action_id: ActionId, chunk: &str);
}

/// Logs output chunks at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingOutputSink;

impl ActionOutputSink for TracingOutputSink {
    fn output(&self, artifact: &str, action_id: ActionId, chunk: &str) {
        debug!(artifact, %action_id, output = chunk.trim_end(), "action output");
    }
}

/// Executes single actions against a sandbox.
pub struct ActionRunner {
    sandbox: Arc<dyn Sandbox>,
    sink: Arc<dyn ActionOutputSink>,
    env: Vec<(String, String)>,
    fail_on_nonzero_exit: bool,
}

impl ActionRunner {
    pub fn new(sandbox: Arc<dyn Sandbox>) -> Self {
        Self {
            sandbox,
            sink: Arc::new(TracingOutputSink),
            env: Vec::new(),
            fail_on_nonzero_exit: false,
        }
    }

    #[must_use]
    pub fn with_output_sink(mut self, sink: Arc<dyn ActionOutputSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Environment added to every shell action.
    #[must_use]
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env = env.into_iter().collect();
        self
    }

    /// Treat a non-zero exit code as a failed action.
    #[must_use]
    pub fn fail_on_nonzero_exit(mut self, enabled: bool) -> Self {
        self.fail_on_nonzero_exit = enabled;
        self
    }

    pub fn sandbox(&self) -> &Arc<dyn Sandbox> {
        &self.sandbox
    }

    /// Run one action to completion. Returns early, after killing any running
    /// process, once `abort` fires.
    pub async fn execute(
        &self,
        artifact: &str,
        action_id: ActionId,
        action: &BoltAction,
        abort: &CancellationToken,
    ) -> Result<()> {
        match action {
            BoltAction::Shell { content } => {
                self.run_shell(artifact, action_id, content, abort).await
            },
            BoltAction::File { file_path, content } => self.write_file(file_path, content).await,
            BoltAction::Unknown { action_type, .. } => {
                bail!("unsupported action type: {}", action_type.as_deref().unwrap_or("none"))
            },
        }
    }

    async fn run_shell(
        &self,
        artifact: &str,
        action_id: ActionId,
        command: &str,
        abort: &CancellationToken,
    ) -> Result<()> {
        let opts = SpawnOpts {
            env: self.env.clone(),
            working_dir: None,
        };
        let mut process = self
            .sandbox
            .spawn(command, &opts)
            .await
            .with_context(|| format!("failed to spawn `{command}`"))?;

        let forwarder = process.take_output().map(|mut output| {
            let sink = Arc::clone(&self.sink);
            let artifact = artifact.to_string();
            tokio::spawn(async move {
                while let Some(chunk) = output.recv().await {
                    sink.output(&artifact, action_id, &chunk);
                }
            })
        });

        let exited = tokio::select! {
            status = process.wait() => Some(status),
            () = abort.cancelled() => None,
        };

        let Some(status) = exited else {
            debug!(artifact, %action_id, command, "aborting shell action");
            let killed = process.kill().await;
            if let Some(forwarder) = forwarder {
                forwarder.abort();
            }
            killed.context("failed to kill aborted command")?;
            return Ok(());
        };

        // The output has to be fully delivered before the action counts as done.
        if let Some(mut forwarder) = forwarder {
            tokio::select! {
                _ = &mut forwarder => {},
                () = abort.cancelled() => forwarder.abort(),
            }
        }

        let exit_code = status.with_context(|| format!("failed waiting for `{command}`"))?;
        debug!(artifact, %action_id, command, exit_code, "shell action exited");
        if exit_code != 0 && self.fail_on_nonzero_exit {
            bail!("`{command}` exited with code {exit_code}");
        }
        Ok(())
    }

    async fn write_file(&self, file_path: &str, content: &str) -> Result<()> {
        if let Some(folder) = parent_folder(file_path) {
            match self.sandbox.mkdir(folder, true).await {
                Ok(()) => debug!(folder, "created folder"),
                Err(e) => error!(folder, error = %e, "failed to create folder"),
            }
        }

        self.sandbox
            .write_file(file_path, content)
            .await
            .with_context(|| format!("failed to write {file_path}"))?;
        debug!(file_path, "file written");
        Ok(())
    }
}

/// Directory that has to exist before `file_path` can be written, or `None`
/// when it is the sandbox root.
fn parent_folder(file_path: &str) -> Option<&str> {
    let path = file_path.trim_end_matches('/');
    let folder = path.rfind('/').map_or("", |i| &path[..i]).trim_end_matches('/');
    (!folder.is_empty() && folder != ".").then_some(folder)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use {
        super::*,
        boltline_sandbox::{LocalSandbox, MemorySandbox, ScriptedCommand},
        rstest::rstest,
    };

    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<String>>,
    }

    impl ActionOutputSink for RecordingSink {
        fn output(&self, _artifact: &str, _action_id: ActionId, chunk: &str) {
            self.chunks.lock().unwrap().push(chunk.to_string());
        }
    }

    fn shell(command: &str) -> BoltAction {
        BoltAction::Shell {
            content: command.into(),
        }
    }

    fn file(path: &str, content: &str) -> BoltAction {
        BoltAction::File {
            file_path: path.into(),
            content: content.into(),
        }
    }

    #[rstest]
    #[case("index.js", None)]
    #[case("./index.js", None)]
    #[case("/index.js", None)]
    #[case("src/index.js", Some("src"))]
    #[case("src//index.js", Some("src"))]
    #[case("/src/components/App.jsx", Some("/src/components"))]
    #[case("", None)]
    fn parent_folder_of(#[case] path: &str, #[case] expected: Option<&str>) {
        assert_eq!(parent_folder(path), expected);
    }

    #[tokio::test]
    async fn file_action_creates_folder_and_writes() {
        let sandbox = Arc::new(MemorySandbox::new());
        let runner = ActionRunner::new(sandbox.clone());
        runner
            .execute("m", ActionId(0), &file("src/lib/util.js", "x\n"), &CancellationToken::new())
            .await
            .unwrap();
        assert!(sandbox.has_dir("src/lib"));
        assert_eq!(sandbox.file("src/lib/util.js").as_deref(), Some("x\n"));
    }

    #[tokio::test]
    async fn folder_failure_still_attempts_write() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.mkdir("src", true).await.unwrap();
        sandbox.fail_path("src").unwrap();

        let runner = ActionRunner::new(sandbox.clone());
        runner
            .execute("m", ActionId(0), &file("src/a.js", "a\n"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(sandbox.file("src/a.js").as_deref(), Some("a\n"));
    }

    #[tokio::test]
    async fn write_failure_is_an_error() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.fail_path("a.js").unwrap();
        let runner = ActionRunner::new(sandbox);
        let err = runner
            .execute("m", ActionId(0), &file("a.js", "a\n"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("a.js"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_complete_by_default() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("false", ScriptedCommand {
            exit_code: 1,
            ..ScriptedCommand::default()
        });

        let lenient = ActionRunner::new(sandbox.clone());
        lenient
            .execute("m", ActionId(0), &shell("false"), &CancellationToken::new())
            .await
            .unwrap();

        let strict = ActionRunner::new(sandbox).fail_on_nonzero_exit(true);
        assert!(
            strict
                .execute("m", ActionId(0), &shell("false"), &CancellationToken::new())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn output_reaches_sink() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("npm install", ScriptedCommand {
            output: vec!["added 1 package\n".into()],
            ..ScriptedCommand::default()
        });
        let sink = Arc::new(RecordingSink::default());
        let runner = ActionRunner::new(sandbox).with_output_sink(sink.clone());

        runner
            .execute("m", ActionId(0), &shell("npm install"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*sink.chunks.lock().unwrap(), vec!["added 1 package\n"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn all_output_is_delivered_before_execute_returns() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(LocalSandbox::new(tmp.path(), "sh").await.unwrap());

        for run in 0..20 {
            let sink = Arc::new(RecordingSink::default());
            let runner = ActionRunner::new(sandbox.clone()).with_output_sink(sink.clone());
            runner
                .execute("m", ActionId(0), &shell("seq 1 200"), &CancellationToken::new())
                .await
                .unwrap();

            let chunks = sink.chunks.lock().unwrap();
            assert_eq!(chunks.len(), 200, "run {run}");
            assert_eq!(chunks.last().map(String::as_str), Some("200\n"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_kills_running_command_once() {
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("npm run dev", ScriptedCommand {
            hang: true,
            ..ScriptedCommand::default()
        });
        let runner = ActionRunner::new(sandbox.clone());
        let abort = CancellationToken::new();

        let trigger = abort.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        runner
            .execute("m", ActionId(0), &shell("npm run dev"), &abort)
            .await
            .unwrap();
        assert_eq!(sandbox.kill_count("npm run dev"), 1);
    }

    #[tokio::test]
    async fn env_is_passed_to_local_commands() {
        let tmp = tempfile::tempdir().unwrap();
        let sandbox = Arc::new(LocalSandbox::new(tmp.path(), "sh").await.unwrap());
        let runner = ActionRunner::new(sandbox)
            .with_env([("npm_config_yes".to_string(), "true".to_string())]);

        runner
            .execute(
                "m",
                ActionId(0),
                &shell("printf %s \"$npm_config_yes\" > env.txt"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(tmp.path().join("env.txt")).unwrap(), "true");
    }

    #[tokio::test]
    async fn unknown_actions_are_rejected() {
        let runner = ActionRunner::new(Arc::new(MemorySandbox::new()));
        let action = BoltAction::Unknown {
            action_type: Some("deploy".into()),
            content: String::new(),
        };
        assert!(
            runner
                .execute("m", ActionId(0), &action, &CancellationToken::new())
                .await
                .is_err()
        );
    }
}
