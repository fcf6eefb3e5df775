use std::{io::Write, path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    boltline_actions::{ActionOutputSink, ActionRunner, ActionStatus, Session, Workbench},
    boltline_config::{BoltlineConfig, PlaceholderStyle, SandboxBackend},
    boltline_parser::{ParseContext, StreamingMessageParser, empty_artifact_element},
    boltline_protocol::{ActionId, BoltAction},
    boltline_sandbox::{LocalSandbox, MemorySandbox, Sandbox},
    clap::Args,
    tokio::{io::AsyncReadExt, sync::broadcast::error::RecvError},
    tracing::{info, warn},
};

#[derive(Args)]
pub struct ReplayArgs {
    /// Response file, or `-` to stream stdin.
    pub input: String,
    /// Message id the response is parsed under.
    #[arg(long, default_value = "msg_1")]
    pub message_id: String,
    /// Characters per simulated streaming update (file input only).
    #[arg(long, default_value_t = 64)]
    pub chunk_size: usize,
    /// Sandbox root for the local backend (overrides config).
    #[arg(long)]
    pub workdir: Option<PathBuf>,
    /// Run against an in-memory sandbox; nothing touches the host.
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ParseArgs {
    /// Response file, or `-` for stdin.
    pub input: String,
    #[arg(long, default_value = "msg_1")]
    pub message_id: String,
    /// Print parser events as JSON lines instead of display text.
    #[arg(long)]
    pub events: bool,
}

/// Final action counts of a replay.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub complete: usize,
    pub aborted: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Prefixes command output with the action it belongs to.
struct StderrOutputSink;

impl ActionOutputSink for StderrOutputSink {
    fn output(&self, artifact: &str, action_id: ActionId, chunk: &str) {
        let mut stderr = std::io::stderr().lock();
        for line in chunk.lines() {
            let _ = writeln!(stderr, "[{artifact}#{action_id}] {line}");
        }
    }
}

pub async fn handle_replay(args: ReplayArgs, config: &BoltlineConfig) -> Result<Summary> {
    let sandbox = build_sandbox(config, &args).await?;
    info!(backend = sandbox.backend_name(), "sandbox ready");

    let mut session = build_session(config, sandbox, Arc::new(StderrOutputSink));
    let mut updates = session.workbench().subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => info!(
                    artifact = %update.artifact,
                    action_id = %update.action_id,
                    status = %update.status,
                    "action status"
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "missed action updates"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut stdout = std::io::stdout();
    if args.input == "-" {
        feed_stdin(&mut session, &args.message_id, &mut stdout).await?;
    } else {
        let text = read_file(&args.input)?;
        feed_text(&mut session, &args.message_id, &text, args.chunk_size, &mut stdout)?;
    }
    writeln!(stdout)?;

    session.shutdown().await;
    let summary = summarize(session.workbench(), &mut std::io::stderr())?;
    drop(session);
    let _ = reporter.await;

    info!(
        complete = summary.complete,
        failed = summary.failed,
        aborted = summary.aborted,
        pending = summary.pending,
        "replay finished"
    );
    Ok(summary)
}

pub async fn handle_parse(args: ParseArgs, config: &BoltlineConfig) -> Result<()> {
    let text = if args.input == "-" {
        let mut text = String::new();
        tokio::io::stdin()
            .read_to_string(&mut text)
            .await
            .context("failed to read stdin")?;
        text
    } else {
        read_file(&args.input)?
    };

    let parser = build_parser(config);
    let mut ctx = ParseContext::new();
    let output = parser.parse(&mut ctx, &args.message_id, &text);
    if ctx.is_inside_artifact(&args.message_id) {
        warn!(message_id = %args.message_id, "response ends inside an artifact");
    }

    let mut stdout = std::io::stdout().lock();
    if args.events {
        for event in &output.events {
            writeln!(stdout, "{}", serde_json::to_string(event)?)?;
        }
    } else {
        writeln!(stdout, "{}", output.display)?;
    }
    Ok(())
}

fn read_file(path: &str) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {path}"))
}

fn build_parser(config: &BoltlineConfig) -> StreamingMessageParser {
    match config.parser.placeholder {
        PlaceholderStyle::Default => StreamingMessageParser::new(),
        PlaceholderStyle::None => {
            StreamingMessageParser::with_artifact_element(Arc::new(empty_artifact_element))
        },
    }
}

async fn build_sandbox(config: &BoltlineConfig, args: &ReplayArgs) -> Result<Arc<dyn Sandbox>> {
    if args.dry_run || config.sandbox.backend == SandboxBackend::Memory {
        return Ok(Arc::new(MemorySandbox::new()));
    }

    let root = args
        .workdir
        .clone()
        .unwrap_or_else(|| config.sandbox.root.clone());
    let sandbox = LocalSandbox::new(root.clone(), config.runner.shell.clone())
        .await
        .with_context(|| format!("failed to prepare sandbox at {}", root.display()))?;
    Ok(Arc::new(sandbox))
}

fn build_session(
    config: &BoltlineConfig,
    sandbox: Arc<dyn Sandbox>,
    sink: Arc<dyn ActionOutputSink>,
) -> Session {
    let runner = ActionRunner::new(sandbox)
        .with_env(config.runner.env.clone())
        .fail_on_nonzero_exit(config.runner.fail_on_nonzero_exit)
        .with_output_sink(sink);
    Session::new(build_parser(config), Workbench::new(Arc::new(runner)))
}

/// Byte offsets at which a streamed copy of `text` is delivered, one update
/// per `chunk_size` characters. The last offset is always `text.len()`.
fn prefix_ends(text: &str, chunk_size: usize) -> Vec<usize> {
    let step = chunk_size.max(1);
    let mut ends: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .skip(step)
        .step_by(step)
        .collect();
    ends.push(text.len());
    ends
}

/// Ingest the current message text and write the newly displayed part.
fn show(
    session: &mut Session,
    message_id: &str,
    text: &str,
    printed: &mut usize,
    out: &mut impl Write,
) -> Result<()> {
    let shown = session.ingest(message_id, text);
    out.write_all(shown[*printed..].as_bytes())?;
    out.flush()?;
    *printed = shown.len();
    Ok(())
}

fn feed_text(
    session: &mut Session,
    message_id: &str,
    text: &str,
    chunk_size: usize,
    out: &mut impl Write,
) -> Result<()> {
    let mut printed = 0;
    for end in prefix_ends(text, chunk_size) {
        show(session, message_id, &text[..end], &mut printed, out)?;
    }
    Ok(())
}

async fn feed_stdin(session: &mut Session, message_id: &str, out: &mut impl Write) -> Result<()> {
    let mut stdin = tokio::io::stdin();
    let mut bytes = Vec::new();
    let mut buf = vec![0u8; 4096];
    let mut printed = 0;

    loop {
        let n = stdin.read(&mut buf).await.context("failed to read stdin")?;
        if n == 0 {
            break;
        }
        bytes.extend_from_slice(&buf[..n]);

        // A read may end inside a multi-byte character.
        let text = match std::str::from_utf8(&bytes) {
            Ok(text) => text,
            Err(e) => std::str::from_utf8(&bytes[..e.valid_up_to()]).unwrap_or_default(),
        };
        show(session, message_id, text, &mut printed, out)?;
    }

    if std::str::from_utf8(&bytes).is_err() {
        warn!("stdin is not valid UTF-8; trailing input ignored");
    }
    Ok(())
}

fn describe(action: &BoltAction) -> &str {
    match action {
        BoltAction::Shell { content } => content.lines().next().unwrap_or_default(),
        BoltAction::File { file_path, .. } => file_path.as_str(),
        BoltAction::Unknown { .. } => "-",
    }
}

fn summarize(workbench: &Workbench, out: &mut impl Write) -> Result<Summary> {
    let mut summary = Summary::default();
    for entry in workbench.artifacts() {
        let artifact = entry.artifact();
        writeln!(
            out,
            "{} ({})",
            artifact.title.as_deref().unwrap_or("untitled"),
            artifact.id.as_deref().unwrap_or("no id")
        )?;

        for state in entry.queue().snapshot() {
            match state.status {
                ActionStatus::Complete => summary.complete += 1,
                ActionStatus::Aborted => summary.aborted += 1,
                ActionStatus::Failed => summary.failed += 1,
                ActionStatus::Pending | ActionStatus::Running => summary.pending += 1,
            }
            writeln!(
                out,
                "  #{:<3} {:<6} {:<9} {}",
                state.action_id.0,
                state.action.kind(),
                state.status.to_string(),
                describe(&state.action)
            )?;
        }
    }
    Ok(summary)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {super::*, boltline_actions::TracingOutputSink, boltline_sandbox::ScriptedCommand};

    const RESPONSE: &str = "Creating the app.\n\n<boltArtifact id=\"demo\" title=\"Demo app\">\n<boltAction type=\"file\" filePath=\"app/main.py\">\nprint('hi')\n</boltAction>\n<boltAction type=\"shell\">python app/main.py</boltAction>\n<boltAction type=\"shell\">make deploy</boltAction>\n</boltArtifact>\n\nRun it with `python app/main.py`.";

    fn memory_config() -> BoltlineConfig {
        let mut config = BoltlineConfig::default();
        config.sandbox.backend = SandboxBackend::Memory;
        config.parser.placeholder = PlaceholderStyle::None;
        config.runner.fail_on_nonzero_exit = true;
        config
    }

    #[test]
    fn prefix_ends_step_by_characters() {
        assert_eq!(prefix_ends("abcdefg", 3), vec![3, 6, 7]);
        assert_eq!(prefix_ends("abc", 3), vec![3]);
        assert_eq!(prefix_ends("", 8), vec![0]);
        assert_eq!(prefix_ends("héllo", 2), vec![3, 5, 6]);
        assert_eq!(prefix_ends("ab", 0), vec![1, 2]);
    }

    #[tokio::test]
    async fn replay_executes_and_summarizes() {
        let config = memory_config();
        let sandbox = Arc::new(MemorySandbox::new());
        sandbox.script("make deploy", ScriptedCommand {
            exit_code: 2,
            ..ScriptedCommand::default()
        });
        let mut session = build_session(&config, sandbox.clone(), Arc::new(TracingOutputSink));

        let mut display = Vec::new();
        feed_text(&mut session, "msg_1", RESPONSE, 5, &mut display).unwrap();
        session.shutdown().await;

        assert_eq!(
            String::from_utf8(display).unwrap(),
            "Creating the app.\n\n\n\nRun it with `python app/main.py`."
        );
        assert_eq!(sandbox.file("app/main.py").as_deref(), Some("print('hi')\n"));
        assert_eq!(sandbox.spawned(), vec!["python app/main.py", "make deploy"]);

        let mut report = Vec::new();
        let summary = summarize(session.workbench(), &mut report).unwrap();
        assert_eq!(summary, Summary {
            complete: 2,
            failed: 1,
            ..Summary::default()
        });
        let report = String::from_utf8(report).unwrap();
        assert!(report.starts_with("Demo app (demo)\n"));
        assert!(report.contains("failed"));
        assert!(report.contains("app/main.py"));
    }

    #[tokio::test]
    async fn local_sandbox_is_rooted_at_workdir() {
        let tmp = tempfile::tempdir().unwrap();
        let args = ReplayArgs {
            input: "-".into(),
            message_id: "msg_1".into(),
            chunk_size: 64,
            workdir: Some(tmp.path().join("ws")),
            dry_run: false,
        };
        let sandbox = build_sandbox(&BoltlineConfig::default(), &args).await.unwrap();
        assert_eq!(sandbox.backend_name(), "local");
        assert!(tmp.path().join("ws").is_dir());

        let dry = ReplayArgs {
            dry_run: true,
            ..args
        };
        let sandbox = build_sandbox(&BoltlineConfig::default(), &dry).await.unwrap();
        assert_eq!(sandbox.backend_name(), "memory");
    }

    #[test]
    fn default_placeholder_is_used_unless_disabled() {
        let mut ctx = ParseContext::new();
        let out = build_parser(&BoltlineConfig::default()).parse(
            &mut ctx,
            "m",
            "<boltArtifact id=\"a\" title=\"t\"></boltArtifact>",
        );
        assert!(out.display.contains("__boltArtifact__"));

        let mut ctx = ParseContext::new();
        let out = build_parser(&memory_config()).parse(
            &mut ctx,
            "m",
            "<boltArtifact id=\"a\" title=\"t\"></boltArtifact>",
        );
        assert!(out.display.is_empty());
    }
}
