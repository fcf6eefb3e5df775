mod config_commands;
mod replay_commands;

use std::{path::PathBuf, process::ExitCode};

use {
    boltline_config::BoltlineConfig,
    clap::{Parser, Subcommand},
    tracing::{debug, info},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "boltline", about = "Parse and run artifacts embedded in LLM responses")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to use instead of the standard locations.
    #[arg(long, global = true, env = "BOLTLINE_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream a response through the parser and execute its actions.
    Replay(replay_commands::ReplayArgs),
    /// Print the display text (or parser events) of a response.
    Parse(replay_commands::ParseArgs),
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

/// Logs go to stderr; stdout carries display text.
fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<BoltlineConfig> {
    match &cli.config {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            Ok(boltline_config::load_config(path)?)
        },
        None => Ok(boltline_config::discover_and_load()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "boltline starting");
    let config = load_config(&cli)?;

    match cli.command {
        Commands::Replay(args) => {
            let summary = replay_commands::handle_replay(args, &config).await?;
            Ok(if summary.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        },
        Commands::Parse(args) => {
            replay_commands::handle_parse(args, &config).await?;
            Ok(ExitCode::SUCCESS)
        },
        Commands::Config { action } => {
            config_commands::handle_config(action, &config, cli.config.as_deref())?;
            Ok(ExitCode::SUCCESS)
        },
    }
}
