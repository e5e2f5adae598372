use anyhow::{Context, Result};
use meeple_rag::cli::commands::{self, CommandStatus};
use meeple_rag::cli::output::Output;
use meeple_rag::cli::Cli;
use meeple_rag::utils::toml_config::{AppConfig, LoggingConfig};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` wins, then `--verbose`, then
/// the configured level. Logs go to stderr.
fn init_tracing(logging: &LoggingConfig, verbose: bool, json: bool) {
    let fallback = if verbose {
        "debug".to_string()
    } else {
        logging.level.clone()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));

    let registry = tracing_subscriber::registry().with(filter);
    if json || logging.json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig> {
    if !cli.config.exists() && cli.uses_default_config() {
        return Ok(AppConfig::default());
    }
    AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse_args();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    let config = load_config(&cli)?;
    init_tracing(&config.logging, cli.verbose, cli.log_json);
    tracing::debug!(config = %cli.config.display(), "Configuration loaded");

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    match commands::run(&cli.command, &config, &output, &cancel).await {
        Ok(CommandStatus::Success) => Ok(ExitCode::SUCCESS),
        Ok(CommandStatus::Failed) => Ok(ExitCode::from(2)),
        Err(e) => {
            output.error(&e.to_string());
            Ok(ExitCode::FAILURE)
        }
    }
}
