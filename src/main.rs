//! lsp-server-wrapper - run a language server behind a filtering proxy.
//!
//! Usage: `lsp-server-wrapper [--config PATH] [--log-level FILTER] <server> [args...]`
//!
//! The editor talks to this binary over stdin/stdout exactly as it would to
//! the server itself. Logs go to stderr; stdout carries the protocol.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lsp_server_wrapper::{serve_stdio, WrapperConfig};

/// lsp-server-wrapper - filtering proxy for language servers
#[derive(Parser, Debug)]
#[command(name = "lsp-server-wrapper", version, about = "Filtering proxy for language servers")]
struct Cli {
    /// Config file path (TOML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter when RUST_LOG is unset (e.g. info, lsp_server_wrapper=debug)
    #[arg(long)]
    log_level: Option<String>,

    /// Language server command and its arguments, passed through verbatim
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    cmd: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("lsp-server-wrapper: {e:#}");
            2
        }
    };

    // Exit explicitly: the blocking stdin reader would otherwise keep the
    // runtime alive after the session ends.
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = WrapperConfig::load(cli.config.as_deref()).context("Failed to load config")?;

    // Initialize logging (stderr only)
    let filter = std::env::var("RUST_LOG")
        .ok()
        .or(cli.log_level)
        .unwrap_or_else(|| config.log_filter.clone());
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    tracing::info!("Starting lsp-server-wrapper v{}", env!("CARGO_PKG_VERSION"));

    let outcome = serve_stdio(&cli.cmd, &config)
        .await
        .context("Failed to run language server")?;

    if let Err(e) = &outcome.engine {
        tracing::error!("Session ended with error: {}", e);
    }
    let code = outcome.process_exit_code();
    tracing::info!(code, "lsp-server-wrapper exiting");
    Ok(code)
}
