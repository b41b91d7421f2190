mod error;
mod session;

use std::fmt;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use chat_connection::{ChatClient, ConnectionConfig, ConnectionOptions};
use clap::Parser;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::fmt::time::FormatTime;
use tracing_subscriber::prelude::*;

use crate::error::CliResult;

struct Elapsed(Instant);

impl FormatTime for Elapsed {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> fmt::Result {
        let d = self.0.elapsed();
        let total_secs = d.as_secs();
        let mins = total_secs / 60;
        let secs = total_secs % 60;
        let millis = d.subsec_millis();
        write!(w, "[{mins:02}:{secs:02}:{millis:03}]")
    }
}

/// Terminal chat client. Lines typed on stdin are sent; `/connect`,
/// `/disconnect`, `/reconnect`, `/timeout MS`, `/debug`, `/state` and
/// `/quit` control the connection.
#[derive(Parser)]
#[command(name = "chat-cli", version)]
struct Cli {
    /// Path to a YAML connection config file
    #[arg(long, short)]
    config: Option<PathBuf>,
    /// Chat server WebSocket URL (overrides config)
    #[arg(long, env = "CHAT_URL")]
    url: Option<String>,
    /// Automatic reconnection attempts before giving up
    #[arg(long)]
    reconnect_attempts: Option<u32>,
    /// Base reconnect delay in milliseconds
    #[arg(long)]
    reconnect_delay_ms: Option<u64>,
    /// Reconnect delay cap in milliseconds
    #[arg(long)]
    max_reconnect_delay_ms: Option<u64>,
    /// Inactivity timeout in milliseconds; zero or negative disables it
    #[arg(long, allow_hyphen_values = true)]
    inactivity_timeout_ms: Option<i64>,
    /// Do not reconnect after an abnormal closure
    #[arg(long)]
    no_auto_reconnect: bool,
    /// Enable connection debug logging
    #[arg(long)]
    debug: bool,
    /// Print events as JSON lines
    #[arg(long)]
    json: bool,
}

impl Cli {
    /// Config file (or defaults), then command-line overrides.
    async fn connection_config(&self) -> CliResult<ConnectionConfig> {
        let mut options = match &self.config {
            Some(path) => chat_connection::config::load_options(path).await?,
            None => ConnectionOptions::default(),
        };
        if let Some(url) = &self.url {
            options.url = url.clone();
        }
        if let Some(n) = self.reconnect_attempts {
            options.reconnect_attempts = n;
        }
        if let Some(ms) = self.reconnect_delay_ms {
            options.reconnect_delay = ms;
        }
        if let Some(ms) = self.max_reconnect_delay_ms {
            options.max_reconnect_delay = ms;
        }
        if let Some(ms) = self.inactivity_timeout_ms {
            options.inactivity_timeout = ms;
        }
        if self.no_auto_reconnect {
            options.auto_reconnect = false;
        }
        if self.debug {
            options.debug = true;
        }
        Ok(ConnectionConfig::from_options(options)?)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Connection debug output is gated by the connection itself, so its
    // target stays open at debug level for runtime toggling.
    let filter = Targets::new()
        .with_default(Level::INFO)
        .with_target("chat_connection", Level::DEBUG);
    tracing_subscriber::fmt()
        .with_timer(Elapsed(Instant::now()))
        .with_writer(std::io::stderr)
        .finish()
        .with(filter)
        .init();

    let cli = Cli::parse();

    let result = match cli.connection_config().await {
        Ok(config) => {
            let debug = config.debug();
            tracing::info!(url = %config.url(), "Starting chat client");
            session::run(ChatClient::spawn(config), cli.json, debug).await
        }
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
