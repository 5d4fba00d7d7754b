//! Relay Web - Binary entry point

use anyhow::Context;
use clap::Parser;
use relay_core::RelayConfig;
use relay_web::{AppState, Config, serve};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "relay_web=info,relay_core=info";

#[derive(Debug, Parser)]
#[command(name = "relay-web", version, about = "Run account tasks and relay their input requests over SSE")]
struct Cli {
    /// Path to a relay.yml config file
    #[arg(short, long, env = "RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Address both apps bind to
    #[arg(long)]
    host: Option<String>,

    /// Port of the user app
    #[arg(long)]
    user_port: Option<u16>,

    /// Port of the admin app
    #[arg(long)]
    admin_port: Option<u16>,

    /// Log filter used when RUST_LOG is not set (e.g. "debug")
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    /// Load the config file (or defaults) and apply flag overrides.
    fn load_config(&self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::from_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => RelayConfig::default(),
        };

        if let Some(host) = &self.host {
            config.server.host.clone_from(host);
        }
        if let Some(port) = self.user_port {
            config.server.user_port = port;
        }
        if let Some(port) = self.admin_port {
            config.server.admin_port = port;
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let fallback = cli.log_level.as_deref().unwrap_or(DEFAULT_LOG_FILTER);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = cli.load_config()?;
    tracing::info!(
        program = %config.task.program,
        wait_bound_ms = config.input.wait_bound_ms,
        "Starting Relay"
    );

    let state = AppState::from_config(&config);
    serve(Config::from(&config.server), state)
        .await
        .context("server stopped")?;

    Ok(())
}
