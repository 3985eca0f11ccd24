use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use nudge_escalation::{EscalationEngine, SystemClock};
use nudge_server::config::{ServerConfig, StoreConfig};
use nudge_server::{build_gateway, build_store, serve, AppState};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file. Without it, defaults plus NUDGE_* environment variables apply.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the config
    #[arg(long)]
    bind: Option<String>,

    /// Keep tasks in this JSON file instead of the configured store
    #[arg(long)]
    store_path: Option<PathBuf>,

    /// Seconds between ticks, overrides the config
    #[arg(long)]
    tick_interval_secs: Option<u64>,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    check: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(path) = &self.store_path {
            config.store = StoreConfig::File { path: path.clone() };
        }
        if let Some(secs) = self.tick_interval_secs {
            config.engine.tick_interval_secs = secs;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = Args::parse();
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;

    if args.check {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        bind = %config.bind,
        tick_interval_secs = config.engine.tick_interval_secs,
        store = ?config.store,
        "Starting nudge-server"
    );

    let store = build_store(&config.store)
        .await
        .context("Failed to open task store")?;
    let gateway = build_gateway(&config).context("Failed to build dispatch gateway")?;
    let engine = Arc::new(
        EscalationEngine::new(config.engine.clone(), store, gateway, Arc::new(SystemClock))
            .context("Failed to build engine")?,
    );

    let adopted = engine
        .rehydrate()
        .await
        .context("Failed to load active tasks")?;
    info!(adopted, "Rehydrated active tasks");

    let cancel = CancellationToken::new();
    let ticker = engine.tick_loop().with_cancel_token(cancel.clone()).spawn();

    let shutdown = {
        let cancel = cancel.clone();
        async move {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        warn!(error = %e, "Failed to listen for Ctrl-C");
                    }
                    info!("Shutdown requested");
                }
                _ = cancel.cancelled() => {}
            }
        }
    };

    let served = serve(&config.bind, Arc::new(AppState::new(engine)), shutdown).await;

    cancel.cancel();
    match ticker.await {
        Ok(ticks) => info!(ticks, "Tick loop stopped"),
        Err(e) => warn!(error = %e, "Tick loop panicked"),
    }

    served.context("HTTP server failed")
}
