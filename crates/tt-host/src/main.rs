//! tt-host: demonstration host for the VPN lifecycle bridge
//!
//! Initializes the global allocator, sets up logging, wires the bridge to a
//! simulated engine and consent prompt, and runs one scripted session.
//!
//! ```text
//! tt-host [bridge.toml] [store.toml|store.json]
//! ```

mod engine;
mod prompt;
mod session;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use tt_bridge::BridgeConfig;
use tt_control::ControlStore;

// Use mimalloc as the global allocator for reduced memory fragmentation
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BridgeConfig::from_toml_file(Path::new(&path))
            .with_context(|| format!("failed to load bridge config {path}"))?,
        None => BridgeConfig::default(),
    };
    let store_path = args.next().map(PathBuf::from);

    // Initialize logging; RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .context("invalid log level")?;
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("tt-host starting...");
    info!("Using mimalloc allocator");

    let mut store = match &store_path {
        Some(path) if path.exists() => ControlStore::load(path)?,
        _ => session::demo_store()?,
    };

    let timing = session::SessionTiming::default();
    let host = session::Host::build(&config, &timing, true)?;
    let report = session::run_session(&host, &mut store, &timing).await?;

    let states: Vec<String> = report.states.iter().map(ToString::to_string).collect();
    info!("States: {}", states.join(" -> "));
    info!(
        "Diagnostics: {} buffered before subscribe, {} delivered (first #{}), {} stored",
        report.backlog_at_subscribe,
        report.records_delivered,
        report.first_record_seq.unwrap_or_default(),
        report.stored_requests
    );

    if let Some(path) = &store_path {
        store.save(path)?;
        info!("Store saved to {}", path.display());
    }

    info!("tt-host shutting down");
    Ok(())
}
