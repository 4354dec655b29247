mod command;
mod config;
mod hardware;
mod host;
mod model;
mod monitor;
mod paths;
mod presence;
mod process_monitor;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::split_command;
use crate::host::SystemHost;
use crate::monitor::{HostProbe, Monitor};
use crate::presence::{DiscordSink, PresenceSink};

/// Time given to a freshly launched target before the first detection.
const LAUNCH_SETTLE_SECS: u64 = 3;

/// Shows what the local Ollama server is doing as Discord Rich Presence.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Config file to use instead of ~/.ollama/discord/config.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Run a single detection tick, then exit.
    #[arg(long)]
    once: bool,
    /// Never launch the target, even if `auto_start` is enabled.
    #[arg(long)]
    no_auto_start: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run(Args::parse()).await {
        log::error!("{e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args.config.unwrap_or_else(paths::config_file_path);
    if !config_path.exists() {
        match config::write_default(&config_path) {
            Ok(()) => log::info!("Wrote default config to {}", config_path.display()),
            Err(e) => log::warn!("Could not write default config: {e:#}"),
        }
    }
    let config = apply_overrides(config::load_or_default(&config_path)?, args.no_auto_start);
    config.validate().context("Invalid configuration")?;

    log::info!("Starting Ollama Discord Rich Presence v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Auto-start target: {}", config.auto_start);
    log::info!("Auto-exit: {}", config.auto_exit);

    // ── Presence sink ─────────────────────────────────────────────────────────
    // Nothing useful can happen without the sink, so a failed connect is fatal.
    let mut sink = DiscordSink::new(config.client_id.clone());
    sink.connect().context("Presence sink unavailable")?;
    log::info!("Connected to Discord");

    // ── Host ──────────────────────────────────────────────────────────────────
    let mut host = SystemHost::new(&config);
    if config.auto_start && !tokio::task::block_in_place(|| host.is_active()) {
        launch_target(&config.target.launch_command).await;
    }

    let mut monitor = Monitor::new(&config, host, sink);

    if args.once {
        tokio::task::block_in_place(|| {
            monitor.tick(chrono::Utc::now());
            monitor.shutdown();
        });
        return Ok(());
    }

    // ── Signals ───────────────────────────────────────────────────────────────
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    crate::monitor::run(&mut monitor, config.poll_interval(), shutdown).await;
    Ok(())
}

/// Applies command-line overrides on top of the loaded config, before validation.
fn apply_overrides(mut config: config::Config, no_auto_start: bool) -> config::Config {
    if no_auto_start {
        config.auto_start = false;
    }
    config
}

/// Starts the target detached. Failures are logged; the monitor runs either way.
async fn launch_target(launch_command: &str) {
    match command::spawn_detached(&split_command(launch_command)) {
        Ok(()) => {
            log::info!("Started target: {launch_command}");
            tokio::time::sleep(Duration::from_secs(LAUNCH_SETTLE_SECS)).await;
        }
        Err(e) => log::error!("Failed to start target ({launch_command}): {e}"),
    }
}

/// Cancels `token` on the first SIGINT/SIGTERM (Ctrl+C on Windows).
async fn cancel_on_signal(token: CancellationToken) {
    if let Err(e) = wait_for_signal().await {
        log::error!("{e:#}");
        return;
    }
    token.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to register SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => log::info!("Received SIGTERM, shutting down"),
        _ = sigint.recv() => log::info!("Received SIGINT, shutting down"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to register Ctrl+C handler")?;
    log::info!("Received Ctrl+C, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn cli_parses_flags() {
        let args = Args::parse_from(["ollama-presence-daemon", "--once", "--no-auto-start", "--config", "x.toml"]);
        assert!(args.once);
        assert!(args.no_auto_start);
        assert_eq!(args.config, Some(PathBuf::from("x.toml")));
    }

    #[test]
    fn no_auto_start_allows_blank_launch_command() {
        let mut config = config::Config::default();
        config.target.launch_command = String::new();
        assert!(config.validate().is_err());

        let config = apply_overrides(config, true);
        assert!(!config.auto_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["ollama-presence-daemon"]);
        assert!(!args.once);
        assert!(!args.no_auto_start);
        assert!(args.config.is_none());
    }
}
