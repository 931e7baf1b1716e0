//! Peer responder binary
//!
//! Binds a reply socket and answers every request with the request text
//! plus a suffix, until interrupted.
//!
//! Usage:
//!   responder --binding ipc:///tmp/netmon/rpc.ipc
//!   responder --config config/messaging.toml --endpoint rpc --suffix " ack"

use anyhow::{anyhow, Context as _, Result};
use clap::Parser;
use messaging::{AppendSuffix, Responder};
use netmon_config::{defaults, load_config, MessagingConfig};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "responder")]
#[command(about = "Netmon RPC peer responder")]
#[command(version)]
struct Args {
    /// Address to bind, e.g. ipc:///tmp/rpc.ipc or tcp://*:7001
    #[arg(short, long)]
    binding: Option<String>,

    /// Named endpoint to bind, looked up in the configuration
    #[arg(short, long, conflicts_with = "binding")]
    endpoint: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Text appended to every request
    #[arg(short, long, default_value = defaults::responder::REPLY_SUFFIX)]
    suffix: String,

    /// Log level (trace, debug, info, warn, error); defaults to the
    /// configuration's `global.log_level`
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON logging format
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Loaded before logging starts, since the config may choose the level
    let loaded = match &args.config {
        Some(path) => load_config(Some(path.as_path()), None),
        None => Ok(MessagingConfig::default()),
    };
    init_logging(
        &effective_log_level(args.log_level.as_deref(), loaded.as_ref().ok()),
        args.json_logs,
    );
    let config = loaded.map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    network::reclaim::install_fatal_handler();
    let _reclaimer = network::reclaim::spawn_signal_reclaimer()
        .context("Failed to install signal handlers")?;
    let binding = resolve_binding(&args, &config)?;

    info!(binding = %binding, suffix = ?args.suffix, "Starting netmon responder");

    let mut responder = Responder::from_config(&binding, &config);
    if !responder.initialize().await {
        return Err(anyhow!("Could not bind responder to {}", binding));
    }
    responder.begin_listen_and_reply(AppendSuffix::new(args.suffix.clone()));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for CTRL+C")?;
    info!("Received shutdown signal");

    responder.end_listen_and_reply().await;
    drop(responder);
    info!("Responder stopped");

    Ok(())
}

fn resolve_binding(args: &Args, config: &MessagingConfig) -> Result<String> {
    if let Some(binding) = &args.binding {
        return Ok(binding.clone());
    }
    let name = args.endpoint.as_deref().unwrap_or("responder");
    config
        .endpoint(name)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("No --binding given and no endpoint named '{}' configured", name))
}

/// Flag first, then the configuration, then the built-in default
fn effective_log_level(flag: Option<&str>, config: Option<&MessagingConfig>) -> String {
    flag.map(str::to_string)
        .or_else(|| config.map(|config| config.global.log_level.clone()))
        .unwrap_or_else(|| defaults::logging::LOG_LEVEL.to_string())
        .to_lowercase()
}

fn init_logging(log_level: &str, json_logs: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_precedence() {
        let mut config = MessagingConfig::default();
        config.global.log_level = "DEBUG".to_string();

        assert_eq!(effective_log_level(Some("warn"), Some(&config)), "warn");
        assert_eq!(effective_log_level(None, Some(&config)), "debug");
        assert_eq!(effective_log_level(None, None), defaults::logging::LOG_LEVEL);
    }

    #[test]
    fn test_binding_from_named_endpoint() {
        let mut config = MessagingConfig::default();
        config
            .endpoints
            .insert("rpc".to_string(), "ipc:///tmp/netmon/rpc.ipc".to_string());

        let args = Args::parse_from(["responder", "--endpoint", "rpc"]);
        assert_eq!(resolve_binding(&args, &config).unwrap(), "ipc:///tmp/netmon/rpc.ipc");

        let args = Args::parse_from(["responder", "--binding", "tcp://*:7001"]);
        assert_eq!(resolve_binding(&args, &config).unwrap(), "tcp://*:7001");

        let args = Args::parse_from(["responder"]);
        assert!(resolve_binding(&args, &MessagingConfig::default()).is_err());
    }
}
