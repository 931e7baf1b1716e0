//! Messaging Configuration Module
//!
//! Provides configuration loading for processes using the messaging layer.
//! Supports loading from TOML files with environment-specific overrides and
//! `NETMON__`-prefixed environment variables.

use crate::defaults;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main messaging configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct MessagingConfig {
    /// Global settings
    pub global: GlobalConfig,

    /// Named transport bindings, e.g. `dpi_control = "ipc:///tmp/netmon/dpi.ipc"`
    pub endpoints: HashMap<String, String>,

    /// Transport socket tuning
    pub socket: SocketConfig,

    /// RPC link behaviour
    pub link: LinkConfig,

    /// Pending reply retention
    pub pending: PendingConfig,
}

/// Global configuration settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    /// Log level used when the process is not given one explicitly
    pub log_level: String,
}

/// Whether a socket binds its endpoint or connects to it
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Attachment {
    Bind,
    #[default]
    Connect,
}

/// Transport socket settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct SocketConfig {
    /// Receive timeout; `None` blocks until a frame arrives
    pub receive_timeout_ms: Option<u64>,
    /// Wait for room in a full outbound queue; `None` waits forever
    pub send_timeout_ms: Option<u64>,
    pub high_water_mark: usize,
    pub reconnect_interval_ms: u64,
    pub max_frame_size: usize,
}

/// RPC link settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LinkConfig {
    pub receive_timeout_ms: u64,
    pub poll_slice_ms: u64,
    pub attach: Attachment,
}

/// Pending reply store settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct PendingConfig {
    pub retention_secs: u64,
    /// Background sweep period; `None` leaves reclamation to explicit calls
    pub sweep_interval_secs: Option<u64>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: defaults::logging::LOG_LEVEL.to_string(),
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: None,
            send_timeout_ms: Some(defaults::socket::SEND_TIMEOUT_MS),
            high_water_mark: defaults::socket::HIGH_WATER_MARK,
            reconnect_interval_ms: defaults::socket::RECONNECT_INTERVAL_MS,
            max_frame_size: defaults::socket::MAX_FRAME_SIZE,
        }
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: defaults::link::RECEIVE_TIMEOUT_MS,
            poll_slice_ms: defaults::link::POLL_SLICE_MS,
            attach: Attachment::Connect,
        }
    }
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            retention_secs: defaults::pending::RETENTION_SECS,
            sweep_interval_secs: Some(defaults::pending::SWEEP_INTERVAL_SECS),
        }
    }
}

impl MessagingConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let base = base_path.unwrap_or(Path::new("config/messaging.toml"));

        let mut builder = Config::builder().add_source(File::from(base).required(true));

        // Add environment-specific overrides if specified
        if let Some(env) = environment {
            let env_file = PathBuf::from("config/environments").join(format!("{}.toml", env));

            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        // Override with environment variables, e.g. NETMON__LINK__POLL_SLICE_MS
        builder = builder.add_source(
            Environment::with_prefix("NETMON")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        debug!(endpoints = config.endpoints.len(), "Loaded messaging configuration");
        Ok(config)
    }

    /// Get the binding string for a named endpoint
    pub fn endpoint(&self, name: &str) -> Option<&str> {
        self.endpoints.get(name).map(String::as_str)
    }

    /// Expand environment variables in endpoint bindings
    pub fn expand_env_vars(&mut self) -> Result<()> {
        for (name, binding) in &mut self.endpoints {
            let expanded = shellexpand::env(binding)
                .with_context(|| format!("Failed to expand endpoint '{}'", name))?;
            *binding = expanded.to_string();
        }
        Ok(())
    }
}

/// Convenience function to load configuration with expanded endpoints
pub fn load_config(path: Option<&Path>, environment: Option<&str>) -> Result<MessagingConfig> {
    let mut config = MessagingConfig::load(path, environment)?;
    config.expand_env_vars()?;
    Ok(config)
}
