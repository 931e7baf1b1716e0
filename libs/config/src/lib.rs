//! # Netmon Messaging Configuration
//!
//! This crate provides centralized configuration management and defaults
//! for the messaging layer: socket tuning, RPC link timeouts, pending-reply
//! retention and the named endpoints processes bind or connect to.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use netmon_config::{defaults, MessagingConfig};
//!
//! let config = MessagingConfig::load(Some(std::path::Path::new("config/messaging.toml")), None)?;
//! let dpi_control = config.endpoint("dpi_control");
//! let poll_slice = defaults::link::POLL_SLICE_MS;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod defaults;
pub mod messaging_config;

// Re-export commonly used types
pub use messaging_config::{
    load_config, Attachment, GlobalConfig, LinkConfig, MessagingConfig, PendingConfig,
    SocketConfig,
};
