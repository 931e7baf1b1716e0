//! Endpoint Addresses
//!
//! Parses `<scheme>://<remainder>` binding strings into a validated,
//! immutable location. Three schemes are supported:
//!
//! - `ipc://<path>`: unix domain socket file
//! - `tcp://<host>:<port>`: network socket; `*` is accepted as a wildcard
//!   host (bind only) or an ephemeral port
//! - `inproc://<name>`: in-process pipe registered by name

use crate::{Result, TransportError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Longest path a unix socket address can carry (`sun_path` minus NUL)
pub const MAX_IPC_PATH_LEN: usize = 107;

/// Transport scheme of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Unix domain socket
    Ipc,
    /// TCP network socket
    Tcp,
    /// In-process pipe
    Inproc,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Ipc => "ipc",
            Scheme::Tcp => "tcp",
            Scheme::Inproc => "inproc",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Target {
    Path(PathBuf),
    Host { host: String, port: u16 },
    Name(String),
}

/// A validated transport location
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    location: String,
    scheme: Scheme,
    target: Target,
}

impl Endpoint {
    /// Parse and validate a binding string
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: String| TransportError::invalid_address(raw, reason);

        let (scheme, remainder) = raw
            .split_once("://")
            .ok_or_else(|| invalid("expected <scheme>://<location>".to_string()))?;

        let (scheme, target) = match scheme {
            "ipc" => {
                if remainder.is_empty() {
                    return Err(invalid("ipc path is empty".to_string()));
                }
                if remainder.contains('\0') {
                    return Err(invalid("ipc path contains a NUL byte".to_string()));
                }
                if remainder.len() > MAX_IPC_PATH_LEN {
                    return Err(invalid(format!(
                        "ipc path is {} bytes, limit is {}",
                        remainder.len(),
                        MAX_IPC_PATH_LEN
                    )));
                }
                (Scheme::Ipc, Target::Path(PathBuf::from(remainder)))
            }
            "tcp" => {
                let (host, port) = parse_host_port(remainder).map_err(|r| invalid(r.to_string()))?;
                (Scheme::Tcp, Target::Host { host, port })
            }
            "inproc" => {
                if remainder.is_empty() {
                    return Err(invalid("inproc name is empty".to_string()));
                }
                (Scheme::Inproc, Target::Name(remainder.to_string()))
            }
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        };

        let location = match &target {
            Target::Host { host, port } if host.contains(':') => {
                format!("tcp://[{}]:{}", host, port)
            }
            Target::Host { host, port } => format!("tcp://{}:{}", host, port),
            _ => raw.to_string(),
        };

        Ok(Self {
            location,
            scheme,
            target,
        })
    }

    /// Canonical string used for bind/connect
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// Socket file path for `ipc://` endpoints
    pub fn ipc_path(&self) -> Option<&Path> {
        match &self.target {
            Target::Path(path) => Some(path),
            _ => None,
        }
    }

    /// Host and port for `tcp://` endpoints; port 0 means ephemeral
    pub fn host_port(&self) -> Option<(&str, u16)> {
        match &self.target {
            Target::Host { host, port } => Some((host, *port)),
            _ => None,
        }
    }

    /// Registry name for `inproc://` endpoints
    pub fn inproc_name(&self) -> Option<&str> {
        match &self.target {
            Target::Name(name) => Some(name),
            _ => None,
        }
    }

    /// True when the host is the bind-only `*` wildcard
    pub fn is_wildcard(&self) -> bool {
        matches!(&self.target, Target::Host { host, .. } if host == "*")
    }
}

fn parse_host_port(remainder: &str) -> std::result::Result<(String, u16), &'static str> {
    let (host, port) = if let Some(rest) = remainder.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or("unterminated IPv6 host")?;
        let port = tail.strip_prefix(':').ok_or("expected host:port")?;
        (host, port)
    } else {
        let (host, port) = remainder.rsplit_once(':').ok_or("expected host:port")?;
        if host.contains(':') {
            return Err("IPv6 hosts must be bracketed");
        }
        (host, port)
    };

    if host.is_empty() {
        return Err("host is empty");
    }
    let valid_host = host == "*"
        || host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    if !valid_host {
        return Err("host contains invalid characters");
    }

    let port = match port {
        "*" => 0,
        digits => digits.parse::<u16>().map_err(|_| "port is not a number in 0-65535")?,
    };

    Ok((host.to_string(), port))
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.location)
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.location
    }
}
