//! TCP Network Transport
//!
//! Carries frames between hosts. Nagle is disabled on every stream since
//! request/reply traffic is dominated by small frames.

use super::BoxedStream;
use crate::endpoint::Endpoint;
use crate::{Result, TransportError};
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

fn host_port(endpoint: &Endpoint) -> std::io::Result<(&str, u16)> {
    endpoint.host_port().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "endpoint has no host:port")
    })
}

/// Bind a TCP listener; `*` binds every interface
pub async fn bind(endpoint: &Endpoint) -> Result<TcpListener> {
    let (host, port) = host_port(endpoint)
        .map_err(|e| TransportError::bind_failed(endpoint.location(), e))?;
    let host = if host == "*" { "0.0.0.0" } else { host };

    let listener = TcpListener::bind((host, port))
        .await
        .map_err(|e| TransportError::bind_failed(endpoint.location(), e))?;

    info!(
        endpoint = %endpoint,
        local = ?listener.local_addr().ok(),
        "TCP transport listening"
    );
    Ok(listener)
}

pub async fn accept(listener: &TcpListener) -> std::io::Result<BoxedStream> {
    let (stream, peer_addr) = listener.accept().await?;
    stream.set_nodelay(true)?;
    debug!(peer = %peer_addr, "Accepted TCP connection");
    Ok(Box::new(stream))
}

/// Resolve the remote address of a connecting endpoint
pub async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr> {
    let (host, port) = host_port(endpoint).map_err(|e| {
        TransportError::connect_failed_with_source(endpoint.location(), "no host:port", e)
    })?;
    if endpoint.is_wildcard() {
        return Err(TransportError::connect_failed(
            endpoint.location(),
            "cannot connect to the wildcard host",
        ));
    }

    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| {
            TransportError::connect_failed_with_source(endpoint.location(), "host lookup failed", e)
        })?
        .next()
        .ok_or_else(|| TransportError::connect_failed(endpoint.location(), "host has no addresses"))
}

pub async fn connect(endpoint: &Endpoint) -> std::io::Result<BoxedStream> {
    let (host, port) = host_port(endpoint)?;
    let stream = TcpStream::connect((host, port)).await?;
    stream.set_nodelay(true)?;
    debug!(remote = %endpoint, "Connected TCP stream");
    Ok(Box::new(stream))
}
