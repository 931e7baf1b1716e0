//! In-process transport
//!
//! Named pipes between sockets of the same process. A bound name owns an
//! accept queue in a process-wide registry; connecting hands the listener one
//! half of an in-memory duplex stream.

use super::BoxedStream;
use crate::{Result, TransportError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use tracing::debug;

/// Pending connections queued per bound name before accept
const ACCEPT_BACKLOG: usize = 64;

static REGISTRY: Lazy<DashMap<String, mpsc::Sender<DuplexStream>>> = Lazy::new(DashMap::new);

/// A bound inproc name
pub struct InprocListener {
    name: String,
    handle: mpsc::Sender<DuplexStream>,
    incoming: mpsc::Receiver<DuplexStream>,
}

impl InprocListener {
    pub async fn accept(&mut self) -> std::io::Result<BoxedStream> {
        match self.incoming.recv().await {
            Some(stream) => {
                debug!(name = %self.name, "Accepted inproc connection");
                Ok(Box::new(stream))
            }
            None => Err(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "inproc listener unregistered",
            )),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for InprocListener {
    fn drop(&mut self) {
        REGISTRY.remove_if(&self.name, |_, handle| handle.same_channel(&self.handle));
    }
}

/// Register a name; fails while another listener holds it
pub fn bind(name: &str) -> Result<InprocListener> {
    let (handle, incoming) = mpsc::channel(ACCEPT_BACKLOG);

    match REGISTRY.entry(name.to_string()) {
        Entry::Occupied(mut existing) => {
            if !existing.get().is_closed() {
                return Err(TransportError::bind_failed(
                    format!("inproc://{}", name),
                    std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        "inproc name is already bound",
                    ),
                ));
            }
            existing.insert(handle.clone());
        }
        Entry::Vacant(slot) => {
            slot.insert(handle.clone());
        }
    }

    debug!(name, "Inproc name bound");
    Ok(InprocListener {
        name: name.to_string(),
        handle,
        incoming,
    })
}

/// Release a name immediately, ahead of its listener being dropped
pub fn unregister(name: &str) {
    if REGISTRY.remove(name).is_some() {
        debug!(name, "Inproc name released");
    }
}

/// Open a pipe to a bound name
pub async fn connect(name: &str, stream_buffer: usize) -> std::io::Result<BoxedStream> {
    // Clone the handle out so no registry shard lock is held across the await
    let handle = REGISTRY
        .get(name)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("no inproc listener bound to '{}'", name),
            )
        })?;

    let (local, remote) = tokio::io::duplex(stream_buffer);
    handle.send(remote).await.map_err(|_| {
        std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "inproc listener went away")
    })?;
    Ok(Box::new(local))
}
