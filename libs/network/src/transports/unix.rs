//! Unix Domain Socket Transport
//!
//! Local IPC between processes on the same machine. Binding over an existing
//! socket file checks it first: a live listener is never displaced, a stale
//! file left by a dead process is removed.

use super::BoxedStream;
use crate::{Result, TransportError};
use std::os::unix::fs::FileTypeExt;
use std::path::{Path, PathBuf};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

/// Bound unix socket
pub struct IpcListener {
    listener: UnixListener,
    path: PathBuf,
}

impl IpcListener {
    pub async fn accept(&mut self) -> std::io::Result<BoxedStream> {
        let (stream, _) = self.listener.accept().await?;
        debug!(path = ?self.path, "Accepted Unix socket connection");
        Ok(Box::new(stream))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Bind to a unix socket path
pub fn bind(location: &str, path: &Path) -> Result<IpcListener> {
    if let Ok(metadata) = std::fs::symlink_metadata(path) {
        if !metadata.file_type().is_socket() {
            return Err(TransportError::bind_failed(
                location,
                std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "path exists and is not a socket",
                ),
            ));
        }

        // Dial the existing socket: someone answering means the address is taken
        match std::os::unix::net::UnixStream::connect(path) {
            Ok(_) => {
                return Err(TransportError::bind_failed(
                    location,
                    std::io::Error::new(
                        std::io::ErrorKind::AddrInUse,
                        "ipc binding is held by a live listener",
                    ),
                ))
            }
            Err(_) => {
                warn!(?path, "Removing stale ipc binding");
                std::fs::remove_file(path)
                    .map_err(|e| TransportError::bind_failed(location, e))?;
            }
        }
    }

    let listener =
        UnixListener::bind(path).map_err(|e| TransportError::bind_failed(location, e))?;

    info!("Unix socket listening on: {:?}", path);
    Ok(IpcListener {
        listener,
        path: path.to_path_buf(),
    })
}

/// Connect to a unix socket server
pub async fn connect(path: &Path) -> std::io::Result<BoxedStream> {
    let stream = UnixStream::connect(path).await?;
    debug!("Connected to Unix socket: {:?}", path);
    Ok(Box::new(stream))
}
