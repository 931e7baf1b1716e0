//! Simplex Receive Channel
//!
//! A receive-only socket bound or connected to one endpoint. Each channel owns
//! its own context. Decoding helpers copy the frame out and release the
//! transport buffer before returning; [`PullChannel::receive_raw`] is the only
//! path that hands a transport-owned buffer to the caller.

use network::{
    AttachMode, Context, Endpoint, MessageBuffer, Result, Socket, SocketKind, SocketOptions,
    TransportError,
};
use std::time::Duration;
use tracing::{debug, info};

/// How long a receive may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveMode {
    /// Wait until a frame arrives
    Blocking,
    /// Give up with `ReceiveTimedOut` after the duration
    Timeout(Duration),
}

impl ReceiveMode {
    pub fn timeout(&self) -> Option<Duration> {
        match self {
            ReceiveMode::Blocking => None,
            ReceiveMode::Timeout(timeout) => Some(*timeout),
        }
    }
}

pub struct PullChannel {
    binding: Endpoint,
    mode: ReceiveMode,
    context: Context,
    socket: Socket,
}

impl PullChannel {
    /// Create the socket, apply the receive mode, then bind or connect
    pub async fn open(binding: &str, mode: ReceiveMode, attach: AttachMode) -> Result<Self> {
        Self::open_with_options(binding, mode, attach, SocketOptions::default()).await
    }

    pub async fn open_with_options(
        binding: &str,
        mode: ReceiveMode,
        attach: AttachMode,
        options: SocketOptions,
    ) -> Result<Self> {
        let binding = Endpoint::parse(binding)?;
        let context = Context::new()?;
        let socket = context.socket(
            SocketKind::Pull,
            options.with_receive_timeout(mode.timeout()),
        )?;
        socket.attach(&binding, attach).await?;

        info!(binding = %binding, ?mode, ?attach, "Pull channel open");
        Ok(Self {
            binding,
            mode,
            context,
            socket,
        })
    }

    /// Receive one frame; the buffer stays counted against the channel's
    /// context until dropped
    pub async fn receive_raw(&self) -> Result<MessageBuffer> {
        self.socket.recv().await
    }

    /// Receive one frame as UTF-8 text of exactly the received length
    pub async fn receive_text(&self) -> Result<String> {
        let buffer = self.receive_raw().await?;
        let text = std::str::from_utf8(&buffer)
            .map(str::to_owned)
            .map_err(|e| TransportError::protocol_with_source("frame is not valid UTF-8", e));
        buffer.release();
        text
    }

    pub fn binding(&self) -> &Endpoint {
        &self.binding
    }

    pub fn mode(&self) -> ReceiveMode {
        self.mode
    }

    /// Bound endpoints with ephemeral tcp ports resolved
    pub fn local_endpoints(&self) -> Vec<Endpoint> {
        self.socket.bound_endpoints()
    }

    /// Receive buffers handed out by this channel and not yet dropped
    pub fn outstanding_buffers(&self) -> usize {
        self.context.outstanding_buffers()
    }

    /// Close the socket; later receives fail with `Closed`. Idempotent.
    pub fn close(&self) {
        if !self.socket.is_closed() {
            debug!(binding = %self.binding, "Closing pull channel");
        }
        self.socket.close();
        self.context.terminate();
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }
}

impl std::fmt::Debug for PullChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PullChannel")
            .field("binding", &self.binding.location())
            .field("mode", &self.mode)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_receive_mode_timeout() {
        assert_eq!(ReceiveMode::Blocking.timeout(), None);
        assert_eq!(
            ReceiveMode::Timeout(Duration::from_millis(75)).timeout(),
            Some(Duration::from_millis(75))
        );
        assert_eq!(
            ReceiveMode::Timeout(Duration::ZERO).timeout(),
            Some(Duration::ZERO)
        );
    }
}
