//! Simplex Send Channel
//!
//! Producing counterpart of [`PullChannel`](crate::pull::PullChannel).
//! Frames are queued on the socket and delivered to one connected peer.

use bytes::Bytes;
use network::{AttachMode, Context, Endpoint, Result, Socket, SocketKind, SocketOptions};
use tracing::info;

pub struct PushChannel {
    binding: Endpoint,
    context: Context,
    socket: Socket,
}

impl PushChannel {
    pub async fn open(binding: &str, attach: AttachMode) -> Result<Self> {
        Self::open_with_options(binding, attach, SocketOptions::default()).await
    }

    pub async fn open_with_options(
        binding: &str,
        attach: AttachMode,
        options: SocketOptions,
    ) -> Result<Self> {
        let binding = Endpoint::parse(binding)?;
        let context = Context::new()?;
        let socket = context.socket(SocketKind::Push, options)?;
        socket.attach(&binding, attach).await?;

        info!(binding = %binding, ?attach, "Push channel open");
        Ok(Self {
            binding,
            context,
            socket,
        })
    }

    pub async fn send_text(&self, text: &str) -> Result<()> {
        self.socket.send(Bytes::copy_from_slice(text.as_bytes())).await
    }

    pub async fn send_bytes(&self, frame: Bytes) -> Result<()> {
        self.socket.send(frame).await
    }

    pub fn binding(&self) -> &Endpoint {
        &self.binding
    }

    pub fn local_endpoints(&self) -> Vec<Endpoint> {
        self.socket.bound_endpoints()
    }

    pub fn close(&self) {
        self.socket.close();
        self.context.terminate();
    }

    pub fn is_closed(&self) -> bool {
        self.socket.is_closed()
    }
}
