//! Socket setup seam
//!
//! The link's initialization runs context → socket → attach through a
//! [`SocketFactory`], so each step can be replaced, e.g. to exercise the
//! failure paths in tests.

use async_trait::async_trait;
use network::{AttachMode, Context, Endpoint, Result, Socket, SocketKind, SocketOptions};

#[async_trait]
pub trait SocketFactory: Send + Sync {
    /// Open the context the link's socket lives in
    fn new_context(&self) -> Result<Context> {
        Context::new()
    }

    /// Create the request-side socket
    fn new_socket(&self, context: &Context, options: SocketOptions) -> Result<Socket> {
        context.socket(SocketKind::Dealer, options)
    }

    /// Bind or connect the socket to the link's endpoint
    async fn attach(&self, socket: &Socket, endpoint: &Endpoint, mode: AttachMode) -> Result<()> {
        socket.attach(endpoint, mode).await
    }
}

/// The message-queue transport, unmodified
#[derive(Debug, Default, Clone, Copy)]
pub struct MessageQueueFactory;

impl SocketFactory for MessageQueueFactory {}
