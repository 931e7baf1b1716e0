//! Stream transports
//!
//! Each endpoint scheme maps onto a byte-stream transport. Sockets only see
//! the boxed [`Stream`] and the [`Listener`] enum, so framing and connection
//! handling are shared by every scheme.

use crate::endpoint::{Endpoint, Scheme};
use crate::{Result, TransportError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;

pub mod inproc;
pub mod tcp;
pub mod unix;

pub use inproc::InprocListener;
pub use unix::IpcListener;

/// Any bidirectional byte stream a socket can run frames over
pub trait Stream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> Stream for T {}

pub type BoxedStream = Box<dyn Stream>;

/// A bound endpoint accepting peer streams
pub enum Listener {
    Ipc(IpcListener),
    Tcp(TcpListener),
    Inproc(InprocListener),
}

impl Listener {
    /// Accept the next peer stream
    pub async fn accept(&mut self) -> std::io::Result<BoxedStream> {
        match self {
            Listener::Ipc(listener) => listener.accept().await,
            Listener::Tcp(listener) => tcp::accept(listener).await,
            Listener::Inproc(listener) => listener.accept().await,
        }
    }

    /// The endpoint peers should connect to; resolves ephemeral tcp ports
    pub fn local_endpoint(&self, requested: &Endpoint) -> Result<Endpoint> {
        match self {
            Listener::Tcp(listener) => {
                let addr = listener.local_addr()?;
                Endpoint::parse(&format!("tcp://{}", addr))
            }
            _ => Ok(requested.clone()),
        }
    }
}

/// Bind an endpoint
pub async fn listen(endpoint: &Endpoint) -> Result<Listener> {
    match endpoint.scheme() {
        Scheme::Ipc => {
            let path = endpoint
                .ipc_path()
                .ok_or_else(|| TransportError::invalid_address(endpoint.location(), "no ipc path"))?;
            Ok(Listener::Ipc(unix::bind(endpoint.location(), path)?))
        }
        Scheme::Tcp => Ok(Listener::Tcp(tcp::bind(endpoint).await?)),
        Scheme::Inproc => {
            let name = endpoint.inproc_name().ok_or_else(|| {
                TransportError::invalid_address(endpoint.location(), "no inproc name")
            })?;
            Ok(Listener::Inproc(inproc::bind(name)?))
        }
    }
}

/// Open one stream to a bound endpoint
pub async fn dial(endpoint: &Endpoint, stream_buffer: usize) -> std::io::Result<BoxedStream> {
    match endpoint.scheme() {
        Scheme::Ipc => {
            let path = endpoint.ipc_path().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "endpoint has no ipc path")
            })?;
            unix::connect(path).await
        }
        Scheme::Tcp => tcp::connect(endpoint).await,
        Scheme::Inproc => {
            let name = endpoint.inproc_name().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "endpoint has no inproc name")
            })?;
            inproc::connect(name, stream_buffer).await
        }
    }
}

/// Check that an endpoint can ever be dialled; peers may appear later
pub async fn validate_dial_target(endpoint: &Endpoint) -> Result<()> {
    match endpoint.scheme() {
        Scheme::Tcp => tcp::resolve(endpoint).await.map(|_| ()),
        Scheme::Ipc | Scheme::Inproc => Ok(()),
    }
}
