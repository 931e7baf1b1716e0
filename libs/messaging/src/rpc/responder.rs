//! Peer Responder
//!
//! The reply side of an RPC link. A `Router` socket accepts any number of
//! links; every request frame is answered with one reply carrying the
//! request's correlation id and sequence, routed back to the peer it came
//! from. Listening can be started and stopped on demand.

use super::wire::RpcFrame;
use netmon_config::{defaults, MessagingConfig};
use network::{Context, Endpoint, PeerId, Socket, SocketKind, SocketOptions, TransportError};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Derives the reply to a request body; `None` sends no reply
pub trait RequestHandler: Send + Sync + 'static {
    fn handle(&self, request: &str) -> Option<String>;
}

impl<F> RequestHandler for F
where
    F: Fn(&str) -> Option<String> + Send + Sync + 'static,
{
    fn handle(&self, request: &str) -> Option<String> {
        self(request)
    }
}

/// Replies with the request followed by a fixed suffix
#[derive(Debug, Clone)]
pub struct AppendSuffix {
    suffix: String,
}

impl AppendSuffix {
    pub fn new(suffix: impl Into<String>) -> Self {
        Self {
            suffix: suffix.into(),
        }
    }
}

impl Default for AppendSuffix {
    fn default() -> Self {
        Self::new(defaults::responder::REPLY_SUFFIX)
    }
}

impl RequestHandler for AppendSuffix {
    fn handle(&self, request: &str) -> Option<String> {
        Some(format!("{}{}", request, self.suffix))
    }
}

struct Listener {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct Responder {
    binding: String,
    options: SocketOptions,
    poll_interval: Duration,
    context: Option<Context>,
    socket: Option<Arc<Socket>>,
    listener: Option<Listener>,
}

impl Responder {
    pub fn new(binding: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            options: SocketOptions::default(),
            poll_interval: Duration::from_millis(defaults::responder::POLL_INTERVAL_MS),
            context: None,
            socket: None,
            listener: None,
        }
    }

    pub fn from_config(binding: impl Into<String>, config: &MessagingConfig) -> Self {
        Self::new(binding).with_options(SocketOptions::from(&config.socket))
    }

    pub fn with_options(mut self, options: SocketOptions) -> Self {
        self.options = options;
        self
    }

    /// Longest a receive waits before re-checking for a stop request
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    /// Bind the reply socket; false when any setup step fails
    pub async fn initialize(&mut self) -> bool {
        if self.socket.is_some() {
            return true;
        }

        match self.open().await {
            Ok((context, socket)) => {
                info!(binding = %self.binding, endpoints = ?socket.bound_endpoints(), "Responder bound");
                self.context = Some(context);
                self.socket = Some(Arc::new(socket));
                true
            }
            Err(e) => {
                warn!(
                    binding = %self.binding,
                    error = %e,
                    category = e.category(),
                    "Responder failed to initialize"
                );
                false
            }
        }
    }

    async fn open(&self) -> network::Result<(Context, Socket)> {
        let endpoint = Endpoint::parse(&self.binding)?;
        let context = Context::new()?;
        let socket = context.socket(SocketKind::Router, self.options.clone())?;
        socket.bind(&endpoint).await?;
        Ok((context, socket))
    }

    /// Start answering requests with `handler`; false when not initialized
    /// or already listening
    pub fn begin_listen_and_reply<H: RequestHandler>(&mut self, handler: H) -> bool {
        let (Some(context), Some(socket)) = (&self.context, &self.socket) else {
            warn!(binding = %self.binding, "Listen requested on uninitialized responder");
            return false;
        };
        if self.listener.is_some() {
            return false;
        }

        let (stop, stopped) = watch::channel(false);
        let task = context.spawn(listen_and_reply(
            Arc::clone(socket),
            handler,
            self.poll_interval,
            stopped,
        ));
        self.listener = Some(Listener { stop, task });

        debug!(binding = %self.binding, "Listening for requests");
        true
    }

    /// Stop answering and wait for the loop to finish
    pub async fn end_listen_and_reply(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        listener.stop.send_replace(true);
        if let Err(e) = listener.task.await {
            if !e.is_cancelled() {
                warn!(binding = %self.binding, error = %e, "Reply loop ended abnormally");
            }
        }
        debug!(binding = %self.binding, "Stopped listening");
    }

    pub fn is_initialized(&self) -> bool {
        self.socket.is_some()
    }

    pub fn is_listening(&self) -> bool {
        self.listener
            .as_ref()
            .is_some_and(|listener| !listener.task.is_finished())
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// Socket file backing the responder when bound on `ipc://`
    pub fn bound_path(&self) -> Option<PathBuf> {
        self.socket
            .as_ref()
            .and_then(|socket| socket.ipc_paths().into_iter().next())
    }

    /// Bound endpoints, ephemeral tcp ports resolved
    pub fn local_endpoints(&self) -> Vec<Endpoint> {
        self.socket
            .as_ref()
            .map(|socket| socket.bound_endpoints())
            .unwrap_or_default()
    }

    /// Links currently connected
    pub fn peer_count(&self) -> usize {
        self.socket.as_ref().map_or(0, |socket| socket.peer_count())
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.task.abort();
        }
        if let Some(socket) = self.socket.take() {
            socket.close();
        }
        if let Some(context) = self.context.take() {
            context.terminate();
        }
    }
}

async fn listen_and_reply<H: RequestHandler>(
    socket: Arc<Socket>,
    handler: H,
    poll_interval: Duration,
    mut stopped: watch::Receiver<bool>,
) {
    loop {
        let stop = *stopped.borrow_and_update();
        if stop {
            break;
        }

        let received = tokio::select! {
            received = socket.recv_timeout(poll_interval) => received,
            _ = stopped.changed() => continue,
        };

        match received {
            Ok(buffer) => {
                let peer = buffer.peer();
                let decoded = RpcFrame::decode(&buffer);
                buffer.release();

                match decoded {
                    Ok(request) => reply(&socket, &handler, peer, request).await,
                    Err(e) => debug!(peer, error = %e, "Ignoring undecodable request"),
                }
            }
            Err(e) if e.is_timeout() => {}
            Err(TransportError::Closed) => break,
            Err(e) => {
                warn!(error = %e, "Receive failed");
                tokio::time::sleep(poll_interval).await;
            }
        }
    }
}

async fn reply<H: RequestHandler>(socket: &Socket, handler: &H, peer: PeerId, request: RpcFrame) {
    let Some(body) = handler.handle(&request.body) else {
        return;
    };

    let sent = match request.reply(body).encode() {
        Ok(frame) => socket.send_to(peer, frame).await,
        Err(e) => Err(e),
    };
    if let Err(e) = sent {
        debug!(peer, id = %request.correlation_id, error = %e, "Reply not delivered");
    }
}
