//! Message-queue sockets
//!
//! A socket moves whole frames between peers over any number of bound or
//! connected endpoints. Its kind fixes what it may do:
//!
//! - `Pull` receives only, fair-queued over every peer
//! - `Push` sends only, each frame to one connected peer
//! - `Dealer` sends and receives, the requesting side of request/reply
//! - `Router` receives frames tagged with their peer and replies to one peer
//!
//! Outbound frames wait in a bounded queue (the high-water mark) until a
//! connection writer takes them, so sending on a connecting socket succeeds
//! before any peer is reachable. Connecting sockets redial in the background.
//! Delivery is at-most-once: a frame taken by a connection that then fails is
//! lost.

use crate::buffer::{MessageBuffer, PeerId};
use crate::context::Context;
use crate::endpoint::{Endpoint, Scheme};
use crate::framing::{FrameReader, FrameWriter};
use crate::reclaim;
use crate::transports::{self, BoxedStream, Listener};
use crate::{Result, TransportError};
use bytes::Bytes;
use dashmap::DashMap;
use netmon_config::{Attachment, SocketConfig};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, trace, warn};

/// In-memory buffer of one inproc pipe direction
const INPROC_STREAM_BUFFER: usize = 64 * 1024;

/// Socket kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketKind {
    Pull,
    Push,
    Dealer,
    Router,
}

impl SocketKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SocketKind::Pull => "pull",
            SocketKind::Push => "push",
            SocketKind::Dealer => "dealer",
            SocketKind::Router => "router",
        }
    }

    pub fn can_send(&self) -> bool {
        !matches!(self, SocketKind::Pull)
    }

    pub fn can_receive(&self) -> bool {
        !matches!(self, SocketKind::Push)
    }
}

/// Whether a socket binds an endpoint or connects to it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AttachMode {
    Bind,
    #[default]
    Connect,
}

impl From<Attachment> for AttachMode {
    fn from(attachment: Attachment) -> Self {
        match attachment {
            Attachment::Bind => AttachMode::Bind,
            Attachment::Connect => AttachMode::Connect,
        }
    }
}

/// Socket tuning
#[derive(Debug, Clone)]
pub struct SocketOptions {
    /// Applied by [`Socket::recv`]; `None` blocks until a frame arrives
    pub receive_timeout: Option<Duration>,
    /// Wait for room in a full outbound queue; `None` waits forever
    pub send_timeout: Option<Duration>,
    /// Frames queued per direction
    pub high_water_mark: usize,
    pub reconnect_interval: Duration,
    pub max_frame_size: usize,
}

impl SocketOptions {
    pub fn with_receive_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn with_send_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.send_timeout = timeout;
        self
    }

    fn queue_depth(&self) -> usize {
        self.high_water_mark.max(1)
    }
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self::from(&SocketConfig::default())
    }
}

impl From<&SocketConfig> for SocketOptions {
    fn from(config: &SocketConfig) -> Self {
        Self {
            receive_timeout: config.receive_timeout_ms.map(Duration::from_millis),
            send_timeout: config.send_timeout_ms.map(Duration::from_millis),
            high_water_mark: config.high_water_mark,
            reconnect_interval: Duration::from_millis(config.reconnect_interval_ms),
            max_frame_size: config.max_frame_size,
        }
    }
}

struct Inbound {
    peer: PeerId,
    frame: Bytes,
}

/// State shared between a socket and its connection tasks
struct SocketShared {
    kind: SocketKind,
    options: SocketOptions,
    inbox: mpsc::Sender<Inbound>,
    outbox: AsyncMutex<mpsc::Receiver<Bytes>>,
    peers: DashMap<PeerId, mpsc::Sender<Bytes>>,
    next_peer: AtomicU64,
}

pub struct Socket {
    id: u64,
    context: Context,
    shared: Arc<SocketShared>,
    inbox: AsyncMutex<mpsc::Receiver<Inbound>>,
    outbox: mpsc::Sender<Bytes>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    bound: parking_lot::Mutex<Vec<Endpoint>>,
    ipc_files: parking_lot::Mutex<Vec<PathBuf>>,
    inproc_names: parking_lot::Mutex<Vec<String>>,
    closed: watch::Sender<bool>,
}

impl Socket {
    pub(crate) fn new(context: Context, kind: SocketKind, options: SocketOptions) -> Self {
        let depth = options.queue_depth();
        let (inbox_tx, inbox_rx) = mpsc::channel(depth);
        let (outbox_tx, outbox_rx) = mpsc::channel(depth);
        let id = context.socket_opened();

        debug!(socket = id, kind = kind.as_str(), "Created socket");
        Self {
            id,
            context,
            shared: Arc::new(SocketShared {
                kind,
                options,
                inbox: inbox_tx,
                outbox: AsyncMutex::new(outbox_rx),
                peers: DashMap::new(),
                next_peer: AtomicU64::new(1),
            }),
            inbox: AsyncMutex::new(inbox_rx),
            outbox: outbox_tx,
            tasks: parking_lot::Mutex::new(Vec::new()),
            bound: parking_lot::Mutex::new(Vec::new()),
            ipc_files: parking_lot::Mutex::new(Vec::new()),
            inproc_names: parking_lot::Mutex::new(Vec::new()),
            closed: watch::Sender::new(false),
        }
    }

    pub fn kind(&self) -> SocketKind {
        self.shared.kind
    }

    pub fn options(&self) -> &SocketOptions {
        &self.shared.options
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }

    /// Bind or connect
    pub async fn attach(&self, endpoint: &Endpoint, mode: AttachMode) -> Result<()> {
        match mode {
            AttachMode::Bind => self.bind(endpoint).await.map(|_| ()),
            AttachMode::Connect => self.connect(endpoint).await,
        }
    }

    /// Bind an endpoint and accept peers on it; returns the resolved endpoint
    pub async fn bind(&self, endpoint: &Endpoint) -> Result<Endpoint> {
        self.ensure_open()?;

        let listener = transports::listen(endpoint).await?;
        let local = listener.local_endpoint(endpoint)?;

        match endpoint.scheme() {
            Scheme::Ipc => {
                if let Some(path) = endpoint.ipc_path() {
                    reclaim::register(path);
                    self.ipc_files.lock().push(path.to_path_buf());
                }
            }
            Scheme::Inproc => {
                if let Some(name) = endpoint.inproc_name() {
                    self.inproc_names.lock().push(name.to_string());
                }
            }
            Scheme::Tcp => {}
        }

        let task = self
            .context
            .spawn(accept_loop(listener, Arc::clone(&self.shared)));
        self.tasks.lock().push(task);
        self.bound.lock().push(local.clone());

        debug!(socket = self.id, endpoint = %local, "Socket bound");
        Ok(local)
    }

    /// Connect to an endpoint; the peer does not have to be bound yet
    pub async fn connect(&self, endpoint: &Endpoint) -> Result<()> {
        self.ensure_open()?;
        transports::validate_dial_target(endpoint).await?;

        let task = self
            .context
            .spawn(dial_loop(endpoint.clone(), Arc::clone(&self.shared)));
        self.tasks.lock().push(task);

        debug!(socket = self.id, endpoint = %endpoint, "Socket connecting");
        Ok(())
    }

    /// Queue a frame for the next available peer
    pub async fn send(&self, frame: Bytes) -> Result<()> {
        self.ensure_open()?;
        match self.shared.kind {
            SocketKind::Push | SocketKind::Dealer => {}
            other => return Err(TransportError::unsupported("send", other.as_str())),
        }
        enqueue(&self.outbox, frame, self.shared.options.send_timeout).await
    }

    /// Queue a frame for one peer of a router socket
    pub async fn send_to(&self, peer: PeerId, frame: Bytes) -> Result<()> {
        self.ensure_open()?;
        if self.shared.kind != SocketKind::Router {
            return Err(TransportError::unsupported(
                "send_to",
                self.shared.kind.as_str(),
            ));
        }

        let queue = self
            .shared
            .peers
            .get(&peer)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| TransportError::connection("peer is no longer connected", Some(peer)))?;
        enqueue(&queue, frame, self.shared.options.send_timeout).await
    }

    /// Receive with the socket's configured timeout
    pub async fn recv(&self) -> Result<MessageBuffer> {
        match self.shared.options.receive_timeout {
            Some(timeout) => self.recv_timeout(timeout).await,
            None => self.recv_next().await,
        }
    }

    /// Receive, giving up after `timeout`; a zero timeout still checks once
    pub async fn recv_timeout(&self, timeout: Duration) -> Result<MessageBuffer> {
        tokio::time::timeout(timeout, self.recv_next())
            .await
            .map_err(|_| TransportError::receive_timed_out(timeout))?
    }

    /// Take a frame only if one is already queued
    pub fn try_recv(&self) -> Result<Option<MessageBuffer>> {
        self.ensure_receivable()?;

        // Another receive in progress owns the queue
        let Ok(mut inbox) = self.inbox.try_lock() else {
            return Ok(None);
        };
        match inbox.try_recv() {
            Ok(inbound) => Ok(Some(self.hand_out(inbound))),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }

    async fn recv_next(&self) -> Result<MessageBuffer> {
        self.ensure_receivable()?;

        let closed = closed_signal(self.closed.subscribe());
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            inbound = inbox.recv() => match inbound {
                Some(inbound) => Ok(self.hand_out(inbound)),
                None => Err(TransportError::Closed),
            },
            _ = closed => Err(TransportError::Closed),
        }
    }

    fn ensure_receivable(&self) -> Result<()> {
        self.ensure_open()?;
        if !self.shared.kind.can_receive() {
            return Err(TransportError::unsupported(
                "receive",
                self.shared.kind.as_str(),
            ));
        }
        Ok(())
    }

    fn hand_out(&self, inbound: Inbound) -> MessageBuffer {
        trace!(socket = self.id, peer = inbound.peer, len = inbound.frame.len(), "Frame received");
        self.context.ledger().acquire(inbound.peer, inbound.frame)
    }

    /// Endpoints this socket is bound to, with ephemeral tcp ports resolved
    pub fn bound_endpoints(&self) -> Vec<Endpoint> {
        self.bound.lock().clone()
    }

    /// Interprocess socket files this socket created
    pub fn ipc_paths(&self) -> Vec<PathBuf> {
        self.ipc_files.lock().clone()
    }

    /// Connected peers of a router socket
    pub fn peer_count(&self) -> usize {
        self.shared.peers.len()
    }

    /// Stop every connection and remove bound interprocess files; idempotent
    pub fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }

        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        for path in self.ipc_files.lock().drain(..) {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(?path, error = %e, "Failed to remove ipc binding");
                }
            }
            reclaim::unregister(&path);
        }
        for name in self.inproc_names.lock().drain(..) {
            transports::inproc::unregister(&name);
        }
        self.shared.peers.clear();
        self.context.socket_closed();

        debug!(socket = self.id, kind = self.shared.kind.as_str(), "Socket closed");
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("kind", &self.shared.kind)
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn enqueue(
    queue: &mpsc::Sender<Bytes>,
    frame: Bytes,
    timeout: Option<Duration>,
) -> Result<()> {
    match timeout {
        Some(timeout) => queue.send_timeout(frame, timeout).await.map_err(|e| match e {
            mpsc::error::SendTimeoutError::Timeout(_) => TransportError::send_timed_out(timeout),
            mpsc::error::SendTimeoutError::Closed(_) => TransportError::Closed,
        }),
        None => queue.send(frame).await.map_err(|_| TransportError::Closed),
    }
}

/// Resolves once the socket is marked closed
async fn closed_signal(mut closed: watch::Receiver<bool>) {
    loop {
        let is_closed = *closed.borrow_and_update();
        if is_closed || closed.changed().await.is_err() {
            return;
        }
    }
}

async fn accept_loop(mut listener: Listener, shared: Arc<SocketShared>) {
    // Dropping the set aborts every connection when the socket closes
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    connections.spawn(run_connection(stream, Arc::clone(&shared)));
                }
                Err(e) => {
                    warn!(error = %e, "Accept failed");
                    tokio::time::sleep(shared.options.reconnect_interval).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn dial_loop(endpoint: Endpoint, shared: Arc<SocketShared>) {
    loop {
        match transports::dial(&endpoint, INPROC_STREAM_BUFFER).await {
            Ok(stream) => {
                debug!(endpoint = %endpoint, "Peer connected");
                run_connection(stream, Arc::clone(&shared)).await;
                debug!(endpoint = %endpoint, "Peer disconnected, redialing");
            }
            Err(e) => trace!(endpoint = %endpoint, error = %e, "Dial failed"),
        }
        tokio::time::sleep(shared.options.reconnect_interval).await;
    }
}

/// Pump frames both ways on one peer stream until either side ends
async fn run_connection(stream: BoxedStream, shared: Arc<SocketShared>) {
    let peer = shared.next_peer.fetch_add(1, Ordering::Relaxed);
    let (read_half, write_half) = tokio::io::split(stream);
    let mut reader = FrameReader::new(read_half, shared.options.max_frame_size);
    let mut writer = FrameWriter::new(write_half);

    // Router replies are addressed, so each peer gets its own queue
    let mut peer_queue = if shared.kind == SocketKind::Router {
        let (tx, rx) = mpsc::channel(shared.options.queue_depth());
        shared.peers.insert(peer, tx);
        Some(rx)
    } else {
        None
    };

    let inbound = async {
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if !shared.kind.can_receive() {
                        continue;
                    }
                    if shared.inbox.send(Inbound { peer, frame }).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(peer, error = %e, "Read side failed");
                    break;
                }
            }
        }
    };

    let outbound = async {
        loop {
            let frame = match peer_queue.as_mut() {
                Some(queue) => queue.recv().await,
                None if matches!(shared.kind, SocketKind::Push | SocketKind::Dealer) => {
                    let mut outbox = shared.outbox.lock().await;
                    outbox.recv().await
                }
                None => std::future::pending().await,
            };
            let Some(frame) = frame else { break };
            if let Err(e) = writer.write_frame(&frame).await {
                debug!(peer, error = %e, "Write side failed");
                break;
            }
        }
    };

    tokio::select! {
        _ = inbound => {}
        _ = outbound => {}
    }

    if shared.kind == SocketKind::Router {
        shared.peers.remove(&peer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn context() -> Context {
        Context::new().unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_push_pull_over_ipc() {
        let dir = tempdir().unwrap();
        let endpoint =
            Endpoint::parse(&format!("ipc://{}", dir.path().join("pp.ipc").display())).unwrap();
        let ctx = context();

        let pull = ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap();
        pull.bind(&endpoint).await.unwrap();
        let push = ctx.socket(SocketKind::Push, SocketOptions::default()).unwrap();
        push.connect(&endpoint).await.unwrap();

        push.send(Bytes::from_static(b"frame one")).await.unwrap();
        push.send(Bytes::from_static(b"frame two")).await.unwrap();

        let first = pull.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&first[..], b"frame one");
        let second = pull.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&second[..], b"frame two");
        assert_eq!(ctx.outstanding_buffers(), 2);

        drop(first);
        second.release();
        assert_eq!(ctx.outstanding_buffers(), 0);
    }

    #[tokio::test]
    async fn test_dealer_router_over_tcp() {
        let ctx = context();
        let router = ctx.socket(SocketKind::Router, SocketOptions::default()).unwrap();
        let local = router
            .bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
            .await
            .unwrap();
        assert_ne!(local.host_port().unwrap().1, 0);

        let dealer = ctx.socket(SocketKind::Dealer, SocketOptions::default()).unwrap();
        dealer.connect(&local).await.unwrap();
        dealer.send(Bytes::from_static(b"ping")).await.unwrap();

        let request = router.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&request[..], b"ping");
        router
            .send_to(request.peer(), Bytes::from_static(b"pong"))
            .await
            .unwrap();

        let reply = dealer.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&reply[..], b"pong");
    }

    #[tokio::test]
    async fn test_dealer_router_over_inproc() {
        let ctx = context();
        let endpoint = Endpoint::parse("inproc://socket-test-dealer-router").unwrap();
        let router = ctx.socket(SocketKind::Router, SocketOptions::default()).unwrap();
        router.bind(&endpoint).await.unwrap();
        let dealer = ctx.socket(SocketKind::Dealer, SocketOptions::default()).unwrap();
        dealer.connect(&endpoint).await.unwrap();

        dealer.send(Bytes::from_static(b"hello")).await.unwrap();
        let request = router.recv_timeout(Duration::from_secs(5)).await.unwrap();
        router
            .send_to(request.peer(), Bytes::copy_from_slice(&request))
            .await
            .unwrap();
        let echo = dealer.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&echo[..], b"hello");
    }

    #[tokio::test]
    async fn test_connect_succeeds_before_peer_binds() {
        let dir = tempdir().unwrap();
        let endpoint =
            Endpoint::parse(&format!("ipc://{}", dir.path().join("late.ipc").display())).unwrap();
        let ctx = context();

        let push = ctx.socket(SocketKind::Push, SocketOptions::default()).unwrap();
        push.connect(&endpoint).await.unwrap();
        push.send(Bytes::from_static(b"queued early")).await.unwrap();

        let pull = ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap();
        pull.bind(&endpoint).await.unwrap();
        let frame = pull.recv_timeout(Duration::from_secs(5)).await.unwrap();
        assert_eq!(&frame[..], b"queued early");
    }

    #[tokio::test]
    async fn test_receive_timeout() {
        let ctx = context();
        let pull = ctx
            .socket(
                SocketKind::Pull,
                SocketOptions::default().with_receive_timeout(Some(Duration::from_millis(20))),
            )
            .unwrap();
        pull.bind(&Endpoint::parse("tcp://127.0.0.1:0").unwrap())
            .await
            .unwrap();

        let err = pull.recv().await.unwrap_err();
        assert!(err.is_timeout());
        let err = pull.recv_timeout(Duration::ZERO).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(pull.try_recv().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_kind_restrictions() {
        let ctx = context();
        let pull = ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap();
        assert!(matches!(
            pull.send(Bytes::new()).await,
            Err(TransportError::Unsupported { operation: "send", .. })
        ));
        let push = ctx.socket(SocketKind::Push, SocketOptions::default()).unwrap();
        assert!(matches!(
            push.try_recv(),
            Err(TransportError::Unsupported { .. })
        ));
        let dealer = ctx.socket(SocketKind::Dealer, SocketOptions::default()).unwrap();
        assert!(dealer.send_to(1, Bytes::new()).await.is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("closing.ipc");
        let endpoint = Endpoint::parse(&format!("ipc://{}", path.display())).unwrap();
        let ctx = context();

        let pull = ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap();
        pull.bind(&endpoint).await.unwrap();
        assert!(path.exists());
        assert!(reclaim::is_registered(&path));

        pull.close();
        pull.close();
        assert!(pull.is_closed());
        assert!(!path.exists());
        assert!(!reclaim::is_registered(&path));
        assert_eq!(ctx.live_sockets(), 0);

        assert!(matches!(pull.recv().await, Err(TransportError::Closed)));
        assert!(matches!(
            pull.bind(&endpoint).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_close_wakes_blocked_receiver() {
        let ctx = context();
        let pull = Arc::new(ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap());

        let waiter = {
            let pull = Arc::clone(&pull);
            tokio::spawn(async move { pull.recv().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pull.close();

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn test_inproc_name_reusable_after_close() {
        let ctx = context();
        let endpoint = Endpoint::parse("inproc://socket-test-rebind").unwrap();

        let first = ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap();
        first.bind(&endpoint).await.unwrap();
        let second = ctx.socket(SocketKind::Pull, SocketOptions::default()).unwrap();
        assert!(matches!(
            second.bind(&endpoint).await,
            Err(TransportError::BindFailed { .. })
        ));

        first.close();
        second.bind(&endpoint).await.unwrap();
    }

    #[tokio::test]
    async fn test_connect_to_wildcard_host_fails() {
        let ctx = context();
        let dealer = ctx.socket(SocketKind::Dealer, SocketOptions::default()).unwrap();
        assert!(matches!(
            dealer.connect(&Endpoint::parse("tcp://*:5555").unwrap()).await,
            Err(TransportError::ConnectFailed { .. })
        ));
    }
}
