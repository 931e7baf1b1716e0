//! RPC Link
//!
//! Request/reply client over a `Dealer` socket. `send` is a bounded
//! synchronous round trip; `send_async` and `get_async_reply` split the round
//! trip so many requests can be in flight, each keyed by a correlation id.
//!
//! Replies are demultiplexed cooperatively: only one caller polls the socket
//! at a time, and every frame it reads completes whichever pending id it
//! answers. Callers waiting on other ids find their replies in the store.
//!
//! The link never raises. Setup failures make `initialize` return false; a
//! link that is uninitialized, failed, closed or vacated answers `""`,
//! `false` or `None`.

use super::factory::{MessageQueueFactory, SocketFactory};
use super::pending::{spawn_sweeper, Delivery, PendingStore};
use super::wire::RpcFrame;
use netmon_config::MessagingConfig;
use network::{AttachMode, Context, Endpoint, MessageBuffer, Socket, SocketOptions};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

/// Shortest poll slice; a zero slice would spin
const MIN_POLL_SLICE: Duration = Duration::from_millis(1);

/// Link tuning
#[derive(Debug, Clone)]
pub struct LinkSettings {
    /// Upper bound on a synchronous `send`
    pub receive_timeout: Duration,
    /// Longest single socket poll while collecting a reply
    pub poll_slice: Duration,
    pub attach: AttachMode,
    pub socket: SocketOptions,
    /// Age after which an uncollected entry may be reclaimed
    pub retention: Duration,
    /// Background sweep period; `None` leaves reclamation to explicit calls
    pub sweep_interval: Option<Duration>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self::from(&MessagingConfig::default())
    }
}

impl From<&MessagingConfig> for LinkSettings {
    fn from(config: &MessagingConfig) -> Self {
        Self {
            receive_timeout: Duration::from_millis(config.link.receive_timeout_ms),
            poll_slice: Duration::from_millis(config.link.poll_slice_ms).max(MIN_POLL_SLICE),
            attach: config.link.attach.into(),
            socket: SocketOptions::from(&config.socket),
            retention: Duration::from_secs(config.pending.retention_secs),
            sweep_interval: config
                .pending
                .sweep_interval_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        }
    }
}

/// Everything that exists only while the link is initialized
struct Session {
    endpoint: Endpoint,
    context: Context,
    socket: Socket,
    pending: Arc<PendingStore>,
    /// Held by whoever is physically polling the socket
    poller: AsyncMutex<()>,
    sequence: AtomicU64,
    sweeper: Option<JoinHandle<()>>,
}

impl Session {
    /// Register `id` and send the request; returns the send's sequence
    async fn transmit(&self, id: &str, body: &str) -> Option<u64> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        // Registered first so a fast reply is never dropped as unknown
        self.pending.register(id, sequence);

        let sent = match RpcFrame::new(id, sequence, body).encode() {
            Ok(frame) => self.socket.send(frame).await,
            Err(e) => Err(e),
        };
        match sent {
            Ok(()) => Some(sequence),
            Err(e) => {
                self.pending.abandon(id, sequence);
                warn!(
                    endpoint = %self.endpoint,
                    id,
                    error = %e,
                    category = e.category(),
                    "Failed to send request"
                );
                None
            }
        }
    }

    /// Wait up to `timeout` for the reply to `id`, polling in bounded slices
    async fn collect(&self, id: &str, timeout: Duration, poll_slice: Duration) -> Option<String> {
        let deadline = Instant::now() + timeout;
        let _watch = self.pending.watch(id);

        loop {
            if let Some(reply) = self.pending.take(id) {
                return Some(reply);
            }

            let slice = remaining(deadline).min(poll_slice);
            // Another caller polling feeds our id too; re-check after its slice
            if let Ok(_poller) = tokio::time::timeout(slice, self.poller.lock()).await {
                if let Some(reply) = self.pending.take(id) {
                    return Some(reply);
                }
                // Waiting for the lock used up part of the budget
                self.poll_once(remaining(deadline).min(poll_slice)).await;
            }

            if Instant::now() >= deadline {
                return self.pending.take(id);
            }
        }
    }

    /// One bounded receive, then drain whatever else is already queued
    async fn poll_once(&self, slice: Duration) {
        match self.socket.recv_timeout(slice).await {
            Ok(buffer) => {
                self.demultiplex(buffer);
                while let Ok(Some(buffer)) = self.socket.try_recv() {
                    self.demultiplex(buffer);
                }
            }
            Err(e) if e.is_timeout() => {}
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "Poll failed");
                tokio::time::sleep(slice).await;
            }
        }
    }

    fn demultiplex(&self, buffer: MessageBuffer) {
        let decoded = RpcFrame::decode(&buffer);
        buffer.release();

        match decoded {
            Ok(frame) => {
                let delivery =
                    self.pending
                        .complete(&frame.correlation_id, frame.sequence, frame.body);
                if delivery != Delivery::Accepted {
                    trace!(
                        id = %frame.correlation_id,
                        sequence = frame.sequence,
                        ?delivery,
                        "Reply not stored"
                    );
                }
            }
            Err(e) => warn!(endpoint = %self.endpoint, error = %e, "Discarding undecodable reply"),
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.abort();
        }
        self.socket.close();
        self.context.terminate();
        debug!(endpoint = %self.endpoint, "RPC link closed");
    }
}

pub struct RpcLink {
    binding: String,
    settings: LinkSettings,
    factory: Arc<dyn SocketFactory>,
    session: Option<Session>,
}

impl RpcLink {
    pub fn new(binding: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            settings: LinkSettings::default(),
            factory: Arc::new(MessageQueueFactory),
            session: None,
        }
    }

    /// Link with settings taken from the messaging configuration
    pub fn from_config(binding: impl Into<String>, config: &MessagingConfig) -> Self {
        Self::new(binding).with_settings(LinkSettings::from(config))
    }

    pub fn with_settings(mut self, mut settings: LinkSettings) -> Self {
        settings.poll_slice = settings.poll_slice.max(MIN_POLL_SLICE);
        self.settings = settings;
        self
    }

    pub fn with_factory(mut self, factory: Arc<dyn SocketFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Parse the binding, open the context, create the socket and attach it.
    /// Returns false, leaving the link uninitialized, if any step fails.
    pub async fn initialize(&mut self) -> bool {
        if self.session.is_some() {
            return true;
        }

        match self.open_session().await {
            Ok(session) => {
                info!(endpoint = %session.endpoint, attach = ?self.settings.attach, "RPC link initialized");
                self.session = Some(session);
                true
            }
            Err(e) => {
                warn!(
                    binding = %self.binding,
                    error = %e,
                    category = e.category(),
                    "RPC link failed to initialize"
                );
                false
            }
        }
    }

    async fn open_session(&self) -> network::Result<Session> {
        let endpoint = Endpoint::parse(&self.binding)?;
        let context = self.factory.new_context()?;
        let socket = self
            .factory
            .new_socket(&context, self.settings.socket.clone())?;
        self.factory
            .attach(&socket, &endpoint, self.settings.attach)
            .await?;

        let pending = Arc::new(PendingStore::new(self.settings.retention));
        let sweeper = self
            .settings
            .sweep_interval
            .filter(|interval| !interval.is_zero())
            .map(|interval| spawn_sweeper(&context, Arc::downgrade(&pending), interval));

        Ok(Session {
            endpoint,
            context,
            socket,
            pending,
            poller: AsyncMutex::new(()),
            sequence: AtomicU64::new(1),
            sweeper,
        })
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    /// Round trip bounded by the receive timeout; `""` on any failure
    pub async fn send(&self, request: &str) -> String {
        let Some(session) = &self.session else {
            debug!(binding = %self.binding, "Send on uninitialized link");
            return String::new();
        };

        let id = Self::generate_id();
        let Some(sequence) = session.transmit(&id, request).await else {
            return String::new();
        };

        match session
            .collect(&id, self.settings.receive_timeout, self.settings.poll_slice)
            .await
        {
            Some(reply) => reply,
            None => {
                session.pending.abandon(&id, sequence);
                debug!(
                    endpoint = %session.endpoint,
                    timeout_ms = self.settings.receive_timeout.as_millis() as u64,
                    "No reply within receive timeout"
                );
                String::new()
            }
        }
    }

    /// Send a request whose reply is collected later under `id`. Reusing an
    /// uncollected id replaces its earlier request.
    pub async fn send_async(&self, id: &str, request: &str) -> bool {
        match &self.session {
            Some(session) => session.transmit(id, request).await.is_some(),
            None => {
                debug!(binding = %self.binding, id, "Async send on uninitialized link");
                false
            }
        }
    }

    /// Collect the reply for `id`, waiting up to `timeout`. A reply is
    /// handed out once; a zero timeout still polls the socket once.
    pub async fn get_async_reply(&self, id: &str, timeout: Duration) -> Option<String> {
        let session = self.session.as_ref()?;
        session.collect(id, timeout, self.settings.poll_slice).await
    }

    /// Fresh correlation id
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Move the link out, leaving this one vacant
    pub fn take(&mut self) -> RpcLink {
        let vacant = RpcLink {
            binding: String::new(),
            settings: self.settings.clone(),
            factory: Arc::clone(&self.factory),
            session: None,
        };
        std::mem::replace(self, vacant)
    }

    /// Exchange binding, settings, socket and pending store with `other`
    pub fn swap(&mut self, other: &mut RpcLink) {
        std::mem::swap(self, other);
    }

    /// Close the socket and context; the link answers as uninitialized after
    pub fn close(&mut self) {
        self.session = None;
    }

    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Socket file backing the link when it is bound on `ipc://`
    pub fn bound_path(&self) -> Option<PathBuf> {
        self.session
            .as_ref()
            .and_then(|session| session.socket.ipc_paths().into_iter().next())
    }

    /// Endpoints the link is bound to, ephemeral tcp ports resolved
    pub fn local_endpoints(&self) -> Vec<Endpoint> {
        self.session
            .as_ref()
            .map(|session| session.socket.bound_endpoints())
            .unwrap_or_default()
    }

    /// True while `id` is awaiting a reply or holding an uncollected one
    pub fn has_pending(&self, id: &str) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.pending.contains(id))
    }

    /// The reply stored for `id`, without consuming it
    pub fn cached_reply(&self, id: &str) -> Option<String> {
        self.session.as_ref()?.pending.peek(id)
    }

    pub fn pending_count(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.pending.len())
    }

    /// Drop every pending entry nobody is waiting on; returns the count
    pub fn force_gc(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.pending.sweep_all())
    }

    /// Drop pending entries older than the retention window
    pub fn clean_old_pending_data(&self) -> usize {
        self.session
            .as_ref()
            .map_or(0, |session| session.pending.sweep_expired())
    }
}

impl std::fmt::Debug for RpcLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcLink")
            .field("binding", &self.binding)
            .field("initialized", &self.is_initialized())
            .field("pending", &self.pending_count())
            .finish()
    }
}
