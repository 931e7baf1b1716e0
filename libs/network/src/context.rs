//! Transport context
//!
//! A context owns what its sockets share: the runtime their connection tasks
//! run on and the ledger counting receive buffers handed to callers. It is
//! cheap to clone; all clones refer to the same context.

use crate::buffer::BufferLedger;
use crate::socket::{Socket, SocketKind, SocketOptions};
use crate::{Result, TransportError};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    runtime: Handle,
    ledger: Arc<BufferLedger>,
    terminated: AtomicBool,
    live_sockets: AtomicUsize,
    next_socket: AtomicU64,
}

impl Context {
    /// Open a context on the current tokio runtime
    pub fn new() -> Result<Self> {
        let runtime = Handle::try_current().map_err(|e| {
            TransportError::unavailable_with_source("no tokio runtime to drive the context", e)
        })?;
        Ok(Self::with_runtime(runtime))
    }

    /// Open a context driving its sockets on the given runtime
    pub fn with_runtime(runtime: Handle) -> Self {
        debug!("Opened transport context");
        Self {
            inner: Arc::new(ContextInner {
                runtime,
                ledger: BufferLedger::new(),
                terminated: AtomicBool::new(false),
                live_sockets: AtomicUsize::new(0),
                next_socket: AtomicU64::new(1),
            }),
        }
    }

    /// Create a socket of the given kind
    pub fn socket(&self, kind: SocketKind, options: SocketOptions) -> Result<Socket> {
        if self.is_terminated() {
            return Err(TransportError::unavailable("context has been terminated"));
        }
        Ok(Socket::new(self.clone(), kind, options))
    }

    /// Refuse any further sockets; existing sockets keep working until closed
    pub fn terminate(&self) {
        if !self.inner.terminated.swap(true, Ordering::AcqRel) {
            debug!(
                live_sockets = self.live_sockets(),
                "Terminated transport context"
            );
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.inner.terminated.load(Ordering::Acquire)
    }

    pub fn ledger(&self) -> &Arc<BufferLedger> {
        &self.inner.ledger
    }

    /// Receive buffers handed out and not yet dropped
    pub fn outstanding_buffers(&self) -> usize {
        self.inner.ledger.outstanding()
    }

    /// Sockets created and not yet closed
    pub fn live_sockets(&self) -> usize {
        self.inner.live_sockets.load(Ordering::Acquire)
    }

    /// Run a task on the context's runtime
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.inner.runtime.spawn(task)
    }

    pub(crate) fn socket_opened(&self) -> u64 {
        self.inner.live_sockets.fetch_add(1, Ordering::AcqRel);
        self.inner.next_socket.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn socket_closed(&self) {
        self.inner.live_sockets.fetch_sub(1, Ordering::AcqRel);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("terminated", &self.is_terminated())
            .field("live_sockets", &self.live_sockets())
            .field("outstanding_buffers", &self.outstanding_buffers())
            .finish()
    }
}
