//! Transport-owned receive buffers
//!
//! Every frame handed out by a receive is wrapped in a [`MessageBuffer`]
//! counted against its context's [`BufferLedger`]. The buffer stays owned by
//! the transport until it is dropped or explicitly [`released`], so a leaked
//! receive shows up as a non-zero `outstanding()` count.
//!
//! [`released`]: MessageBuffer::release

use bytes::Bytes;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Identifier of one peer connection on a socket
pub type PeerId = u64;

/// Per-context accounting of receive buffers
#[derive(Debug, Default)]
pub struct BufferLedger {
    outstanding: AtomicUsize,
    acquired: AtomicU64,
    bytes_acquired: AtomicU64,
}

impl BufferLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Hand a received frame to the caller, counting it as outstanding
    pub(crate) fn acquire(self: &Arc<Self>, peer: PeerId, frame: Bytes) -> MessageBuffer {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        self.acquired.fetch_add(1, Ordering::Relaxed);
        self.bytes_acquired
            .fetch_add(frame.len() as u64, Ordering::Relaxed);
        MessageBuffer {
            frame,
            peer,
            ledger: Arc::clone(self),
        }
    }

    /// Buffers handed out and not yet released
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Buffers handed out over the ledger's lifetime
    pub fn total_acquired(&self) -> u64 {
        self.acquired.load(Ordering::Relaxed)
    }

    pub fn total_bytes(&self) -> u64 {
        self.bytes_acquired.load(Ordering::Relaxed)
    }
}

/// A received frame, owned by the transport until dropped
pub struct MessageBuffer {
    frame: Bytes,
    peer: PeerId,
    ledger: Arc<BufferLedger>,
}

impl MessageBuffer {
    /// Connection the frame arrived on
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.frame
    }

    /// Return the buffer to the transport
    pub fn release(self) {}
}

impl Deref for MessageBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.frame
    }
}

impl AsRef<[u8]> for MessageBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.frame
    }
}

impl fmt::Debug for MessageBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageBuffer")
            .field("peer", &self.peer)
            .field("len", &self.frame.len())
            .finish()
    }
}

impl Drop for MessageBuffer {
    fn drop(&mut self) {
        self.ledger.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}
