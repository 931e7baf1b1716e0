//! Pending-reply correlation store
//!
//! Maps correlation ids to the request awaiting a reply, or to the reply once
//! some poll has read it. One lock guards the whole map. Each entry records
//! the sequence of the latest send on its id, so a reply to an earlier send
//! on a reused id is discarded instead of completing the entry.
//!
//! Entries that nobody collects are reclaimed by age. An id with an active
//! waiter is never reclaimed, whatever its age.

use network::Context;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug)]
enum EntryState {
    Awaiting,
    Completed { reply: String, received_at: Instant },
}

#[derive(Debug)]
struct PendingEntry {
    sequence: u64,
    state: EntryState,
    registered_at: Instant,
}

impl PendingEntry {
    /// Instant the entry last changed state
    fn last_touched(&self) -> Instant {
        match &self.state {
            EntryState::Awaiting => self.registered_at,
            EntryState::Completed { received_at, .. } => *received_at,
        }
    }
}

/// What happened to a reply offered to the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Completed its entry
    Accepted,
    /// Answers a send that a later send on the same id replaced
    Stale,
    /// No entry for the id, e.g. already collected or reclaimed
    Unknown,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<String, PendingEntry>,
    watchers: HashMap<String, usize>,
}

pub struct PendingStore {
    inner: Mutex<Inner>,
    retention: Duration,
}

impl PendingStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Start awaiting a reply for `id`, replacing any earlier entry.
    /// Returns true when an earlier entry was replaced.
    pub fn register(&self, id: &str, sequence: u64) -> bool {
        let entry = PendingEntry {
            sequence,
            state: EntryState::Awaiting,
            registered_at: Instant::now(),
        };
        let replaced = self.inner.lock().entries.insert(id.to_string(), entry);
        if replaced.is_some() {
            debug!(id, sequence, "Replaced pending request");
        }
        replaced.is_some()
    }

    /// Offer a reply read off the socket
    pub fn complete(&self, id: &str, sequence: u64, reply: String) -> Delivery {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entries.get_mut(id) else {
            trace!(id, sequence, "Reply for unknown id dropped");
            return Delivery::Unknown;
        };
        if entry.sequence != sequence {
            trace!(id, sequence, current = entry.sequence, "Stale reply dropped");
            return Delivery::Stale;
        }
        entry.state = EntryState::Completed {
            reply,
            received_at: Instant::now(),
        };
        Delivery::Accepted
    }

    /// Consume the reply for `id` if it has arrived
    pub fn take(&self, id: &str) -> Option<String> {
        let mut inner = self.inner.lock();
        if !matches!(
            inner.entries.get(id).map(|entry| &entry.state),
            Some(EntryState::Completed { .. })
        ) {
            return None;
        }
        match inner.entries.remove(id).map(|entry| entry.state) {
            Some(EntryState::Completed { reply, .. }) => Some(reply),
            _ => None,
        }
    }

    /// Copy of the reply for `id` without consuming it
    pub fn peek(&self, id: &str) -> Option<String> {
        match &self.inner.lock().entries.get(id)?.state {
            EntryState::Completed { reply, .. } => Some(reply.clone()),
            EntryState::Awaiting => None,
        }
    }

    /// True while `id` is awaiting or holding an uncollected reply
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Drop the entry for `id` if it still belongs to `sequence`
    pub fn abandon(&self, id: &str, sequence: u64) {
        let mut inner = self.inner.lock();
        if inner.entries.get(id).map(|entry| entry.sequence) == Some(sequence) {
            inner.entries.remove(id);
        }
    }

    /// Mark `id` as waited on until the guard drops
    pub fn watch(&self, id: &str) -> Watch<'_> {
        *self.inner.lock().watchers.entry(id.to_string()).or_insert(0) += 1;
        Watch {
            store: self,
            id: id.to_string(),
        }
    }

    /// Remove entries untouched for the retention window; returns the count
    pub fn sweep_expired(&self) -> usize {
        self.sweep_at(Instant::now(), self.retention)
    }

    /// Remove every entry nobody is waiting on, whatever its age
    pub fn sweep_all(&self) -> usize {
        self.sweep_at(Instant::now(), Duration::ZERO)
    }

    /// Remove unwatched entries untouched for at least `retention` as of `now`
    pub fn sweep_at(&self, now: Instant, retention: Duration) -> usize {
        let mut inner = self.inner.lock();
        let Inner { entries, watchers } = &mut *inner;

        let before = entries.len();
        entries.retain(|id, entry| {
            watchers.contains_key(id)
                || now.saturating_duration_since(entry.last_touched()) < retention
        });
        let removed = before - entries.len();

        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Reclaimed pending entries");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PendingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingStore")
            .field("entries", &self.len())
            .field("retention", &self.retention)
            .finish()
    }
}

/// Keeps an id safe from reclamation while a caller waits on it
pub struct Watch<'a> {
    store: &'a PendingStore,
    id: String,
}

impl Drop for Watch<'_> {
    fn drop(&mut self) {
        let mut inner = self.store.inner.lock();
        if let Some(count) = inner.watchers.get_mut(&self.id) {
            *count -= 1;
            if *count == 0 {
                inner.watchers.remove(&self.id);
            }
        }
    }
}

/// Periodically reclaim expired entries until the store is dropped
pub fn spawn_sweeper(
    context: &Context,
    store: Weak<PendingStore>,
    interval: Duration,
) -> JoinHandle<()> {
    context.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let Some(store) = store.upgrade() else {
                break;
            };
            store.sweep_expired();
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_complete_take() {
        let store = PendingStore::new(Duration::from_secs(300));
        assert!(!store.register("a", 1));
        assert!(store.take("a").is_none());

        assert_eq!(store.complete("a", 1, "a reply".into()), Delivery::Accepted);
        assert_eq!(store.peek("a").as_deref(), Some("a reply"));
        assert_eq!(store.take("a").as_deref(), Some("a reply"));

        // Consumed exactly once
        assert!(store.take("a").is_none());
        assert!(!store.contains("a"));
        assert_eq!(store.complete("a", 1, "late".into()), Delivery::Unknown);
    }

    #[test]
    fn test_resend_replaces_entry() {
        let store = PendingStore::new(Duration::from_secs(300));
        store.register("id", 1);
        assert!(store.register("id", 2));
        assert_eq!(store.len(), 1);

        assert_eq!(store.complete("id", 1, "first".into()), Delivery::Stale);
        assert!(store.take("id").is_none());

        assert_eq!(store.complete("id", 2, "second".into()), Delivery::Accepted);
        assert_eq!(store.take("id").as_deref(), Some("second"));
    }

    #[test]
    fn test_abandon_respects_newer_send() {
        let store = PendingStore::new(Duration::from_secs(300));
        store.register("id", 1);
        store.register("id", 2);

        store.abandon("id", 1);
        assert!(store.contains("id"));
        store.abandon("id", 2);
        assert!(!store.contains("id"));
    }

    #[test]
    fn test_sweep_by_age() {
        let store = PendingStore::new(Duration::from_secs(60));
        store.register("old", 1);
        store.register("done", 2);
        store.complete("done", 2, "reply".into());

        let now = Instant::now();
        assert_eq!(store.sweep_at(now, Duration::from_secs(60)), 0);
        assert_eq!(store.sweep_at(now + Duration::from_secs(61), Duration::from_secs(60)), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_sweep_skips_watched_ids() {
        let store = PendingStore::new(Duration::from_secs(60));
        store.register("watched", 1);
        store.register("abandoned", 2);

        {
            let _watch = store.watch("watched");
            let _nested = store.watch("watched");
            assert_eq!(store.sweep_all(), 1);
            assert!(store.contains("watched"));
        }

        assert_eq!(store.sweep_all(), 1);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_background_sweeper() {
        let context = Context::new().unwrap();
        let store = std::sync::Arc::new(PendingStore::new(Duration::from_millis(50)));
        store.register("forgotten", 1);

        let sweeper = spawn_sweeper(
            &context,
            std::sync::Arc::downgrade(&store),
            Duration::from_millis(20),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.is_empty());

        drop(store);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(sweeper.is_finished());
    }
}
