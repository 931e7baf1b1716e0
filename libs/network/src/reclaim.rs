//! Interprocess binding reclamation
//!
//! Every `ipc://` file a socket binds is recorded in a process-wide registry
//! until the socket closes. When the process dies on a fatal path, the
//! registered files are removed so the next process can bind the same
//! locations without tripping over stale sockets.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tracing::{error, warn};

static BOUND_FILES: Lazy<Mutex<HashSet<PathBuf>>> = Lazy::new(|| Mutex::new(HashSet::new()));

static FATAL_HANDLER: Once = Once::new();

/// Record a socket file created by a bind
pub fn register(path: &Path) {
    BOUND_FILES.lock().insert(path.to_path_buf());
}

/// Forget a socket file its owner already removed
pub fn unregister(path: &Path) {
    BOUND_FILES.lock().remove(path);
}

pub fn is_registered(path: &Path) -> bool {
    BOUND_FILES.lock().contains(path)
}

pub fn bound_files() -> Vec<PathBuf> {
    BOUND_FILES.lock().iter().cloned().collect()
}

/// Remove every registered socket file; returns how many were removed
pub fn reclaim_all() -> usize {
    // try_lock: a fatal path must not deadlock on a lock its own thread holds
    let Some(mut files) = BOUND_FILES.try_lock() else {
        return 0;
    };

    let mut removed = 0;
    for path in files.drain() {
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(?path, error = %e, "Failed to reclaim ipc binding"),
        }
    }
    removed
}

/// Remove registered socket files before any panic unwinds or aborts
pub fn install_fatal_handler() {
    FATAL_HANDLER.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            reclaim_all();
            previous(info);
        }));
    });
}

/// On SIGTERM or SIGHUP remove registered socket files and exit with
/// `128 + signo`. SIGINT is left to the application's graceful shutdown.
/// Must be called from within a tokio runtime.
pub fn spawn_signal_reclaimer() -> std::io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Handle::try_current()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;

    let _guard = runtime.enter();
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;

    Ok(runtime.spawn(async move {
        let signo = tokio::select! {
            _ = terminate.recv() => 15,
            _ = hangup.recv() => 1,
        };
        let removed = reclaim_all();
        warn!(signo, removed, "Fatal signal received, exiting");
        std::process::exit(128 + signo);
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_unregister() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.ipc");

        register(&path);
        assert!(is_registered(&path));
        assert!(bound_files().contains(&path));

        unregister(&path);
        assert!(!is_registered(&path));
    }

    #[test]
    fn test_signal_reclaimer_requires_runtime() {
        assert!(spawn_signal_reclaimer().is_err());
    }
}
