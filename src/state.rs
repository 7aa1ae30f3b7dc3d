// src/state.rs
use crate::config::ServerConfig;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;

/// What one scan observed for a single file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStamp {
    pub modified: SystemTime,
    pub len: u64,
}

/// A file as recorded in [`WatchState`].
#[derive(Debug, Clone, Copy)]
struct Tracked {
    /// Last observed stamp, compared against the next scan.
    stamp: FileStamp,
    /// Latest modification time ever recorded. Never moves backwards.
    high_water: SystemTime,
}

/// Result of one scan: every readable regular file under the root.
pub type Snapshot = HashMap<PathBuf, FileStamp>;

/// Differences found by [`WatchState::reconcile`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ChangeSummary {
    pub fn is_changed(&self) -> bool {
        self.added + self.removed + self.modified > 0
    }
}

/// Last-known state of every file under the served root.
///
/// Owned by the change notifier; request handlers never see it.
#[derive(Debug, Default)]
pub struct WatchState {
    files: HashMap<PathBuf, Tracked>,
}

impl WatchState {
    /// Builds the initial state from a full scan.
    pub fn from_snapshot(snapshot: Snapshot) -> Self {
        let files = snapshot
            .into_iter()
            .map(|(path, stamp)| {
                (
                    path,
                    Tracked {
                        stamp,
                        high_water: stamp.modified,
                    },
                )
            })
            .collect();
        Self { files }
    }

    /// Applies a fresh scan. Added and modified files are recorded, vanished
    /// files are dropped, and the returned summary counts each kind.
    pub fn reconcile(&mut self, snapshot: Snapshot) -> ChangeSummary {
        let mut summary = ChangeSummary::default();

        let before = self.files.len();
        self.files.retain(|path, _| snapshot.contains_key(path));
        summary.removed = before - self.files.len();

        for (path, stamp) in snapshot {
            match self.files.get_mut(&path) {
                Some(tracked) => {
                    if tracked.stamp != stamp {
                        summary.modified += 1;
                        tracked.stamp = stamp;
                        if stamp.modified > tracked.high_water {
                            tracked.high_water = stamp.modified;
                        }
                    }
                }
                None => {
                    summary.added += 1;
                    self.files.insert(
                        path,
                        Tracked {
                            stamp,
                            high_water: stamp.modified,
                        },
                    );
                }
            }
        }

        summary
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn contains(&self, path: &std::path::Path) -> bool {
        self.files.contains_key(path)
    }

    /// Recorded modification time of `path`.
    pub fn modified(&self, path: &std::path::Path) -> Option<SystemTime> {
        self.files.get(path).map(|t| t.high_water)
    }
}

/// Monotonic reload version shared between the notifier (single writer) and
/// any number of request handlers.
#[derive(Debug, Clone)]
pub struct ReloadSignal {
    tx: Arc<watch::Sender<u64>>,
}

impl Default for ReloadSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ReloadSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx: Arc::new(tx) }
    }

    pub fn version(&self) -> u64 {
        *self.tx.borrow()
    }

    /// Increments the version and wakes every subscriber. Returns the new version.
    pub fn bump(&self) -> u64 {
        let mut next = 0;
        self.tx.send_modify(|v| {
            *v += 1;
            next = *v;
        });
        next
    }

    /// A receiver that resolves `changed()` on the next bump.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

/// Everything request handlers share: the immutable configuration and the
/// reload signal. Passed explicitly to the router as axum state.
#[derive(Debug, Clone)]
pub struct ServerContext {
    pub config: Arc<ServerConfig>,
    pub reload: ReloadSignal,
}

impl ServerContext {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config: Arc::new(config),
            reload: ReloadSignal::new(),
        }
    }
}
