// src/watcher.rs
use crate::config::{ServerConfig, WatchMode};
use crate::error::WatchError;
use crate::state::{ChangeSummary, FileStamp, ReloadSignal, Snapshot, WatchState};
use anyhow::Result;
use notify::Watcher as NotifyWatcherTrait; // To use .watcher() and .cache()
use notify_debouncer_full::{new_debouncer, DebounceEventResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::watch::Receiver as WatchReceiver;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Upper bound on how long OS events are batched before nudging a rescan.
pub const EVENT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Snapshot of one scan plus the subpaths that could not be read.
pub type ScanOutcome = (Snapshot, Vec<WatchError>);

/// Walks `root` and stamps every regular file.
///
/// Entries whose name is in `ignore` are skipped, and ignored directories are
/// not descended into. Unreadable subpaths are reported in the returned error
/// list while the rest of the tree is still scanned. Only an unreadable root
/// fails the whole scan.
pub fn scan_tree(root: &Path, ignore: &[String]) -> Result<ScanOutcome, WatchError> {
    let mut snapshot = Snapshot::new();
    let mut errors = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !ignore
                    .iter()
                    .any(|name| entry.file_name().to_string_lossy() == name.as_str())
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if e.depth() == 0 {
                    return Err(WatchError::RootUnavailable(root.to_path_buf()));
                }
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                if e.io_error().map(|io| io.kind()) == Some(std::io::ErrorKind::NotFound) {
                    // Removed between readdir and stat.
                    debug!("Entry vanished during scan: {}", path.display());
                    continue;
                }
                errors.push(WatchError::Inaccessible { path, source: e });
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }
        match entry.metadata() {
            Ok(meta) => {
                let modified = meta.modified().unwrap_or(std::time::UNIX_EPOCH);
                snapshot.insert(
                    entry.into_path(),
                    FileStamp {
                        modified,
                        len: meta.len(),
                    },
                );
            }
            Err(e) => {
                debug!("Skipping {}: {}", entry.path().display(), e);
            }
        }
    }

    Ok((snapshot, errors))
}

/// Watches the served root and bumps the reload signal when anything changes.
///
/// Every trigger (interval tick or OS event nudge) runs one full scan and
/// diff, so any number of file changes between two triggers produces at most
/// one version increment.
pub struct ChangeNotifier {
    root: PathBuf,
    ignore: Arc<[String]>,
    state: WatchState,
    signal: ReloadSignal,
}

impl ChangeNotifier {
    /// Performs the initial full scan of `config.root_directory`.
    pub fn new(config: &ServerConfig, signal: ReloadSignal) -> Result<Self, WatchError> {
        let root = config.root_directory.clone();
        let ignore: Arc<[String]> = config.ignore.clone().into();
        let (snapshot, errors) = scan_tree(&root, &ignore)?;
        log_scan_errors(&errors);
        info!(
            "Initial scan of {} tracked {} files",
            root.display(),
            snapshot.len()
        );
        Ok(Self {
            root,
            ignore,
            state: WatchState::from_snapshot(snapshot),
            signal,
        })
    }

    pub fn state(&self) -> &WatchState {
        &self.state
    }

    /// Runs one blocking scan-and-diff cycle. Returns the new version if
    /// something changed.
    pub fn poll_once(&mut self) -> Option<u64> {
        let result = scan_tree(&self.root, &self.ignore);
        self.apply_scan(result)
    }

    /// Reconciles one scan result into the state and publishes at most one
    /// bump. A failed scan leaves the state untouched.
    pub fn apply_scan(&mut self, result: Result<ScanOutcome, WatchError>) -> Option<u64> {
        match result {
            Ok((snapshot, errors)) => {
                log_scan_errors(&errors);
                let summary = self.state.reconcile(snapshot);
                self.publish(summary)
            }
            Err(e) => {
                warn!("Skipping watch cycle: {}", e);
                None
            }
        }
    }

    fn publish(&self, summary: ChangeSummary) -> Option<u64> {
        if !summary.is_changed() {
            return None;
        }
        let version = self.signal.bump();
        info!(
            "Change detected (added: {}, removed: {}, modified: {}), reload version {}",
            summary.added, summary.removed, summary.modified, version
        );
        Some(version)
    }

    /// Runs the notifier until `shutdown_signal` flips to `true`.
    ///
    /// Scans run on the blocking pool so request handling never waits on them.
    /// `nudges` (from [`spawn_event_watcher`]) trigger an early scan.
    pub async fn run(
        mut self,
        interval: Duration,
        mut nudges: Option<mpsc::Receiver<()>>,
        shutdown_signal: WatchReceiver<bool>,
    ) -> Result<()> {
        let mut shutdown = shutdown_signal.clone();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; the initial scan already ran.
        ticker.tick().await;

        info!(
            "Change notifier started for {} (interval {:?})",
            self.root.display(),
            interval
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                Some(()) = next_nudge(&mut nudges) => {
                    debug!("Filesystem event received, rescanning early");
                    ticker.reset();
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        info!("Change notifier shutting down.");
                        break;
                    }
                    continue;
                }
            }

            let root = self.root.clone();
            let ignore = Arc::clone(&self.ignore);
            match tokio::task::spawn_blocking(move || scan_tree(&root, &ignore)).await {
                Ok(result) => {
                    self.apply_scan(result);
                }
                Err(e) => error!("Scan task failed: {}", e),
            }
        }
        Ok(())
    }
}

async fn next_nudge(nudges: &mut Option<mpsc::Receiver<()>>) -> Option<()> {
    match nudges {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn log_scan_errors(errors: &[WatchError]) {
    for e in errors {
        warn!("{}", e);
    }
}

/// Starts the change notifier for `config` as a background task.
///
/// In [`WatchMode::Events`] an OS watcher thread is started as well; if it
/// cannot be set up, the notifier falls back to polling.
pub fn spawn_notifier(
    config: &ServerConfig,
    signal: ReloadSignal,
    shutdown_signal: WatchReceiver<bool>,
) -> Result<tokio::task::JoinHandle<()>, WatchError> {
    let notifier = ChangeNotifier::new(config, signal)?;

    let nudges = match config.watch_mode {
        WatchMode::Poll => None,
        WatchMode::Events => {
            let debounce = EVENT_DEBOUNCE.min(config.poll_interval);
            match spawn_event_watcher(&config.root_directory, debounce) {
                Ok(rx) => Some(rx),
                Err(e) => {
                    warn!("{}; falling back to polling", e);
                    None
                }
            }
        }
    };

    let interval = config.poll_interval;
    Ok(tokio::spawn(async move {
        if let Err(e) = notifier.run(interval, nudges, shutdown_signal).await {
            error!("Change notifier exited with error: {}", e);
        }
    }))
}

/// Runs a debounced OS filesystem watcher on its own thread.
///
/// Each debounced batch sends one nudge; the receiver side decides what
/// changed by rescanning. The thread exits when the receiver is dropped.
pub fn spawn_event_watcher(
    root: &Path,
    debounce: Duration,
) -> Result<mpsc::Receiver<()>, WatchError> {
    let (nudge_tx, nudge_rx) = mpsc::channel::<()>(1);
    let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), notify::Error>>(1);
    let root = root.to_path_buf();

    std::thread::spawn(move || {
        let (debouncer_tx, debouncer_rx) = std::sync::mpsc::channel::<DebounceEventResult>();

        // The debouncer lives as long as this thread.
        let mut debouncer = match new_debouncer(debounce, None, debouncer_tx) {
            Ok(d) => d,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return;
            }
        };
        if let Err(e) = debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)
        {
            let _ = ready_tx.send(Err(e));
            return;
        }
        debouncer
            .cache()
            .add_root(&root, notify::RecursiveMode::Recursive);
        info!("[WatcherThread] Watching folder: {}", root.display());
        let _ = ready_tx.send(Ok(()));

        while let Ok(result) = debouncer_rx.recv() {
            match result {
                Ok(events) if events.is_empty() => {}
                Ok(events) => {
                    debug!("[WatcherThread] {} debounced events", events.len());
                    match nudge_tx.try_send(()) {
                        Ok(()) | Err(mpsc::error::TrySendError::Full(())) => {}
                        Err(mpsc::error::TrySendError::Closed(())) => break,
                    }
                }
                Err(errors) => {
                    for error in errors {
                        warn!("[WatcherThread] Debouncer reported error: {:?}", error);
                    }
                }
            }
        }
        info!("[WatcherThread] Exiting.");
    });

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(nudge_rx),
        Ok(Err(e)) => Err(WatchError::Subscribe(e)),
        Err(_) => Err(WatchError::Subscribe(notify::Error::generic(
            "watcher thread exited during setup",
        ))),
    }
}
