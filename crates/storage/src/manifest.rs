//! Declarative manifest cache.
//!
//! Structurally different from the CRUD adapters: instead of record-level
//! operations it wraps the lifecycle of a whole-of-page cache manifest,
//! driven by events the host environment feeds in rather than by caller
//! calls. The lifecycle resolves to "loaded" on a terminal event, after a
//! fixed ceiling (a slow or broken connection must not block page
//! rendering), or after a confirmation prompt decides whether to hard
//! reload on an available update.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::instrument;

/// Give-up ceiling: past this point the page is considered loaded enough.
pub const LOAD_CEILING: std::time::Duration = std::time::Duration::from_secs(12);

/// Fallback progress estimation when the event stream carries no byte
/// totals: assume a manifest of roughly this many files.
const ASSUMED_FILE_COUNT: u64 = 20;

/// Lifecycle states, in the order the backend walks them:
/// `Uncached → Checking → Downloading → (Cached | UpdateReady | Obsolete) → Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestStatus {
    Uncached,
    Idle,
    Checking,
    Downloading,
    UpdateReady,
    Cached,
    Obsolete,
}

/// Events fed in by the host environment.
#[derive(Debug, Clone)]
pub enum ManifestEvent {
    Checking,
    Downloading,
    /// One unit of download progress. Byte counts are optional; without
    /// them progress falls back to a per-file counter.
    Progress { bytes_loaded: Option<u64>, bytes_total: Option<u64> },
    /// First-time download complete.
    Cached,
    /// Manifest unchanged; the current cache is current.
    NoUpdate,
    /// A new manifest version finished downloading.
    UpdateReady,
    /// The manifest disappeared from the server.
    Obsolete,
    Error(String),
}

/// How the lifecycle resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestOutcome {
    /// Terminal event (or the ceiling): the page can proceed.
    Loaded(ManifestStatus),
    /// An update was available and the prompt asked for a hard reload.
    ReloadRequested,
}

/// Decides whether an available update should hard-reload the page.
pub trait UpdatePrompt: Send + Sync {
    fn should_reload(&self) -> bool;
}

/// Live view onto a running lifecycle: 0–100 progress and current state.
#[derive(Debug, Clone)]
pub struct ManifestHandle {
    progress: watch::Receiver<u8>,
    status: watch::Receiver<ManifestStatus>,
}

impl ManifestHandle {
    pub fn progress(&self) -> u8 {
        *self.progress.borrow()
    }

    pub fn status(&self) -> ManifestStatus {
        *self.status.borrow()
    }
}

pub struct ManifestCache {
    events: mpsc::Receiver<ManifestEvent>,
    prompt: Arc<dyn UpdatePrompt>,
    progress_tx: watch::Sender<u8>,
    status_tx: watch::Sender<ManifestStatus>,
    files_seen: u64,
}

impl ManifestCache {
    pub fn new(events: mpsc::Receiver<ManifestEvent>, prompt: Arc<dyn UpdatePrompt>) -> (Self, ManifestHandle) {
        let (progress_tx, progress_rx) = watch::channel(0);
        let (status_tx, status_rx) = watch::channel(ManifestStatus::Uncached);
        let cache = Self { events, prompt, progress_tx, status_tx, files_seen: 0 };
        (cache, ManifestHandle { progress: progress_rx, status: status_rx })
    }

    /// Drive the lifecycle to its resolution. Intended to be spawned; the
    /// [`ManifestHandle`] keeps reporting while this runs.
    #[instrument(skip_all, name = "manifest lifecycle")]
    pub async fn run(mut self) -> ManifestOutcome {
        let deadline = tokio::time::sleep(LOAD_CEILING);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                () = &mut deadline => {
                    tracing::warn!("manifest did not settle before the ceiling, treating as loaded");
                    return ManifestOutcome::Loaded(self.status());
                },
                event = self.events.recv() => match event {
                    None => return ManifestOutcome::Loaded(self.status()),
                    Some(event) => {
                        if let Some(outcome) = self.apply(event) {
                            return outcome;
                        }
                    },
                },
            }
        }
    }

    fn status(&self) -> ManifestStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&self, status: ManifestStatus) {
        let _ = self.status_tx.send(status);
    }

    fn apply(&mut self, event: ManifestEvent) -> Option<ManifestOutcome> {
        tracing::debug!(?event, "manifest event");
        match event {
            ManifestEvent::Checking => {
                self.set_status(ManifestStatus::Checking);
                None
            },
            ManifestEvent::Downloading => {
                self.set_status(ManifestStatus::Downloading);
                None
            },
            ManifestEvent::Progress { bytes_loaded, bytes_total } => {
                self.report_progress(bytes_loaded, bytes_total);
                None
            },
            ManifestEvent::Cached => {
                let _ = self.progress_tx.send(100);
                self.set_status(ManifestStatus::Cached);
                Some(ManifestOutcome::Loaded(ManifestStatus::Cached))
            },
            ManifestEvent::NoUpdate => {
                let _ = self.progress_tx.send(100);
                self.set_status(ManifestStatus::Idle);
                Some(ManifestOutcome::Loaded(ManifestStatus::Idle))
            },
            ManifestEvent::UpdateReady => {
                let _ = self.progress_tx.send(100);
                self.set_status(ManifestStatus::UpdateReady);
                match self.prompt.should_reload() {
                    true => Some(ManifestOutcome::ReloadRequested),
                    false => Some(ManifestOutcome::Loaded(ManifestStatus::UpdateReady)),
                }
            },
            ManifestEvent::Obsolete => {
                self.set_status(ManifestStatus::Obsolete);
                Some(ManifestOutcome::Loaded(ManifestStatus::Obsolete))
            },
            ManifestEvent::Error(message) => {
                tracing::warn!(%message, "manifest errored, treating as loaded");
                self.set_status(ManifestStatus::Idle);
                Some(ManifestOutcome::Loaded(ManifestStatus::Idle))
            },
        }
    }

    /// Byte-ratio when totals are known, per-file counter otherwise.
    /// Progress never moves backwards.
    fn report_progress(&mut self, bytes_loaded: Option<u64>, bytes_total: Option<u64>) {
        let percent = match (bytes_loaded, bytes_total) {
            (Some(loaded), Some(total)) if total > 0 => ((loaded * 100) / total).min(100) as u8,
            _ => {
                self.files_seen += 1;
                ((self.files_seen * 100) / ASSUMED_FILE_COUNT).min(100) as u8
            },
        };
        if percent > *self.progress_tx.borrow() {
            let _ = self.progress_tx.send(percent);
        }
    }
}
