//! One-shot capture gate for the confirmation snapshot.
//!
//! The underlying source may be polled opportunistically during a run,
//! but the artifact is consumed for the terminal outcome at most once.
//! A source that cannot produce a frame never fails the session; the
//! bridge falls back to a sentinel success value instead.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::capabilities::SnapshotSource;

pub struct CaptureGate {
    source: Arc<dyn SnapshotSource>,
    latest: Mutex<Option<PathBuf>>,
    claimed: Mutex<bool>,
}

impl CaptureGate {
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            source,
            latest: Mutex::new(None),
            claimed: Mutex::new(false),
        }
    }

    /// Opportunistic refresh. Keeps the most recent frame; a miss leaves
    /// the previous frame in place.
    pub fn try_capture(&self) -> Option<PathBuf> {
        let mut latest = self.latest.lock().expect("capture gate poisoned");
        if let Some(path) = self.source.take_snapshot() {
            *latest = Some(path);
        }
        latest.clone()
    }

    /// One-shot claim at the successful terminal transition. The first
    /// call returns the artifact (capturing now if none was cached);
    /// every later call returns `None`.
    pub fn claim(&self) -> Option<PathBuf> {
        let mut claimed = self.claimed.lock().expect("capture gate poisoned");
        if *claimed {
            return None;
        }
        *claimed = true;

        let mut latest = self.latest.lock().expect("capture gate poisoned");
        let artifact = latest.take().or_else(|| self.source.take_snapshot());
        if artifact.is_none() {
            warn!("No confirmation snapshot available at terminal transition");
        }
        artifact
    }
}
