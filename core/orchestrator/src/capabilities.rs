//! Injected capabilities owned per-session.
//!
//! Every external collaborator (engine, brightness, snapshots, template
//! storage) is an injected trait object rather than an ambient
//! singleton, so the orchestrator is testable without a camera or a
//! display and each session holds and releases its own resources.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::mpsc::Sender;
use std::sync::Mutex;

use tracing::warn;

use facekit_protocol::{validate_feature, EngineEvent, LivenessMode, MotionAction};

use crate::error::Result;
use crate::machine::{SessionEvent, SessionMode};

/// Parameters handed to the engine when a session run starts.
#[derive(Debug, Clone)]
pub struct EngineRequest {
    pub mode: SessionMode,
    /// Base feature template for verification; the template id for
    /// enrollment; absent for liveness-only.
    pub feature: Option<String>,
    pub template_id: Option<String>,
    pub threshold: f32,
    pub liveness: LivenessMode,
    pub motion_actions: Vec<MotionAction>,
    pub timeout_secs: u64,
}

/// Write-only handle the engine uses to report progress and verdicts.
/// Wraps the session event sender so engine adapters cannot inject
/// cancel or deadline events.
#[derive(Clone)]
pub struct EngineSink {
    sender: Sender<SessionEvent>,
}

impl EngineSink {
    pub(crate) fn new(sender: Sender<SessionEvent>) -> Self {
        Self { sender }
    }

    /// Pushes an engine callback into the session queue. Delivery after
    /// the session ended is harmless; the event is discarded there.
    pub fn push(&self, event: EngineEvent) {
        let _ = self.sender.send(SessionEvent::Engine(event));
    }
}

/// Live handle to a running engine detection round.
pub trait EngineControl: Send + Sync {
    /// Re-arms the current detection round after a recoverable verdict.
    fn retry(&self);
    /// Tears down the engine subscription. Idempotent; called exactly
    /// once per session by the orchestrator, possibly again by drops.
    fn stop(&self);
}

/// The opaque biometric engine. Implementations adapt the real SDK's
/// callback API; tests script one.
pub trait Engine: Send + Sync {
    fn start(&self, request: EngineRequest, sink: EngineSink) -> Result<Box<dyn EngineControl>>;
}

/// Screen brightness override for the color flash sequence. Owned by
/// the session from start to terminal delivery.
pub trait BrightnessOverride: Send + Sync {
    fn acquire(&self);
    fn release(&self);
}

/// Brightness override for hosts without a display (and for tests).
pub struct NullBrightness;

impl BrightnessOverride for NullBrightness {
    fn acquire(&self) {}
    fn release(&self) {}
}

/// Supplies the confirmation snapshot attached to success outcomes.
/// Returning `None` (camera not ready) never fails the session.
pub trait SnapshotSource: Send + Sync {
    fn take_snapshot(&self) -> Option<PathBuf>;
}

/// Snapshot source for hosts that do not persist capture frames.
pub struct NoSnapshot;

impl SnapshotSource for NoSnapshot {
    fn take_snapshot(&self) -> Option<PathBuf> {
        None
    }
}

/// Opaque template storage collaborator. The orchestrator never owns a
/// storage schema; it only reads and writes fixed-length encoded
/// feature strings under caller-chosen ids.
pub trait TemplateStore: Send + Sync {
    fn get(&self, id: &str) -> Option<String>;
    fn put(&self, id: &str, template: &str) -> bool;
    fn exists(&self, id: &str) -> bool;
}

/// In-memory template store for tests and hosts that bring their own
/// persistence elsewhere. Enforces the encoded length on both reads and
/// writes, matching the engine's own validation.
#[derive(Default)]
pub struct MemoryTemplateStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TemplateStore for MemoryTemplateStore {
    fn get(&self, id: &str) -> Option<String> {
        let entries = self.entries.lock().expect("template store poisoned");
        let template = entries.get(id)?.clone();
        if let Err(err) = validate_feature(&template) {
            warn!(id, error = %err.message, "Stored template failed length check");
            return None;
        }
        Some(template)
    }

    fn put(&self, id: &str, template: &str) -> bool {
        if let Err(err) = validate_feature(template) {
            warn!(id, error = %err.message, "Rejecting template write");
            return false;
        }
        let mut entries = self.entries.lock().expect("template store poisoned");
        entries.insert(id.to_string(), template.to_string());
        true
    }

    fn exists(&self, id: &str) -> bool {
        self.get(id).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facekit_protocol::FEATURE_LEN;

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryTemplateStore::new();
        let template = "a".repeat(FEATURE_LEN);
        assert!(store.put("user-1", &template));
        assert!(store.exists("user-1"));
        assert_eq!(store.get("user-1").as_deref(), Some(template.as_str()));
    }

    #[test]
    fn memory_store_rejects_bad_length_writes() {
        let store = MemoryTemplateStore::new();
        assert!(!store.put("user-1", "short"));
        assert!(!store.exists("user-1"));
    }

    #[test]
    fn memory_store_missing_id() {
        let store = MemoryTemplateStore::new();
        assert!(store.get("nobody").is_none());
        assert!(!store.exists("nobody"));
    }
}
