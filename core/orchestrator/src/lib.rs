//! facekit-core: session orchestration for face enrollment,
//! verification and liveness detection.
//!
//! The orchestrator arbitrates three concurrent event sources per
//! session (engine callbacks, caller cancellation, a deadline timer)
//! into exactly one terminal outcome. A pure state machine
//! ([`machine`]) decides transitions; a single-writer worker
//! ([`session`]) executes them; [`bridge::HostBridge`] is the
//! host-facing surface that validates requests and wires sessions up.

pub mod bridge;
pub mod capabilities;
pub mod capture;
pub mod config;
pub mod error;
pub mod machine;
pub mod session;
pub mod timer;

pub use bridge::{EnrollReply, HostBridge, LivenessReply, VerifyReply};
pub use capabilities::{
    BrightnessOverride, Engine, EngineControl, EngineRequest, EngineSink, MemoryTemplateStore,
    NoSnapshot, NullBrightness, SnapshotSource, TemplateStore,
};
pub use config::{load_config, SdkConfig};
pub use error::{Error, Result};
pub use machine::{Outcome, SessionConfig, SessionMode};
pub use session::SessionHandle;
