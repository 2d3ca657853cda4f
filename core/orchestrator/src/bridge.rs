//! Host-facing entry points.
//!
//! `HostBridge` owns the long-lived collaborators (engine, template
//! store, brightness, snapshot source, SDK defaults) and turns each
//! start call into an isolated session: validate first, then acquire
//! brightness, engine and timer in that order, rolling back on failure
//! so a rejected request never leaks a running resource.
//!
//! Replies translate terminal outcomes into the wire values hosts
//! expect ("Verify", "Not Verify", "Timeout", null); the raw `Outcome`
//! stays internal.

use std::sync::mpsc;
use std::sync::Arc;

use rand::seq::SliceRandom;
use serde_json::{json, Value};
use tracing::{info, warn};
use ulid::Ulid;

use facekit_protocol::{
    Bucket, EnrollParams, LivenessMode, LivenessParams, MotionAction, VerifyParams,
    MOTION_STEPS_MAX, MOTION_STEPS_MIN, THRESHOLD_MAX, THRESHOLD_MIN, TIMEOUT_MAX_SECS,
    TIMEOUT_MIN_SECS,
};

use crate::capabilities::{
    BrightnessOverride, Engine, EngineRequest, EngineSink, NoSnapshot, NullBrightness,
    SnapshotSource, TemplateStore,
};
use crate::capture::CaptureGate;
use crate::config::SdkConfig;
use crate::error::{Error, Result};
use crate::machine::{Outcome, SessionConfig, SessionEvent, SessionMode};
use crate::session::{spawn_session, SessionHandle, SessionResources};
use crate::timer::DeadlineTimer;

pub struct HostBridge {
    engine: Arc<dyn Engine>,
    store: Arc<dyn TemplateStore>,
    brightness: Arc<dyn BrightnessOverride>,
    snapshots: Arc<dyn SnapshotSource>,
    config: SdkConfig,
}

impl HostBridge {
    pub fn new(engine: Arc<dyn Engine>, store: Arc<dyn TemplateStore>) -> Self {
        Self {
            engine,
            store,
            brightness: Arc::new(NullBrightness),
            snapshots: Arc::new(NoSnapshot),
            config: SdkConfig::default(),
        }
    }

    pub fn with_brightness(mut self, brightness: Arc<dyn BrightnessOverride>) -> Self {
        self.brightness = brightness;
        self
    }

    pub fn with_snapshots(mut self, snapshots: Arc<dyn SnapshotSource>) -> Self {
        self.snapshots = snapshots;
        self
    }

    pub fn with_config(mut self, config: SdkConfig) -> Self {
        self.config = config;
        self
    }

    /// Starts an enrollment session. Session parameters come from the
    /// SDK defaults; the engine persists the captured template under
    /// `template_id` and the reply carries it back after a read-back
    /// check against the store.
    pub fn start_enroll(
        &self,
        params: EnrollParams,
        sink: impl FnOnce(EnrollReply) + Send + 'static,
    ) -> Result<SessionHandle> {
        params.validate()?;

        let config = SessionConfig {
            mode: SessionMode::Enroll,
            liveness: self.config.liveness,
            motion_steps: self.config.motion_steps,
            threshold: None,
            timeout_secs: self.config.timeout_secs,
        };
        let request = EngineRequest {
            mode: SessionMode::Enroll,
            feature: None,
            template_id: Some(params.template_id.clone()),
            threshold: self.config.threshold,
            liveness: config.liveness,
            motion_actions: self.select_motion_actions(config.motion_steps),
            timeout_secs: config.timeout_secs,
        };

        let store = Arc::clone(&self.store);
        let template_id = params.template_id;
        self.start_session(config, request, move |outcome| {
            sink(EnrollReply::from_outcome(outcome, &*store, &template_id))
        })
    }

    /// Starts a 1:1 verification session against the first candidate
    /// template.
    pub fn start_verify(
        &self,
        params: VerifyParams,
        sink: impl FnOnce(VerifyReply) + Send + 'static,
    ) -> Result<SessionHandle> {
        params.validate()?;
        if params.candidates.len() > 1 {
            // Engine limitation: single-template matching only.
            warn!(
                ignored = params.candidates.len() - 1,
                "Engine matches a single candidate; extra candidates ignored"
            );
        }

        let threshold = clamp_threshold(params.threshold);
        let config = SessionConfig {
            mode: SessionMode::Verify,
            liveness: params.liveness,
            motion_steps: clamp_motion_steps(params.liveness, params.motion_steps),
            threshold: Some(threshold),
            timeout_secs: clamp_timeout(params.timeout_secs),
        };
        let request = EngineRequest {
            mode: SessionMode::Verify,
            feature: Some(params.candidates[0].clone()),
            template_id: None,
            threshold,
            liveness: config.liveness,
            motion_actions: self.select_motion_actions(config.motion_steps),
            timeout_secs: config.timeout_secs,
        };

        self.start_session(config, request, move |outcome| {
            sink(VerifyReply::from_outcome(outcome))
        })
    }

    /// Starts a liveness-only session; no template is involved.
    pub fn start_liveness(
        &self,
        params: LivenessParams,
        sink: impl FnOnce(LivenessReply) + Send + 'static,
    ) -> Result<SessionHandle> {
        params.validate()?;

        let config = SessionConfig {
            mode: SessionMode::LivenessOnly,
            liveness: params.liveness,
            motion_steps: clamp_motion_steps(params.liveness, params.motion_steps),
            threshold: None,
            timeout_secs: clamp_timeout(params.timeout_secs),
        };
        let request = EngineRequest {
            mode: SessionMode::LivenessOnly,
            feature: None,
            template_id: None,
            threshold: self.config.threshold,
            liveness: config.liveness,
            motion_actions: self.select_motion_actions(config.motion_steps),
            timeout_secs: config.timeout_secs,
        };

        self.start_session(config, request, move |outcome| {
            sink(LivenessReply::from_outcome(outcome))
        })
    }

    /// Draws the motion prompts for one session from the configured
    /// pool, in random order without repeats.
    fn select_motion_actions(&self, motion_steps: u32) -> Vec<MotionAction> {
        let pool = self.config.motion_pool();
        let count = (motion_steps as usize).min(pool.len());
        pool.choose_multiple(&mut rand::thread_rng(), count)
            .copied()
            .collect()
    }

    /// Acquisition order is brightness, engine, timer. The timer goes
    /// last so no deadline can exist for a session that failed to start;
    /// an engine failure rolls brightness back.
    fn start_session(
        &self,
        config: SessionConfig,
        request: EngineRequest,
        sink: impl FnOnce(Outcome) + Send + 'static,
    ) -> Result<SessionHandle> {
        let id = Ulid::new();
        let (events_tx, events_rx) = mpsc::channel();
        // Queued before the engine gets the sink, so Start is applied
        // ahead of any engine callback.
        let _ = events_tx.send(SessionEvent::Start);

        let brightness: Arc<dyn BrightnessOverride> = if config.liveness.uses_color() {
            self.brightness.acquire();
            Arc::clone(&self.brightness)
        } else {
            Arc::new(NullBrightness)
        };

        let control = match self
            .engine
            .start(request, EngineSink::new(events_tx.clone()))
        {
            Ok(control) => control,
            Err(err) => {
                brightness.release();
                warn!(session_id = %id, error = %err, "Engine failed to start");
                return Err(Error::EngineUnavailable(err.to_string()));
            }
        };

        let timer = DeadlineTimer::arm(config.effective_timeout(), events_tx.clone());
        info!(
            session_id = %id,
            mode = ?config.mode,
            timeout_secs = config.effective_timeout().as_secs(),
            "Session resources acquired"
        );

        let resources = SessionResources {
            control,
            timer,
            brightness,
            capture: CaptureGate::new(Arc::clone(&self.snapshots)),
        };
        Ok(spawn_session(
            id,
            config,
            resources,
            events_tx,
            events_rx,
            Box::new(sink),
        ))
    }
}

fn clamp_threshold(threshold: f32) -> f32 {
    if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&threshold) {
        warn!(threshold, "Threshold outside engine range; clamping");
        threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX)
    } else {
        threshold
    }
}

fn clamp_timeout(timeout_secs: u64) -> u64 {
    if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&timeout_secs) {
        warn!(timeout_secs, "Timeout outside engine range; clamping");
        timeout_secs.clamp(TIMEOUT_MIN_SECS, TIMEOUT_MAX_SECS)
    } else {
        timeout_secs
    }
}

fn clamp_motion_steps(liveness: LivenessMode, motion_steps: u32) -> u32 {
    if !liveness.uses_motion() {
        return motion_steps;
    }
    if !(MOTION_STEPS_MIN..=MOTION_STEPS_MAX).contains(&motion_steps) {
        warn!(motion_steps, "Motion steps outside engine range; clamping");
        motion_steps.clamp(MOTION_STEPS_MIN, MOTION_STEPS_MAX)
    } else {
        motion_steps
    }
}

/// Terminal reply for an enrollment session.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrollReply {
    Enrolled {
        template: String,
        artifact: Option<std::path::PathBuf>,
    },
    Timeout,
    Cancelled,
    Failed { code: i32, reason: String },
}

impl EnrollReply {
    fn from_outcome(outcome: Outcome, store: &dyn TemplateStore, template_id: &str) -> Self {
        match outcome.bucket {
            Bucket::Cancelled => EnrollReply::Cancelled,
            Bucket::Timeout => EnrollReply::Timeout,
            Bucket::Failure => EnrollReply::Failed {
                code: outcome.code,
                reason: outcome.reason.unwrap_or_default(),
            },
            Bucket::Success => match store.get(template_id) {
                Some(template) => EnrollReply::Enrolled {
                    template,
                    artifact: outcome.artifact,
                },
                // The engine reported success but nothing usable landed
                // in the store; surface it as a feature failure.
                None => {
                    warn!(template_id, "Enrolled template missing from store");
                    EnrollReply::Failed {
                        code: 6,
                        reason: "no usable face feature template".to_string(),
                    }
                }
            },
        }
    }

    /// Wire value hosts consume: the template string on success, the
    /// "Timeout" sentinel, null for cancellation, a status object for
    /// failures.
    pub fn wire_value(&self) -> Value {
        match self {
            EnrollReply::Enrolled { template, .. } => Value::String(template.clone()),
            EnrollReply::Timeout => Value::String("Timeout".to_string()),
            EnrollReply::Cancelled => Value::Null,
            EnrollReply::Failed { code, reason } => {
                json!({ "status": "failed", "code": code, "reason": reason })
            }
        }
    }
}

/// Terminal reply for a verification session.
#[derive(Debug, Clone, PartialEq)]
pub enum VerifyReply {
    Verified {
        similarity: Option<f32>,
        artifact: Option<std::path::PathBuf>,
    },
    NotVerified,
    Timeout,
    Cancelled,
    Failed { code: i32, reason: String },
}

impl VerifyReply {
    fn from_outcome(outcome: Outcome) -> Self {
        match outcome.bucket {
            Bucket::Cancelled => VerifyReply::Cancelled,
            Bucket::Timeout => VerifyReply::Timeout,
            Bucket::Success => VerifyReply::Verified {
                similarity: outcome.similarity,
                artifact: outcome.artifact,
            },
            Bucket::Failure => match outcome.reason.as_deref() {
                Some("Not Verify") => VerifyReply::NotVerified,
                _ => VerifyReply::Failed {
                    code: outcome.code,
                    reason: outcome.reason.unwrap_or_default(),
                },
            },
        }
    }

    /// Wire value hosts consume: the snapshot path (or "Verify") on
    /// success, "Not Verify" for a below-threshold match, "Timeout",
    /// null for cancellation, a status object for engine failures.
    pub fn wire_value(&self) -> Value {
        match self {
            VerifyReply::Verified { artifact, .. } => match artifact {
                Some(path) => Value::String(path.display().to_string()),
                None => Value::String("Verify".to_string()),
            },
            VerifyReply::NotVerified => Value::String("Not Verify".to_string()),
            VerifyReply::Timeout => Value::String("Timeout".to_string()),
            VerifyReply::Cancelled => Value::Null,
            VerifyReply::Failed { code, reason } => {
                json!({ "status": "failed", "code": code, "reason": reason })
            }
        }
    }
}

/// Terminal reply for a liveness-only session.
#[derive(Debug, Clone, PartialEq)]
pub enum LivenessReply {
    Passed { code: i32 },
    Timeout,
    Cancelled,
    Failed { code: i32, reason: String },
}

impl LivenessReply {
    fn from_outcome(outcome: Outcome) -> Self {
        match outcome.bucket {
            Bucket::Cancelled => LivenessReply::Cancelled,
            Bucket::Timeout => LivenessReply::Timeout,
            Bucket::Success => LivenessReply::Passed { code: outcome.code },
            Bucket::Failure => LivenessReply::Failed {
                code: outcome.code,
                reason: outcome.reason.unwrap_or_default(),
            },
        }
    }

    pub fn wire_value(&self) -> Value {
        match self {
            LivenessReply::Passed { code } => json!({ "status": "passed", "code": code }),
            LivenessReply::Timeout => Value::String("Timeout".to_string()),
            LivenessReply::Cancelled => Value::Null,
            LivenessReply::Failed { code, reason } => {
                json!({ "status": "failed", "code": code, "reason": reason })
            }
        }
    }
}
