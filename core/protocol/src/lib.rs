//! Result-code taxonomy and session event contract for facekit.
//!
//! This crate is shared by the orchestrator and host adapters to prevent
//! schema drift. The orchestrator remains the authority on session
//! semantics, but hosts reuse the same types to construct valid requests
//! and to interpret terminal outcomes.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Encoded length of a face feature template accepted by the engine.
pub const FEATURE_LEN: usize = 1024;

/// Extra seconds granted on top of the caller timeout when the color
/// flash sequence runs (the flash itself consumes wall-clock time the
/// caller did not budget for).
pub const COLOR_FLASH_GRACE_SECS: u64 = 4;

/// Engine-accepted motion liveness timeout range, in seconds.
pub const TIMEOUT_MIN_SECS: u64 = 3;
pub const TIMEOUT_MAX_SECS: u64 = 22;

/// Engine-accepted motion step count range.
pub const MOTION_STEPS_MIN: u32 = 1;
pub const MOTION_STEPS_MAX: u32 = 2;

/// Engine-accepted similarity threshold range.
pub const THRESHOLD_MIN: f32 = 0.75;
pub const THRESHOLD_MAX: f32 = 0.95;

/// Terminal result codes reported by the engine or synthesized by the
/// orchestrator. The numeric values are the cross-boundary contract and
/// must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    UserCancelled,
    Verified,
    MotionSequenceDone,
    MotionTimeout,
    NoFaceRepeatedly,
    NoFaceFeature,
    ColorLivenessPassed,
    ColorLivenessFailed,
    LightTooHigh,
    LivenessAndMatchPassed,
}

impl ResultCode {
    pub fn code(&self) -> i32 {
        match self {
            ResultCode::UserCancelled => 0,
            ResultCode::Verified => 1,
            ResultCode::MotionSequenceDone => 3,
            ResultCode::MotionTimeout => 4,
            ResultCode::NoFaceRepeatedly => 5,
            ResultCode::NoFaceFeature => 6,
            ResultCode::ColorLivenessPassed => 7,
            ResultCode::ColorLivenessFailed => 8,
            ResultCode::LightTooHigh => 9,
            ResultCode::LivenessAndMatchPassed => 10,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(ResultCode::UserCancelled),
            1 => Some(ResultCode::Verified),
            3 => Some(ResultCode::MotionSequenceDone),
            4 => Some(ResultCode::MotionTimeout),
            5 => Some(ResultCode::NoFaceRepeatedly),
            6 => Some(ResultCode::NoFaceFeature),
            7 => Some(ResultCode::ColorLivenessPassed),
            8 => Some(ResultCode::ColorLivenessFailed),
            9 => Some(ResultCode::LightTooHigh),
            10 => Some(ResultCode::LivenessAndMatchPassed),
            _ => None,
        }
    }
}

/// Caller-facing outcome shape. Every result code maps to exactly one
/// bucket; unknown codes map to `Failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    Cancelled,
    Success,
    Timeout,
    Failure,
}

/// Total classification of a raw result code into its outcome bucket.
pub fn classify(code: i32) -> Bucket {
    match ResultCode::from_code(code) {
        Some(ResultCode::UserCancelled) => Bucket::Cancelled,
        Some(ResultCode::Verified)
        | Some(ResultCode::MotionSequenceDone)
        | Some(ResultCode::ColorLivenessPassed)
        | Some(ResultCode::LivenessAndMatchPassed) => Bucket::Success,
        Some(ResultCode::MotionTimeout) => Bucket::Timeout,
        Some(ResultCode::NoFaceRepeatedly)
        | Some(ResultCode::NoFaceFeature)
        | Some(ResultCode::ColorLivenessFailed)
        | Some(ResultCode::LightTooHigh) => Bucket::Failure,
        None => Bucket::Failure,
    }
}

/// Human-readable reason attached to Failure outcomes.
pub fn failure_reason(code: i32) -> &'static str {
    match ResultCode::from_code(code) {
        Some(ResultCode::NoFaceRepeatedly) => "no face detected after repeated attempts",
        Some(ResultCode::NoFaceFeature) => "no usable face feature template",
        Some(ResultCode::ColorLivenessFailed) => "color liveness check failed",
        Some(ResultCode::LightTooHigh) => "ambient light exceeds sensor tolerance",
        _ => "unrecognized engine result code",
    }
}

/// Liveness detection mode. Numeric mapping matches the engine contract:
/// 0 none, 1 motion, 2 motion+color, 3 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LivenessMode {
    None,
    #[default]
    Motion,
    ColorMotion,
    Color,
}

impl LivenessMode {
    pub fn from_raw(value: i32) -> Option<Self> {
        match value {
            0 => Some(LivenessMode::None),
            1 => Some(LivenessMode::Motion),
            2 => Some(LivenessMode::ColorMotion),
            3 => Some(LivenessMode::Color),
            _ => None,
        }
    }

    pub fn uses_color(&self) -> bool {
        matches!(self, LivenessMode::Color | LivenessMode::ColorMotion)
    }

    pub fn uses_motion(&self) -> bool {
        matches!(self, LivenessMode::Motion | LivenessMode::ColorMotion)
    }

    /// Effective deadline for a caller-supplied timeout: color modes get
    /// a fixed grace to absorb the flash sequence.
    pub fn adjusted_timeout_secs(&self, timeout_secs: u64) -> u64 {
        if self.uses_color() {
            timeout_secs + COLOR_FLASH_GRACE_SECS
        } else {
            timeout_secs
        }
    }
}

/// Motion liveness actions the engine can request from the user.
/// Numeric mapping matches the engine contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAction {
    OpenMouth,
    Smile,
    Blink,
    ShakeHead,
    NodHead,
}

impl MotionAction {
    pub const ALL: [MotionAction; 5] = [
        MotionAction::OpenMouth,
        MotionAction::Smile,
        MotionAction::Blink,
        MotionAction::ShakeHead,
        MotionAction::NodHead,
    ];

    pub fn raw(&self) -> u8 {
        match self {
            MotionAction::OpenMouth => 1,
            MotionAction::Smile => 2,
            MotionAction::Blink => 3,
            MotionAction::ShakeHead => 4,
            MotionAction::NodHead => 5,
        }
    }

    pub fn from_raw(value: u8) -> Option<Self> {
        match value {
            1 => Some(MotionAction::OpenMouth),
            2 => Some(MotionAction::Smile),
            3 => Some(MotionAction::Blink),
            4 => Some(MotionAction::ShakeHead),
            5 => Some(MotionAction::NodHead),
            _ => None,
        }
    }
}

/// Uniform envelope for engine callbacks. Engine adapter threads build
/// these and push them into the session event queue; they never touch
/// session state directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// Transient guidance (face too small, move closer, ...). Never
    /// terminal; the session stays live.
    Tip { code: i32 },
    /// Color flash frame for the host to render.
    ColorFlash { color: i32 },
    /// Motion liveness countdown progress, 0.0..=1.0.
    Countdown { percent: f32 },
    /// Final engine verdict for this run.
    Final {
        code: i32,
        #[serde(default)]
        similarity: Option<f32>,
        #[serde(default)]
        artifact: Option<PathBuf>,
    },
}

impl EngineEvent {
    pub fn is_final(&self) -> bool {
        matches!(self, EngineEvent::Final { .. })
    }
}

/// Structured error value for boundary validation failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Parameters for a face enrollment session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollParams {
    pub template_id: String,
    #[serde(default)]
    pub format: String,
}

impl EnrollParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.template_id.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_template_id", "template_id is required"));
        }
        Ok(())
    }
}

/// Parameters for a 1:1 face verification session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyParams {
    /// Candidate feature templates. The engine accepts only the first
    /// entry; extra candidates are a documented interface limitation and
    /// are reported, not silently dropped.
    pub candidates: Vec<String>,
    pub liveness: LivenessMode,
    pub motion_steps: u32,
    pub timeout_secs: u64,
    pub threshold: f32,
}

impl VerifyParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.candidates.is_empty() {
            return Err(ErrorInfo::new(
                "empty_candidates",
                "at least one feature template is required",
            ));
        }
        validate_feature(&self.candidates[0])?;
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold >= 1.0 {
            return Err(ErrorInfo::new(
                "invalid_threshold",
                format!("threshold must be in (0, 1), got {}", self.threshold),
            ));
        }
        validate_timing(self.liveness, self.motion_steps, self.timeout_secs)
    }
}

/// Parameters for a liveness-only session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessParams {
    pub liveness: LivenessMode,
    pub motion_steps: u32,
    pub timeout_secs: u64,
}

impl LivenessParams {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.liveness == LivenessMode::None {
            return Err(ErrorInfo::new(
                "invalid_liveness_mode",
                "liveness-only session requires a liveness mode",
            ));
        }
        validate_timing(self.liveness, self.motion_steps, self.timeout_secs)
    }
}

/// Checks the fixed encoded length the engine requires. Malformed
/// templates short-circuit before any session exists.
pub fn validate_feature(feature: &str) -> Result<(), ErrorInfo> {
    if feature.len() != FEATURE_LEN {
        return Err(ErrorInfo::new(
            "invalid_feature_length",
            format!(
                "feature template must be {} characters, got {}",
                FEATURE_LEN,
                feature.len()
            ),
        ));
    }
    Ok(())
}

fn validate_timing(liveness: LivenessMode, motion_steps: u32, timeout_secs: u64) -> Result<(), ErrorInfo> {
    if timeout_secs == 0 {
        return Err(ErrorInfo::new("invalid_timeout", "timeout_secs must be nonzero"));
    }
    if liveness.uses_motion() && motion_steps == 0 {
        return Err(ErrorInfo::new(
            "invalid_motion_steps",
            "motion liveness requires at least one motion step",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feature() -> String {
        "f".repeat(FEATURE_LEN)
    }

    fn verify_params() -> VerifyParams {
        VerifyParams {
            candidates: vec![feature()],
            liveness: LivenessMode::Motion,
            motion_steps: 2,
            timeout_secs: 9,
            threshold: 0.85,
        }
    }

    #[test]
    fn classify_covers_every_defined_code() {
        assert_eq!(classify(0), Bucket::Cancelled);
        assert_eq!(classify(1), Bucket::Success);
        assert_eq!(classify(3), Bucket::Success);
        assert_eq!(classify(4), Bucket::Timeout);
        assert_eq!(classify(5), Bucket::Failure);
        assert_eq!(classify(6), Bucket::Failure);
        assert_eq!(classify(7), Bucket::Success);
        assert_eq!(classify(8), Bucket::Failure);
        assert_eq!(classify(9), Bucket::Failure);
        assert_eq!(classify(10), Bucket::Success);
    }

    #[test]
    fn classify_unknown_codes_fail_closed() {
        assert_eq!(classify(2), Bucket::Failure);
        assert_eq!(classify(-1), Bucket::Failure);
        assert_eq!(classify(999), Bucket::Failure);
    }

    #[test]
    fn result_code_round_trips() {
        for code in [0, 1, 3, 4, 5, 6, 7, 8, 9, 10] {
            let parsed = ResultCode::from_code(code).expect("defined code");
            assert_eq!(parsed.code(), code);
        }
        assert!(ResultCode::from_code(2).is_none());
    }

    #[test]
    fn color_modes_extend_deadline() {
        assert_eq!(LivenessMode::Color.adjusted_timeout_secs(9), 13);
        assert_eq!(LivenessMode::ColorMotion.adjusted_timeout_secs(9), 13);
        assert_eq!(LivenessMode::Motion.adjusted_timeout_secs(9), 9);
        assert_eq!(LivenessMode::None.adjusted_timeout_secs(9), 9);
    }

    #[test]
    fn verify_rejects_empty_candidates() {
        let mut params = verify_params();
        params.candidates.clear();
        let err = params.validate().unwrap_err();
        assert_eq!(err.code, "empty_candidates");
    }

    #[test]
    fn verify_rejects_short_feature() {
        let mut params = verify_params();
        params.candidates = vec!["too-short".to_string()];
        let err = params.validate().unwrap_err();
        assert_eq!(err.code, "invalid_feature_length");
    }

    #[test]
    fn verify_rejects_out_of_range_threshold() {
        let mut params = verify_params();
        params.threshold = 1.5;
        assert_eq!(params.validate().unwrap_err().code, "invalid_threshold");
        params.threshold = f32::NAN;
        assert_eq!(params.validate().unwrap_err().code, "invalid_threshold");
    }

    #[test]
    fn verify_rejects_zero_timeout() {
        let mut params = verify_params();
        params.timeout_secs = 0;
        assert_eq!(params.validate().unwrap_err().code, "invalid_timeout");
    }

    #[test]
    fn liveness_rejects_none_mode() {
        let params = LivenessParams {
            liveness: LivenessMode::None,
            motion_steps: 2,
            timeout_secs: 9,
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_liveness_mode");
    }

    #[test]
    fn liveness_requires_motion_steps_for_motion_modes() {
        let params = LivenessParams {
            liveness: LivenessMode::ColorMotion,
            motion_steps: 0,
            timeout_secs: 9,
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_motion_steps");

        let color_only = LivenessParams {
            liveness: LivenessMode::Color,
            motion_steps: 0,
            timeout_secs: 9,
        };
        assert!(color_only.validate().is_ok());
    }

    #[test]
    fn enroll_rejects_blank_template_id() {
        let params = EnrollParams {
            template_id: "  ".to_string(),
            format: String::new(),
        };
        assert_eq!(params.validate().unwrap_err().code, "invalid_template_id");
    }

    #[test]
    fn engine_event_serde_shape() {
        let event = EngineEvent::Final {
            code: 1,
            similarity: Some(0.91),
            artifact: None,
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["type"], "final");
        assert_eq!(value["code"], 1);
        let parsed: EngineEvent = serde_json::from_value(value).expect("deserialize");
        assert!(parsed.is_final());
    }
}
