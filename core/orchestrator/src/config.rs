//! SDK-level defaults for session parameters.
//!
//! Hosts that do not supply a value per request fall back to these.
//! Loaded from an optional TOML file; missing file means defaults.
//! Out-of-range values are clamped to the engine-accepted ranges rather
//! than rejected, with a warning, so a stale config file cannot brick
//! the host.

use std::path::PathBuf;

use serde::Deserialize;
use tracing::warn;

use facekit_protocol::{
    LivenessMode, MotionAction, MOTION_STEPS_MAX, MOTION_STEPS_MIN, THRESHOLD_MAX, THRESHOLD_MIN,
    TIMEOUT_MAX_SECS, TIMEOUT_MIN_SECS,
};

use crate::error::Error;

const DEFAULT_CONFIG_RELATIVE_PATH: &str = ".facekit/config.toml";

const DEFAULT_THRESHOLD: f32 = 0.85;
const DEFAULT_MOTION_STEPS: u32 = 2;
const DEFAULT_TIMEOUT_SECS: u64 = 9;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SdkConfig {
    /// Similarity threshold for 1:1 verification.
    pub threshold: f32,
    /// Number of random motion actions requested per session.
    pub motion_steps: u32,
    /// Caller timeout before the color-flash grace is applied.
    pub timeout_secs: u64,
    /// Default liveness mode when a request leaves it unspecified.
    pub liveness: LivenessMode,
    /// Pool the random motion actions are drawn from, as raw engine
    /// action ids (1 open mouth, 2 smile, 3 blink, 4 shake, 5 nod).
    pub motion_action_pool: Vec<u8>,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            motion_steps: DEFAULT_MOTION_STEPS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            liveness: LivenessMode::ColorMotion,
            motion_action_pool: MotionAction::ALL.iter().map(|a| a.raw()).collect(),
        }
    }
}

impl SdkConfig {
    /// Motion action pool with unknown ids dropped. Falls back to the
    /// full pool when the configured one is empty or entirely invalid.
    pub fn motion_pool(&self) -> Vec<MotionAction> {
        let pool: Vec<MotionAction> = self
            .motion_action_pool
            .iter()
            .filter_map(|raw| {
                let action = MotionAction::from_raw(*raw);
                if action.is_none() {
                    warn!(raw, "Ignoring unknown motion action id in config");
                }
                action
            })
            .collect();
        if pool.is_empty() {
            MotionAction::ALL.to_vec()
        } else {
            pool
        }
    }

    fn clamped(mut self) -> Self {
        if !(THRESHOLD_MIN..=THRESHOLD_MAX).contains(&self.threshold) {
            warn!(
                threshold = self.threshold,
                "Config threshold outside engine range; clamping"
            );
            self.threshold = self.threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX);
            if !self.threshold.is_finite() {
                self.threshold = DEFAULT_THRESHOLD;
            }
        }
        if !(MOTION_STEPS_MIN..=MOTION_STEPS_MAX).contains(&self.motion_steps) {
            warn!(
                motion_steps = self.motion_steps,
                "Config motion_steps outside engine range; clamping"
            );
            self.motion_steps = self.motion_steps.clamp(MOTION_STEPS_MIN, MOTION_STEPS_MAX);
        }
        if !(TIMEOUT_MIN_SECS..=TIMEOUT_MAX_SECS).contains(&self.timeout_secs) {
            warn!(
                timeout_secs = self.timeout_secs,
                "Config timeout_secs outside engine range; clamping"
            );
            self.timeout_secs = self.timeout_secs.clamp(TIMEOUT_MIN_SECS, TIMEOUT_MAX_SECS);
        }
        self
    }
}

/// Loads SDK defaults. `None` resolves to `~/.facekit/config.toml`; a
/// missing file yields `SdkConfig::default()`.
pub fn load_config(path: Option<PathBuf>) -> Result<SdkConfig, Error> {
    let path = match path {
        Some(path) => path,
        None => match dirs::home_dir() {
            Some(home) => home.join(DEFAULT_CONFIG_RELATIVE_PATH),
            None => return Ok(SdkConfig::default()),
        },
    };

    if !path.exists() {
        return Ok(SdkConfig::default());
    }

    let content = fs_err::read_to_string(&path).map_err(|err| Error::Io {
        context: format!("reading config at {}", path.display()),
        source: err,
    })?;

    let config: SdkConfig = toml::from_str(&content).map_err(|err| Error::ConfigMalformed {
        path: path.clone(),
        details: err.to_string(),
    })?;

    Ok(config.clamped())
}
