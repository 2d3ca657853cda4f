//! Session state machine.
//!
//! A pure transition function `(state, config, event) -> (state, effects)`
//! so the race-resolution rules are testable without threads, cameras or
//! timers. The runtime in `session.rs` owns the single-writer loop that
//! feeds events in and executes the returned effects.
//!
//! The three event sources (engine, user cancel, deadline) are logically
//! concurrent; resolution is strictly first-wins by arrival order.
//! Terminal is absorbing: anything delivered after it is discarded
//! without side effects.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use facekit_protocol::{classify, failure_reason, Bucket, EngineEvent, LivenessMode, ResultCode};

/// Which caller entry point started the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    Enroll,
    Verify,
    LivenessOnly,
}

/// Immutable per-session snapshot taken at start.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: SessionMode,
    pub liveness: LivenessMode,
    pub motion_steps: u32,
    /// Similarity threshold; only meaningful for Verify.
    pub threshold: Option<f32>,
    /// Caller-supplied timeout, before the color-flash grace.
    pub timeout_secs: u64,
}

impl SessionConfig {
    /// Deadline actually armed: color modes absorb the flash sequence.
    pub fn effective_timeout(&self) -> Duration {
        Duration::from_secs(self.liveness.adjusted_timeout_secs(self.timeout_secs))
    }
}

/// Everything that can reach the session's single-writer queue.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Queued by the runtime once resources are wired.
    Start,
    Engine(EngineEvent),
    Cancel,
    DeadlineElapsed,
    /// Host acknowledgment for verdicts that require one (light too high).
    Ack,
}

#[derive(Debug, Clone, PartialEq)]
pub enum State {
    Idle,
    Armed,
    AwaitingEngine,
    /// A verdict is decided but parked until the host acknowledges it.
    Resolving { pending: Outcome },
    Terminal,
}

impl State {
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Terminal)
    }
}

/// Terminal result of a session. Set exactly once, immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub code: i32,
    pub bucket: Bucket,
    pub similarity: Option<f32>,
    pub reason: Option<String>,
    /// Confirmation snapshot; attached by the runtime on Success only.
    pub artifact: Option<PathBuf>,
}

impl Outcome {
    pub fn cancelled() -> Self {
        Self {
            code: ResultCode::UserCancelled.code(),
            bucket: Bucket::Cancelled,
            similarity: None,
            reason: None,
            artifact: None,
        }
    }

    pub fn timeout() -> Self {
        Self {
            code: ResultCode::MotionTimeout.code(),
            bucket: Bucket::Timeout,
            similarity: None,
            reason: None,
            artifact: None,
        }
    }

    pub fn success(code: i32, similarity: Option<f32>) -> Self {
        Self {
            code,
            bucket: Bucket::Success,
            similarity,
            reason: None,
            artifact: None,
        }
    }

    pub fn failure(code: i32, reason: impl Into<String>, similarity: Option<f32>) -> Self {
        Self {
            code,
            bucket: Bucket::Failure,
            similarity,
            reason: Some(reason.into()),
            artifact: None,
        }
    }
}

/// Side effects the runtime executes after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    CancelTimer,
    /// Claim the capture gate and attach the artifact to the outcome.
    Capture,
    /// Release resources and deliver the outcome, exactly once.
    Complete(Outcome),
}

/// The single place session state may change. Total over all
/// (state, event) pairs.
pub fn transition(
    state: State,
    config: &SessionConfig,
    event: SessionEvent,
) -> (State, Vec<Effect>) {
    // Terminal is absorbing; guards against lingering engine
    // subscriptions double-driving completion.
    if state.is_terminal() {
        return (State::Terminal, Vec::new());
    }

    match event {
        SessionEvent::Start => match state {
            State::Idle => (State::Armed, Vec::new()),
            other => (other, Vec::new()),
        },

        SessionEvent::Cancel => match state {
            // The user already saw the parked verdict; keep it.
            State::Resolving { pending } => {
                (State::Terminal, vec![Effect::Complete(pending)])
            }
            _ => (
                State::Terminal,
                vec![Effect::CancelTimer, Effect::Complete(Outcome::cancelled())],
            ),
        },

        SessionEvent::DeadlineElapsed => match state {
            State::Resolving { pending } => (State::Resolving { pending }, Vec::new()),
            _ => (
                State::Terminal,
                vec![Effect::CancelTimer, Effect::Complete(Outcome::timeout())],
            ),
        },

        SessionEvent::Ack => match state {
            State::Resolving { pending } => {
                (State::Terminal, vec![Effect::Complete(pending)])
            }
            other => (other, Vec::new()),
        },

        SessionEvent::Engine(engine_event) => match engine_event {
            // Transient feedback keeps the session live.
            EngineEvent::Tip { .. }
            | EngineEvent::ColorFlash { .. }
            | EngineEvent::Countdown { .. } => match state {
                State::Resolving { pending } => (State::Resolving { pending }, Vec::new()),
                _ => (State::AwaitingEngine, Vec::new()),
            },

            EngineEvent::Final {
                code,
                similarity,
                artifact,
            } => match state {
                State::Resolving { pending } => (State::Resolving { pending }, Vec::new()),
                _ => resolve_final(config, code, similarity, artifact),
            },
        },
    }
}

fn resolve_final(
    config: &SessionConfig,
    code: i32,
    similarity: Option<f32>,
    artifact: Option<PathBuf>,
) -> (State, Vec<Effect>) {
    let outcome = classify_final(config, code, similarity, artifact);

    // Light-too-high verdicts wait for host acknowledgment before the
    // session becomes terminal. The timer is already done with.
    if code == ResultCode::LightTooHigh.code() {
        return (
            State::Resolving { pending: outcome },
            vec![Effect::CancelTimer],
        );
    }

    let mut effects = vec![Effect::CancelTimer];
    if outcome.bucket == Bucket::Success && config.mode != SessionMode::LivenessOnly {
        effects.push(Effect::Capture);
    }
    effects.push(Effect::Complete(outcome));
    (State::Terminal, effects)
}

fn classify_final(
    config: &SessionConfig,
    code: i32,
    similarity: Option<f32>,
    artifact: Option<PathBuf>,
) -> Outcome {
    match classify(code) {
        Bucket::Cancelled => Outcome::cancelled(),
        Bucket::Timeout => Outcome::timeout(),
        Bucket::Failure => Outcome::failure(code, failure_reason(code), similarity),
        Bucket::Success => {
            // Verify mode: a nominal success code still requires the
            // similarity to clear the threshold. This downgrade is a
            // deliberate rule, not engine behavior.
            let needs_match = config.mode == SessionMode::Verify
                && (code == ResultCode::Verified.code()
                    || code == ResultCode::LivenessAndMatchPassed.code());
            if needs_match {
                let threshold = config.threshold.unwrap_or(0.0);
                let matched = similarity.map(|s| s > threshold).unwrap_or(false);
                if !matched {
                    return Outcome::failure(code, "Not Verify", similarity);
                }
            }
            let mut outcome = Outcome::success(code, similarity);
            outcome.artifact = artifact;
            outcome
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: SessionMode) -> SessionConfig {
        SessionConfig {
            mode,
            liveness: LivenessMode::Motion,
            motion_steps: 2,
            threshold: Some(0.85),
            timeout_secs: 9,
        }
    }

    fn final_event(code: i32, similarity: Option<f32>) -> SessionEvent {
        SessionEvent::Engine(EngineEvent::Final {
            code,
            similarity,
            artifact: None,
        })
    }

    fn completed(effects: &[Effect]) -> Option<&Outcome> {
        effects.iter().find_map(|effect| match effect {
            Effect::Complete(outcome) => Some(outcome),
            _ => None,
        })
    }

    #[test]
    fn start_arms_idle_session() {
        let (state, effects) = transition(State::Idle, &config(SessionMode::Verify), SessionEvent::Start);
        assert_eq!(state, State::Armed);
        assert!(effects.is_empty());
    }

    #[test]
    fn cancel_wins_and_skips_capture() {
        let (state, effects) =
            transition(State::Armed, &config(SessionMode::Verify), SessionEvent::Cancel);
        assert!(state.is_terminal());
        assert!(effects.contains(&Effect::CancelTimer));
        assert!(!effects.contains(&Effect::Capture));
        assert_eq!(completed(&effects).unwrap().bucket, Bucket::Cancelled);
    }

    #[test]
    fn deadline_yields_timeout() {
        let (state, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::LivenessOnly),
            SessionEvent::DeadlineElapsed,
        );
        assert!(state.is_terminal());
        let outcome = completed(&effects).unwrap();
        assert_eq!(outcome.bucket, Bucket::Timeout);
        assert_eq!(outcome.code, 4);
    }

    #[test]
    fn tips_keep_session_awaiting_engine() {
        let cfg = config(SessionMode::Verify);
        let (state, effects) = transition(
            State::Armed,
            &cfg,
            SessionEvent::Engine(EngineEvent::Tip { code: 17 }),
        );
        assert_eq!(state, State::AwaitingEngine);
        assert!(effects.is_empty());

        let (state, _) = transition(
            state,
            &cfg,
            SessionEvent::Engine(EngineEvent::Countdown { percent: 0.4 }),
        );
        assert_eq!(state, State::AwaitingEngine);
    }

    #[test]
    fn verify_success_captures_and_completes() {
        let (state, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Verify),
            final_event(1, Some(0.90)),
        );
        assert!(state.is_terminal());
        assert!(effects.contains(&Effect::Capture));
        let outcome = completed(&effects).unwrap();
        assert_eq!(outcome.bucket, Bucket::Success);
        assert_eq!(outcome.similarity, Some(0.90));
    }

    #[test]
    fn verify_downgrades_below_threshold() {
        let (state, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Verify),
            final_event(1, Some(0.80)),
        );
        assert!(state.is_terminal());
        assert!(!effects.contains(&Effect::Capture));
        let outcome = completed(&effects).unwrap();
        assert_eq!(outcome.bucket, Bucket::Failure);
        assert_eq!(outcome.reason.as_deref(), Some("Not Verify"));
    }

    #[test]
    fn verify_downgrades_at_exact_threshold() {
        // Strictly greater-than: similarity == threshold is not a match.
        let (_, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Verify),
            final_event(10, Some(0.85)),
        );
        assert_eq!(completed(&effects).unwrap().bucket, Bucket::Failure);
    }

    #[test]
    fn verify_downgrades_missing_similarity() {
        let (_, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Verify),
            final_event(1, None),
        );
        assert_eq!(completed(&effects).unwrap().bucket, Bucket::Failure);
    }

    #[test]
    fn enroll_success_skips_similarity_check() {
        let (_, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Enroll),
            final_event(1, None),
        );
        let outcome = completed(&effects).unwrap();
        assert_eq!(outcome.bucket, Bucket::Success);
    }

    #[test]
    fn liveness_only_success_skips_capture() {
        for code in [3, 7, 10] {
            let (state, effects) = transition(
                State::AwaitingEngine,
                &config(SessionMode::LivenessOnly),
                final_event(code, None),
            );
            assert!(state.is_terminal());
            assert!(!effects.contains(&Effect::Capture));
            assert_eq!(completed(&effects).unwrap().bucket, Bucket::Success);
        }
    }

    #[test]
    fn unknown_code_fails_closed() {
        let (_, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Verify),
            final_event(42, None),
        );
        let outcome = completed(&effects).unwrap();
        assert_eq!(outcome.bucket, Bucket::Failure);
        assert_eq!(outcome.code, 42);
    }

    #[test]
    fn light_too_high_parks_until_ack() {
        let cfg = config(SessionMode::LivenessOnly);
        let (state, effects) =
            transition(State::AwaitingEngine, &cfg, final_event(9, None));
        assert!(matches!(state, State::Resolving { .. }));
        assert_eq!(effects, vec![Effect::CancelTimer]);

        // Late engine/deadline noise while parked changes nothing.
        let (state, effects) = transition(state, &cfg, SessionEvent::DeadlineElapsed);
        assert!(matches!(state, State::Resolving { .. }));
        assert!(effects.is_empty());

        let (state, effects) = transition(state, &cfg, SessionEvent::Ack);
        assert!(state.is_terminal());
        let outcome = completed(&effects).unwrap();
        assert_eq!(outcome.bucket, Bucket::Failure);
        assert_eq!(outcome.code, 9);
    }

    #[test]
    fn cancel_while_parked_keeps_verdict() {
        let cfg = config(SessionMode::Verify);
        let (state, _) = transition(State::AwaitingEngine, &cfg, final_event(9, None));
        let (state, effects) = transition(state, &cfg, SessionEvent::Cancel);
        assert!(state.is_terminal());
        assert_eq!(completed(&effects).unwrap().code, 9);
    }

    #[test]
    fn terminal_is_absorbing() {
        let cfg = config(SessionMode::Verify);
        for event in [
            SessionEvent::Cancel,
            SessionEvent::DeadlineElapsed,
            SessionEvent::Ack,
            final_event(1, Some(0.99)),
            SessionEvent::Engine(EngineEvent::Tip { code: 3 }),
        ] {
            let (state, effects) = transition(State::Terminal, &cfg, event);
            assert!(state.is_terminal());
            assert!(effects.is_empty());
        }
    }

    #[test]
    fn ack_outside_resolving_is_ignored() {
        let (state, effects) = transition(
            State::AwaitingEngine,
            &config(SessionMode::Verify),
            SessionEvent::Ack,
        );
        assert_eq!(state, State::AwaitingEngine);
        assert!(effects.is_empty());
    }

    #[test]
    fn effective_timeout_applies_color_grace() {
        let mut cfg = config(SessionMode::Verify);
        cfg.liveness = LivenessMode::Color;
        cfg.timeout_secs = 9;
        assert_eq!(cfg.effective_timeout(), Duration::from_secs(13));

        cfg.liveness = LivenessMode::Motion;
        assert_eq!(cfg.effective_timeout(), Duration::from_secs(9));
    }
}
