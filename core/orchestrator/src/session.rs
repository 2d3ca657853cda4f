//! Session runtime: the single writer behind the state machine.
//!
//! All three event sources (engine sink, caller handle, deadline timer)
//! funnel into one mpsc queue consumed by one worker thread, so session
//! state never needs a lock and arrival order is the arbitration order.
//! The worker applies `machine::transition` and executes the returned
//! effects; completion is delivered to the sink exactly once, after
//! engine, timer and brightness resources are released.

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;
use std::thread;

use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::capabilities::{BrightnessOverride, EngineControl};
use crate::capture::CaptureGate;
use crate::machine::{transition, Effect, Outcome, SessionConfig, SessionEvent, State};

/// Consumes the terminal outcome. Invoked exactly once per session.
pub type CompletionSink = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// Everything a running session owns and must release at completion.
pub struct SessionResources {
    pub control: Box<dyn EngineControl>,
    pub timer: crate::timer::DeadlineTimer,
    pub brightness: Arc<dyn BrightnessOverride>,
    pub capture: CaptureGate,
}

/// Caller-facing handle. Dropping it without a verdict cancels the
/// session; a detached caller must not leave the camera running.
#[derive(Debug)]
pub struct SessionHandle {
    id: Ulid,
    events: Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn id(&self) -> Ulid {
        self.id
    }

    /// Requests cancellation. Loses to any verdict already in the queue;
    /// safe to call after the session ended.
    pub fn cancel(&self) {
        let _ = self.events.send(SessionEvent::Cancel);
    }

    /// Acknowledges a parked verdict (light too high), releasing it to
    /// the completion sink. Ignored in any other state.
    pub fn ack(&self) {
        let _ = self.events.send(SessionEvent::Ack);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        let _ = self.events.send(SessionEvent::Cancel);
    }
}

/// Starts the worker thread for an already-wired session. The caller
/// has acquired the resources and armed the timer; the queue already
/// holds `SessionEvent::Start` ahead of anything the engine pushed.
pub(crate) fn spawn_session(
    id: Ulid,
    config: SessionConfig,
    resources: SessionResources,
    events_tx: Sender<SessionEvent>,
    events_rx: Receiver<SessionEvent>,
    sink: CompletionSink,
) -> SessionHandle {
    let thread_id = id;
    thread::spawn(move || run_session(thread_id, config, resources, events_rx, sink));

    SessionHandle {
        id,
        events: events_tx,
    }
}

fn run_session(
    id: Ulid,
    config: SessionConfig,
    resources: SessionResources,
    events_rx: Receiver<SessionEvent>,
    sink: CompletionSink,
) {
    let mut state = State::Idle;
    let mut sink = Some(sink);
    let mut pending_artifact: Option<PathBuf> = None;

    info!(session_id = %id, mode = ?config.mode, liveness = ?config.liveness, "Session started");

    while !state.is_terminal() {
        let event = match events_rx.recv() {
            Ok(event) => event,
            // Every sender gone with no verdict; treat as cancellation.
            Err(_) => SessionEvent::Cancel,
        };

        // An engine verdict already queued when the deadline fires wins
        // the race; the deadline only claims sessions with no verdict.
        let ordered = if matches!(event, SessionEvent::DeadlineElapsed) {
            resolve_deadline_race(events_rx.try_iter().collect())
        } else {
            vec![event]
        };

        for event in ordered {
            debug!(session_id = %id, state = ?state, event = ?event, "Applying session event");
            let (next, effects) = transition(state, &config, event);
            state = next;
            for effect in effects {
                match effect {
                    Effect::CancelTimer => resources.timer.cancel(),
                    Effect::Capture => pending_artifact = resources.capture.claim(),
                    Effect::Complete(mut outcome) => {
                        if outcome.artifact.is_none() {
                            outcome.artifact = pending_artifact.take();
                        }
                        finish(id, &resources, &mut sink, outcome);
                    }
                }
            }
        }
    }
}

/// Releases session resources, then delivers the outcome. The take()
/// makes double delivery structurally impossible.
fn finish(
    id: Ulid,
    resources: &SessionResources,
    sink: &mut Option<CompletionSink>,
    outcome: Outcome,
) {
    let Some(sink) = sink.take() else {
        warn!(session_id = %id, "Discarding duplicate completion");
        return;
    };

    resources.control.stop();
    resources.timer.cancel();
    resources.brightness.release();

    info!(
        session_id = %id,
        bucket = ?outcome.bucket,
        code = outcome.code,
        "Session completed"
    );
    sink(outcome);
}

/// Orders events drained at deadline arrival: any already-queued engine
/// verdict is applied before the deadline, everything else after it in
/// arrival order.
fn resolve_deadline_race(drained: Vec<SessionEvent>) -> Vec<SessionEvent> {
    let mut ordered = Vec::with_capacity(drained.len() + 1);
    let mut rest = Vec::new();
    for event in drained {
        match &event {
            SessionEvent::Engine(engine_event) if engine_event.is_final() => ordered.push(event),
            _ => rest.push(event),
        }
    }
    ordered.push(SessionEvent::DeadlineElapsed);
    ordered.extend(rest);
    ordered
}
