//! Cancellable one-shot deadline timer.
//!
//! Uses a monotonic `Instant` deadline so system clock changes cannot
//! shorten or extend a session. Firing and cancellation serialize on the
//! same mutex: after `cancel` returns, the deadline event either was
//! already queued or never will be.

use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::machine::SessionEvent;

pub struct DeadlineTimer {
    inner: Arc<TimerInner>,
}

struct TimerInner {
    // True once the timer fired or was cancelled; either way it is done.
    disarmed: Mutex<bool>,
    cvar: Condvar,
}

impl DeadlineTimer {
    /// Arms the timer. After `duration` elapses a single
    /// `SessionEvent::DeadlineElapsed` is sent, unless cancelled first.
    pub fn arm(duration: Duration, events: Sender<SessionEvent>) -> Self {
        let inner = Arc::new(TimerInner {
            disarmed: Mutex::new(false),
            cvar: Condvar::new(),
        });

        let thread_inner = Arc::clone(&inner);
        thread::spawn(move || {
            let deadline = Instant::now() + duration;
            let mut disarmed = thread_inner
                .disarmed
                .lock()
                .expect("timer mutex poisoned");
            loop {
                if *disarmed {
                    return;
                }
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                let (guard, _) = thread_inner
                    .cvar
                    .wait_timeout(disarmed, deadline - now)
                    .expect("timer mutex poisoned");
                disarmed = guard;
            }
            // Self-disarm before sending so a late cancel is a no-op.
            *disarmed = true;
            debug!("Session deadline elapsed");
            let _ = events.send(SessionEvent::DeadlineElapsed);
        });

        Self { inner }
    }

    /// Idempotent: cancelling a fired or already-cancelled timer is a
    /// no-op, never an error.
    pub fn cancel(&self) {
        let mut disarmed = self.inner.disarmed.lock().expect("timer mutex poisoned");
        if !*disarmed {
            *disarmed = true;
            self.inner.cvar.notify_all();
        }
    }
}

impl Drop for DeadlineTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}
