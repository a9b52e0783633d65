//! Single-shot and auto-reloading timers.
//!
//! The expiry callback runs on a detached tokio task. Callbacks must not
//! mutate protocol state directly; they post a message to the owning
//! worker's queue so every state transition happens on that worker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;

/// Lifecycle of a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Running,
    Expired,
}

struct Inner {
    state: TimerState,
    deadline: Option<Instant>,
}

struct Shared {
    callback: Box<dyn Fn() + Send + Sync>,
    inner: Mutex<Inner>,
    /// Bumped on every start/stop; a sleeping task whose generation no
    /// longer matches must not fire its callback.
    generation: AtomicU64,
}

/// A restartable timer bound to one callback.
pub struct Timer {
    shared: Arc<Shared>,
}

impl Timer {
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Timer {
            shared: Arc::new(Shared {
                callback: Box::new(callback),
                inner: Mutex::new(Inner {
                    state: TimerState::Idle,
                    deadline: None,
                }),
                generation: AtomicU64::new(0),
            }),
        }
    }

    /// Arm the timer. A zero duration is a no-op; an already running timer
    /// is restarted with the new duration.
    pub fn start(&self, duration: Duration, autoreload: bool) {
        if duration.is_zero() {
            return;
        }

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut inner = self.shared.inner.lock().expect("timer lock");
            inner.state = TimerState::Running;
            inner.deadline = Some(Instant::now() + duration);
        }

        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(duration).await;

                {
                    let mut inner = shared.inner.lock().expect("timer lock");
                    if shared.generation.load(Ordering::SeqCst) != generation {
                        // Stopped or restarted while we slept.
                        return;
                    }

                    if autoreload {
                        inner.deadline = Some(Instant::now() + duration);
                    } else {
                        inner.state = TimerState::Expired;
                        inner.deadline = None;
                    }
                }

                (shared.callback)();

                if !autoreload {
                    return;
                }
            }
        });
    }

    /// Disarm the timer; a pending expiry is suppressed.
    pub fn stop(&self) {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.shared.inner.lock().expect("timer lock");
        inner.state = TimerState::Idle;
        inner.deadline = None;
    }

    pub fn state(&self) -> TimerState {
        self.shared.inner.lock().expect("timer lock").state
    }

    /// Time left until the next expiry; zero unless running.
    pub fn remaining(&self) -> Duration {
        let inner = self.shared.inner.lock().expect("timer lock");
        match (inner.state, inner.deadline) {
            (TimerState::Running, Some(deadline)) => {
                deadline.saturating_duration_since(Instant::now())
            }
            _ => Duration::ZERO,
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}
