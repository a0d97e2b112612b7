//! Stage lifecycle and worker threads.
//!
//! Every pipeline stage runs on its own OS thread driven by a [`Worker`].
//! The stage implements the [`Stage`] trait; the worker owns it, spawns the
//! thread, and reclaims the boxed stage when the thread is joined so the
//! same stage can be restarted. Cancellation is cooperative: the worker
//! flips a shared run flag and the stage observes it between bounded waits.

use crate::queue::POLL_TIMEOUT;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Run control handed to a stage's `task` loop.
#[derive(Clone)]
pub struct StageCtl {
    run: Arc<AtomicBool>,
}

impl StageCtl {
    pub fn new() -> Self {
        Self {
            run: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Whether the stage should keep running.
    pub fn active(&self) -> bool {
        self.run.load(Ordering::SeqCst)
    }

    /// Ask the stage to wind down. The current `task` iteration finishes;
    /// no further iterations start.
    pub fn deactivate(&self) {
        self.run.store(false, Ordering::SeqCst);
    }

    /// Sleep up to `total`, waking early when deactivated. Used for retry
    /// backoff so a long pause never delays shutdown.
    pub fn sleep(&self, total: Duration) {
        let mut remaining = total;
        while self.active() && !remaining.is_zero() {
            let slice = remaining.min(POLL_TIMEOUT);
            std::thread::sleep(slice);
            remaining -= slice;
        }
    }
}

impl Default for StageCtl {
    fn default() -> Self {
        Self::new()
    }
}

/// A unit of pipeline work with a start / task-loop / stop lifecycle.
///
/// `task` is called repeatedly while the stage is active; implementations
/// must return from each call within a bounded time so cancellation is
/// observed. A stage that has nothing left to do deactivates its own ctl.
pub trait Stage: Send {
    fn name(&self) -> &str;

    /// One-time setup before the task loop. Returning `false` skips the
    /// loop entirely; `stop` still runs.
    fn start(&mut self) -> bool {
        true
    }

    /// One bounded iteration of the stage's work.
    fn task(&mut self, ctl: &StageCtl) {
        let _ = ctl;
        std::thread::sleep(POLL_TIMEOUT);
    }

    /// Teardown after the task loop, on the stage thread.
    fn stop(&mut self) {}
}

enum WorkerState {
    /// Stage at rest, owned here, ready to run.
    Idle(Box<dyn Stage>),
    Running {
        handle: JoinHandle<Box<dyn Stage>>,
        ctl: StageCtl,
        /// Cleared by the stage thread as its last action, so `running()`
        /// can distinguish a live loop from a finished-but-unjoined one.
        alive: Arc<AtomicBool>,
    },
    /// Transient marker while swapping states.
    Empty,
}

/// Owns one stage and the thread executing it.
pub struct Worker {
    name: String,
    state: WorkerState,
}

impl Worker {
    pub fn new(stage: Box<dyn Stage>) -> Self {
        Self {
            name: stage.name().to_string(),
            state: WorkerState::Idle(stage),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Spawn the stage thread. No-op while a live thread exists; a
    /// finished-but-unjoined thread is reaped first so the stage restarts.
    pub fn run(&mut self) {
        if let WorkerState::Running { alive, .. } = &self.state {
            if alive.load(Ordering::SeqCst) {
                return;
            }
            self.wait();
        }

        let mut stage = match std::mem::replace(&mut self.state, WorkerState::Empty) {
            WorkerState::Idle(stage) => stage,
            other => {
                self.state = other;
                return;
            }
        };

        let ctl = StageCtl::new();
        let alive = Arc::new(AtomicBool::new(true));
        let thread_ctl = ctl.clone();
        let thread_alive = alive.clone();
        let name = self.name.clone();

        let spawned = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                if stage.start() {
                    tracing::debug!(stage = name, "stage started");
                    while thread_ctl.active() {
                        stage.task(&thread_ctl);
                    }
                } else {
                    tracing::error!(stage = name, "stage failed to start");
                }
                stage.stop();
                tracing::debug!(stage = name, "stage stopped");
                thread_alive.store(false, Ordering::SeqCst);
                stage
            });

        match spawned {
            Ok(handle) => {
                self.state = WorkerState::Running { handle, ctl, alive };
            }
            Err(e) => {
                tracing::error!(stage = self.name, error = %e, "failed to spawn stage thread");
                // The stage was moved into the failed closure and dropped;
                // there is nothing left to restart.
                self.state = WorkerState::Empty;
            }
        }
    }

    /// Request cooperative shutdown. Returns immediately; pair with
    /// [`Worker::wait`] to join.
    pub fn terminate(&mut self) {
        if let WorkerState::Running { ctl, .. } = &self.state {
            ctl.deactivate();
        }
    }

    /// Join the stage thread (if any) and take the stage back for a later
    /// `run()`.
    pub fn wait(&mut self) {
        if let WorkerState::Running { handle, .. } =
            std::mem::replace(&mut self.state, WorkerState::Empty)
        {
            match handle.join() {
                Ok(stage) => self.state = WorkerState::Idle(stage),
                Err(_) => {
                    tracing::error!(stage = self.name, "stage thread panicked");
                }
            }
        }
    }

    /// Whether the stage thread is live (spawned and not yet finished its
    /// loop).
    pub fn running(&self) -> bool {
        match &self.state {
            WorkerState::Running { alive, .. } => alive.load(Ordering::SeqCst),
            _ => false,
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.terminate();
        self.wait();
    }
}
