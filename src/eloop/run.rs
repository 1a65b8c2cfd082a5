//! The cooperative engine loop.
//!
//! All protocol-engine work is serialized through one spawned task running
//! [`run`]. Per iteration the task:
//!
//! 1. waits on the [`EventRegister`], bounded by the nearest timer deadline
//!    (indefinitely when no timer is armed);
//! 2. fires at most one due timer, removing it before invoking its handler;
//! 3. dispatches every signaled event slot's handler once;
//! 4. consumes pending termination requests and exits once no role remains
//!    running.
//!
//! Handlers run on the loop task and must never block on work that only the
//! loop itself can complete.
//!
//! # Algorithm
//!
//! Termination is cooperative. [`LoopControl::terminate`] only raises a
//! flag; the loop notices it after the current iteration's dispatch, runs
//! the context's teardown hook for that role and keeps going if the other
//! role is still active. Terminating a role that is not running is a no-op.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::{debug, info};

use super::event::{EloopError, EventRegister};
use super::timer::TimerList;

/// The two engine roles that may share the single loop task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTask {
    Station = 0,
    AccessPoint = 1,
}

impl LoopTask {
    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for LoopTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Station => write!(f, "station"),
            Self::AccessPoint => write!(f, "access-point"),
        }
    }
}

/// Outcome of [`LoopControl::begin`]: either this caller must spawn the
/// loop task, or one is already running and the role merely joins it. A
/// second loop task is never spawned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Spawn,
    Attach,
}

#[derive(Default)]
struct ControlState {
    running: [bool; 2],
    pending_term: [bool; 2],
}

/// Shared run/termination state for the loop task.
pub struct LoopControl {
    state: Mutex<ControlState>,
}

impl LoopControl {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ControlState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Mark `task` running. Fails if that role is already active.
    pub fn begin(&self, task: LoopTask) -> Result<StartMode, EloopError> {
        let mut state = self.lock();
        if state.running[task.index()] {
            return Err(EloopError::AlreadyRunning);
        }
        let mode = if state.running.iter().any(|&r| r) {
            StartMode::Attach
        } else {
            StartMode::Spawn
        };
        state.running[task.index()] = true;
        state.pending_term[task.index()] = false;
        Ok(mode)
    }

    /// Undo a failed [`begin`](Self::begin).
    pub fn abandon(&self, task: LoopTask) {
        self.lock().running[task.index()] = false;
    }

    /// Request termination of `task`. Idempotent: returns `false` without
    /// side effects when the role is not running.
    pub fn terminate(&self, task: LoopTask) -> bool {
        let mut state = self.lock();
        if !state.running[task.index()] {
            return false;
        }
        state.running[task.index()] = false;
        state.pending_term[task.index()] = true;
        true
    }

    /// Take and clear all pending termination requests.
    pub fn take_terminations(&self) -> Vec<LoopTask> {
        let mut state = self.lock();
        let mut out = Vec::new();
        for task in [LoopTask::Station, LoopTask::AccessPoint] {
            if state.pending_term[task.index()] {
                state.pending_term[task.index()] = false;
                out.push(task);
            }
        }
        out
    }

    pub fn is_running(&self, task: LoopTask) -> bool {
        self.lock().running[task.index()]
    }

    pub fn any_running(&self) -> bool {
        self.lock().running.iter().any(|&r| r)
    }

    pub fn running_tasks(&self) -> Vec<LoopTask> {
        let state = self.lock();
        [LoopTask::Station, LoopTask::AccessPoint]
            .into_iter()
            .filter(|task| state.running[task.index()])
            .collect()
    }

    pub fn reset(&self) {
        *self.lock() = ControlState::default();
    }
}

impl Default for LoopControl {
    fn default() -> Self {
        Self::new()
    }
}

/// State owned by the loop task. Implemented by the engine-side context.
pub trait LoopContext: Sized + Send {
    /// Message type carried by the context's event slots.
    type Message: Send;

    fn timers_mut(&mut self) -> &mut TimerList<Self>;

    /// Called once before the first iteration. Returning `false` aborts the
    /// loop (the context is expected to have signaled the failure to
    /// whoever is waiting on startup).
    fn on_start(&mut self) -> bool;

    /// Teardown hook for one terminated role. The context signals the
    /// role's stop confirmation from here.
    fn on_terminate(&mut self, task: LoopTask);
}

/// Run the loop until every role has terminated. Stale flags and messages
/// left over from a previous run are discarded before the first iteration.
pub async fn run<C: LoopContext>(
    mut ctx: C,
    register: Arc<EventRegister<C, C::Message>>,
    control: Arc<LoopControl>,
) {
    register.reset();
    if !ctx.on_start() {
        control.reset();
        debug!("engine loop aborted during startup");
        return;
    }
    info!("engine loop running");
    loop {
        match ctx.timers_mut().until_next(Instant::now()) {
            Some(wait) if !wait.is_zero() => {
                register.wait_signaled_timeout(wait).await;
            }
            Some(_) => {} // a timer is already due
            None => {
                register.wait_signaled().await;
            }
        }

        if let Some(entry) = ctx.timers_mut().pop_due(Instant::now()) {
            entry.fire(&mut ctx);
        }

        register.dispatch(&mut ctx);

        for task in control.take_terminations() {
            debug!("engine loop tearing down {} role", task);
            ctx.on_terminate(task);
        }
        if !control.any_running() {
            break;
        }
    }
    info!("engine loop stopped");
}
