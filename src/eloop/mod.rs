//! Cooperative single-task event loop.
//!
//! This is the serialization point for all protocol-engine work: a bounded
//! register of level-triggered event slots with per-slot message queues, a
//! deadline-ordered timer list, and the loop task that waits on both. No
//! two pieces of engine logic ever run concurrently because everything is
//! dispatched from the one task running [`run`].

mod event;
mod run;
mod timer;

pub use event::{EloopError, EventGroup, EventRegister, SlotHandle, SlotHandler, MAX_EVENT_SLOTS};
pub use run::{run, LoopContext, LoopControl, LoopTask, StartMode};
pub use timer::{TimerEntry, TimerKey, TimerList};
