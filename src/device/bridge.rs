//! Synchronous call emulation over completion flags.
//!
//! A bridged call clears its operation's completion bits, posts the decoded
//! command to the loop's command slot and blocks on the completion group
//! until the loop signals success or failure. A bounded call that sees
//! neither within its deadline fails the same way an explicit error does;
//! callers cannot distinguish a slow engine from a dropped message.

use std::sync::Arc;
use std::time::Duration;

use super::core::{EngineCommand, EngineCore, LoopMessage};
use crate::eloop::{EventGroup, EventRegister, LoopTask, SlotHandle};

/// Completion bits shared between caller tasks and the loop. One bit pair
/// per operation class; caller-side races on a pair are prevented by the
/// manager's per-class gates.
pub mod completion {
    pub const START_OK: u32 = 1 << 0;
    pub const START_ERROR: u32 = 1 << 1;
    pub const STOP_STATION_OK: u32 = 1 << 2;
    pub const STOP_ACCESS_POINT_OK: u32 = 1 << 3;
    pub const ADD_IFACE_OK: u32 = 1 << 4;
    pub const ADD_IFACE_ERROR: u32 = 1 << 5;
    pub const REMOVE_IFACE_OK: u32 = 1 << 6;
    pub const REMOVE_IFACE_ERROR: u32 = 1 << 7;
    pub const SCAN_OK: u32 = 1 << 8;
    pub const SCAN_ERROR: u32 = 1 << 9;
    pub const SCAN_RESULTS_OK: u32 = 1 << 10;
    pub const SCAN_RESULTS_ERROR: u32 = 1 << 11;
    /// The results buffer was consumed and may be reused. Signaled exactly
    /// once per results query, on every path.
    pub const SCAN_BUF_FREED: u32 = 1 << 12;
    pub const CONNECT_OK: u32 = 1 << 13;
    pub const CONNECT_ERROR: u32 = 1 << 14;
    pub const DISCONNECT_OK: u32 = 1 << 15;
    pub const DISCONNECT_ERROR: u32 = 1 << 16;
    pub const STATUS_OK: u32 = 1 << 17;
    pub const STATUS_ERROR: u32 = 1 << 18;
    pub const POLICY_OK: u32 = 1 << 19;
    pub const POLICY_ERROR: u32 = 1 << 20;
}

/// Stop confirmation bit for one loop role.
pub fn stop_bit(task: LoopTask) -> u32 {
    match task {
        LoopTask::Station => completion::STOP_STATION_OK,
        LoopTask::AccessPoint => completion::STOP_ACCESS_POINT_OK,
    }
}

/// A bridged call failed: the engine signaled an error, the deadline
/// passed, or the loop is gone. Deliberately carries no detail; nothing
/// structured crosses the bridge boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeError;

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bridged engine call failed")
    }
}

impl std::error::Error for BridgeError {}

/// Caller-side handle pairing the command slot with the completion group.
pub(crate) struct Bridge {
    completion: Arc<EventGroup>,
    register: Arc<EventRegister<EngineCore, LoopMessage>>,
    command_slot: SlotHandle,
}

impl Bridge {
    pub fn new(
        completion: Arc<EventGroup>,
        register: Arc<EventRegister<EngineCore, LoopMessage>>,
        command_slot: SlotHandle,
    ) -> Self {
        Self {
            completion,
            register,
            command_slot,
        }
    }

    /// Post `command` and wait for `ok` or `err`. `deadline == None` waits
    /// indefinitely (lifecycle calls); otherwise timeout and explicit error
    /// are indistinguishable.
    pub async fn call(
        &self,
        ok: u32,
        err: u32,
        command: EngineCommand,
        deadline: Option<Duration>,
    ) -> Result<(), BridgeError> {
        self.completion.clear(ok | err);
        self.register
            .post(&self.command_slot, LoopMessage::Command(command))
            .map_err(|_| BridgeError)?;
        let hit = match deadline {
            Some(dur) => self
                .completion
                .wait_timeout(ok | err, dur)
                .await
                .unwrap_or(0),
            None => self.completion.wait(ok | err).await,
        };
        if hit & ok != 0 && hit & err == 0 {
            Ok(())
        } else {
            Err(BridgeError)
        }
    }
}
