//! Device lifecycle and the command/response bridge.
//!
//! The pieces, from the bottom up:
//!
//! - [`table`]: fixed-capacity registry of active interfaces and the role
//!   coexistence rules.
//! - [`bridge`]: synchronous call emulation over completion flags; what a
//!   caller task blocks on while the loop works.
//! - [`core`]: the loop-side context that routes decoded commands into the
//!   protocol engine and turns engine events into completions, reconnect
//!   timers and subscriber notifications.
//! - [`manager`]: the public API tying it all together.

mod bridge;
mod core;
mod manager;
mod table;

pub use bridge::{completion, stop_bit, BridgeError};
pub use self::core::{EngineCommand, EngineMailbox, LoopMessage, SharedReplies, WifiEvent};
pub use manager::{ConnectionStatus, DeviceManager, EngineFactory, WifiError};
pub use table::{
    DeviceTable, InterfaceRecord, InterfaceRole, InterfaceState, TableError, DEVICE_CAPACITY,
    IFNAME_MAX,
};
