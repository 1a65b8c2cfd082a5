//! External collaborator interfaces.
//!
//! The coordinator drives two collaborators it does not implement: the
//! protocol engine (association, key exchange, scanning) and the hardware
//! transport that materializes network interfaces. Both are trait objects
//! so tests can substitute scripted fakes.

use crate::config::{ConnectConfig, ScanParams};
use crate::device::InterfaceRole;
use crate::eloop::LoopTask;

/// One decoded control command routed into the engine on the loop task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlRequest {
    /// Start a scan; completion arrives later as [`EngineEvent::ScanDone`].
    Scan(ScanParams),
    /// Fetch the text buffer holding the latest scan results.
    ScanResults,
    /// Configure and select a network; completion arrives as
    /// [`EngineEvent::Connected`] or [`EngineEvent::Disconnected`].
    Connect(ConnectConfig),
    /// Re-select the already configured network (reconnect attempt).
    Reselect,
    Disconnect,
    /// Query association state as `key=value` lines.
    Status,
}

/// Engine's synchronous answer to a control request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlReply {
    /// Request accepted; any outcome arrives as an event.
    Ok,
    /// Request answered inline with a text payload.
    Text(String),
}

/// Failure reported by a collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the request.
    Rejected(&'static str),
    /// The request was attempted and failed.
    Failed(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rejected(reason) => write!(f, "engine rejected request: {}", reason),
            Self::Failed(detail) => write!(f, "engine request failed: {}", detail),
        }
    }
}

impl std::error::Error for EngineError {}

/// Asynchronous notification emitted by the engine. Delivered to the loop
/// through its event slot, never invoked directly on engine internals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Connected { ssid: String, bssid: [u8; 6] },
    Disconnected { bssid: [u8; 6], reason_code: u16 },
    ScanDone,
    ScanFailed,
}

/// The protocol engine. All methods are called from the single loop task,
/// so implementations need no internal locking for loop-driven state.
pub trait Engine: Send {
    /// Bind a network interface to a new engine instance (or to the running
    /// one, when one already exists for this loop).
    fn attach_interface(&mut self, name: &str, role: InterfaceRole) -> Result<(), EngineError>;

    /// Release one interface without stopping the engine.
    fn detach_interface(&mut self, name: &str) -> Result<(), EngineError>;

    /// Execute one control command.
    fn control(&mut self, request: ControlRequest) -> Result<ControlReply, EngineError>;

    /// Tear down all engine state belonging to one loop role.
    fn shutdown(&mut self, task: LoopTask);
}

/// Failure reported by the hardware transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The driver could not materialize an interface.
    CreateFailed(&'static str),
    /// The named interface is unknown to the driver.
    UnknownInterface,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateFailed(reason) => write!(f, "interface creation failed: {}", reason),
            Self::UnknownInterface => write!(f, "unknown interface"),
        }
    }
}

impl std::error::Error for TransportError {}

/// The hardware/driver side: materializes and destroys network interfaces.
/// Called from caller tasks under the manager's start/stop lock, so
/// implementations must be thread-safe but never see concurrent lifecycle
/// calls.
pub trait Transport: Send + Sync {
    /// Allocate a fresh interface for `role` and return its name.
    fn create_interface(&self, role: InterfaceRole) -> Result<String, TransportError>;

    /// Release the named interface.
    fn destroy_interface(&self, name: &str) -> Result<(), TransportError>;
}
