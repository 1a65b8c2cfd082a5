//! WiFi control-plane coordinator.
//!
//! Sits between blocking caller tasks and a single-threaded protocol
//! engine. All engine work funnels through one cooperative loop task
//! ([`eloop`]); callers block on completion flags while the loop runs
//! commands, timers and engine events in order ([`device`]).
//!
//! The engine itself and the hardware transport are trait objects
//! ([`engine`]); this crate contains the coordination, not the protocol.
//!
//! ```no_run
//! use std::sync::Arc;
//! use wlanctl::{DeviceManager, InterfaceRole, ManagerConfig, ScanParams};
//! # use wlanctl::engine::Transport;
//! # async fn demo(transport: Arc<dyn Transport>, factory: wlanctl::EngineFactory) {
//! let manager = DeviceManager::new(transport, factory, ManagerConfig::default()).unwrap();
//! manager.start(InterfaceRole::Station).await.unwrap();
//! manager.scan(ScanParams::Basic).await.unwrap();
//! let networks = manager.scan_results(32).await.unwrap();
//! # }
//! ```

pub mod config;
pub mod device;
pub mod eloop;
pub mod engine;
pub mod reconnect;
pub mod scan;

pub use config::{AuthKind, ConnectConfig, ManagerConfig, ReconnectParams, ScanParams};
pub use device::{
    ConnectionStatus, DeviceManager, EngineFactory, InterfaceRole, WifiError, WifiEvent,
};
pub use scan::{ScanFilter, ScanRecord, SecurityKind};
