//! Device lifecycle supervisor and public API surface.
//!
//! [`DeviceManager`] owns everything the original design kept in globals:
//! the interface table, the start/stop lock flag, the completion group, the
//! event register feeding the loop, the shared reply buffers and the
//! notification fan-out. One manager instance is one independently testable
//! coordinator.
//!
//! Caller tasks block only inside bridged calls; the engine loop is the
//! single consumer of all engine work. Only one start/stop sequence may be
//! in flight at a time, enforced by the lock flag held for the whole
//! sequence. Other operations are refused while it is held.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;

use super::bridge::{completion, stop_bit, Bridge, BridgeError};
use super::core::{
    loop_slot_handler, EngineCommand, EngineCore, EngineMailbox, LoopMessage, SharedReplies,
    WifiEvent,
};
use super::table::{
    DeviceTable, InterfaceRecord, InterfaceRole, InterfaceState, TableError,
};
use crate::config::{ConfigError, ConnectConfig, ManagerConfig, ReconnectParams, ScanParams};
use crate::engine::{Engine, Transport, TransportError};
use crate::eloop::{
    self, EloopError, EventGroup, EventRegister, LoopControl, LoopTask, SlotHandle, StartMode,
};
use crate::scan::{freq_to_channel, parse_mac, parse_scan_results, ScanFilter, ScanRecord};

/// Builds one engine instance when the loop task spawns. Receives the
/// mailbox the engine uses to report asynchronous outcomes.
pub type EngineFactory = Box<dyn Fn(EngineMailbox) -> Box<dyn Engine> + Send + Sync>;

/// Caller-visible failures. Bridged failures stay generic: no structured
/// detail crosses the bridge boundary.
#[derive(Debug)]
pub enum WifiError {
    /// A start/stop sequence is already in flight.
    Busy,
    /// The operation needs an interface that is not running.
    NotStarted,
    Config(ConfigError),
    Table(TableError),
    Transport(TransportError),
    /// The engine signaled an error or the call timed out; the two are
    /// indistinguishable by design.
    Bridge,
    Loop(EloopError),
}

impl std::fmt::Display for WifiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "another start/stop is in flight"),
            Self::NotStarted => write!(f, "interface not started"),
            Self::Config(err) => write!(f, "{}", err),
            Self::Table(err) => write!(f, "{}", err),
            Self::Transport(err) => write!(f, "{}", err),
            Self::Bridge => write!(f, "engine call failed"),
            Self::Loop(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for WifiError {}

impl From<ConfigError> for WifiError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err)
    }
}

impl From<TableError> for WifiError {
    fn from(err: TableError) -> Self {
        Self::Table(err)
    }
}

impl From<TransportError> for WifiError {
    fn from(err: TransportError) -> Self {
        Self::Transport(err)
    }
}

impl From<BridgeError> for WifiError {
    fn from(_: BridgeError) -> Self {
        Self::Bridge
    }
}

/// Parsed answer to a status query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub ssid: Option<String>,
    pub bssid: Option<[u8; 6]>,
    pub channel: Option<u8>,
}

impl ConnectionStatus {
    /// Parse the engine's `key=value` status lines. Unknown keys are
    /// ignored; `state=associated` marks a live link.
    fn parse(text: &str) -> Self {
        let mut status = Self::default();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            match key {
                "state" => status.connected = value == "associated",
                "ssid" => status.ssid = Some(value.to_owned()),
                "bssid" => status.bssid = parse_mac(value),
                "freq" => {
                    status.channel = value.parse::<u32>().ok().and_then(freq_to_channel);
                }
                _ => {}
            }
        }
        status
    }
}

/// Clears the lock flag when the start/stop sequence ends, on every path.
struct LockFlagGuard<'a>(&'a AtomicBool);

impl Drop for LockFlagGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Per-operation-class gates. Two tasks issuing the same kind of bridged
/// call would otherwise race on the shared completion bits.
struct OpGates {
    scan: AsyncMutex<()>,
    connect: AsyncMutex<()>,
    status: AsyncMutex<()>,
    policy: AsyncMutex<()>,
}

/// The coordinator. See the module docs for the concurrency contract.
pub struct DeviceManager {
    config: ManagerConfig,
    table: StdMutex<DeviceTable>,
    /// One start/stop in flight at a time.
    lock_flag: AtomicBool,
    completion: Arc<EventGroup>,
    register: Arc<EventRegister<EngineCore, LoopMessage>>,
    command_slot: SlotHandle,
    event_slot: SlotHandle,
    control: Arc<LoopControl>,
    transport: Arc<dyn Transport>,
    factory: EngineFactory,
    shared: Arc<SharedReplies>,
    scan_filter: StdMutex<Option<ScanFilter>>,
    bridge: Bridge,
    events_tx: broadcast::Sender<WifiEvent>,
    raw_events_tx: mpsc::UnboundedSender<WifiEvent>,
    gates: OpGates,
    cancel: CancellationToken,
}

impl DeviceManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        factory: EngineFactory,
        config: ManagerConfig,
    ) -> Result<Self, WifiError> {
        config.validate()?;
        let register: Arc<EventRegister<EngineCore, LoopMessage>> =
            Arc::new(EventRegister::new());
        let command_slot = register.register(loop_slot_handler).map_err(WifiError::Loop)?;
        let event_slot = register.register(loop_slot_handler).map_err(WifiError::Loop)?;
        let completion = Arc::new(EventGroup::new());
        let bridge = Bridge::new(completion.clone(), register.clone(), command_slot);

        let (raw_events_tx, mut raw_events_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        // Notifications are re-broadcast from a dedicated task so
        // subscriber work never runs on the engine loop.
        {
            let events_tx = events_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        event = raw_events_rx.recv() => match event {
                            Some(event) => {
                                let _ = events_tx.send(event);
                            }
                            None => break,
                        },
                    }
                }
            });
        }

        Ok(Self {
            config,
            table: StdMutex::new(DeviceTable::new()),
            lock_flag: AtomicBool::new(false),
            completion,
            register,
            command_slot,
            event_slot,
            control: Arc::new(LoopControl::new()),
            transport,
            factory,
            shared: Arc::new(SharedReplies::new()),
            scan_filter: StdMutex::new(None),
            bridge,
            events_tx,
            raw_events_tx,
            gates: OpGates {
                scan: AsyncMutex::new(()),
                connect: AsyncMutex::new(()),
                status: AsyncMutex::new(()),
                policy: AsyncMutex::new(()),
            },
            cancel,
        })
    }

    fn table_lock(&self) -> MutexGuard<'_, DeviceTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn filter_lock(&self) -> MutexGuard<'_, Option<ScanFilter>> {
        self.scan_filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn take_lock_flag(&self) -> Result<LockFlagGuard<'_>, WifiError> {
        if self
            .lock_flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(WifiError::Busy);
        }
        Ok(LockFlagGuard(&self.lock_flag))
    }

    /// Bridged operations need a station-side engine and no lifecycle
    /// sequence in flight.
    fn require_station(&self) -> Result<(), WifiError> {
        if self.lock_flag.load(Ordering::SeqCst) {
            return Err(WifiError::Busy);
        }
        let table = self.table_lock();
        let attached = table
            .iter()
            .any(|r| r.role.loop_task() == LoopTask::Station && r.engine_attached);
        if attached {
            Ok(())
        } else {
            Err(WifiError::NotStarted)
        }
    }

    /// Snapshot of the interface table.
    pub fn interfaces(&self) -> Vec<InterfaceRecord> {
        self.table_lock().iter().cloned().collect()
    }

    /// Receive connect/disconnect/scan-done notifications. Subscribe before
    /// triggering the operation you want to observe.
    pub fn subscribe(&self) -> broadcast::Receiver<WifiEvent> {
        self.events_tx.subscribe()
    }

    /// Bring up an interface for `role`. The first interface spawns the
    /// engine loop task; any further interface is added to the running
    /// engine instead. A second engine task is never spawned.
    pub async fn start(&self, role: InterfaceRole) -> Result<String, WifiError> {
        let _lock = self.take_lock_flag()?;
        self.table_lock().precheck(role)?;

        let name = self.transport.create_interface(role)?;
        let slot = match self.table_lock().insert(&name, role) {
            Ok(slot) => slot,
            Err(err) => {
                self.rollback_interface(&name);
                return Err(err.into());
            }
        };

        let task = role.loop_task();
        let began = !self.control.is_running(task);
        let attach = if began {
            match self.control.begin(task).map_err(WifiError::Loop)? {
                StartMode::Spawn => self.spawn_engine(&name, role).await,
                // The loop already serves the other role; this one joins it.
                StartMode::Attach => self.attach_engine(&name, role).await,
            }
        } else {
            self.attach_engine(&name, role).await
        };

        if let Err(err) = attach {
            if began {
                self.control.abandon(task);
            }
            self.table_lock().remove(slot);
            self.rollback_interface(&name);
            return Err(err);
        }

        if let Some(record) = self.table_lock().get_mut(slot) {
            record.state = InterfaceState::Running;
            record.engine_attached = true;
        }
        info!("{} interface {} started", role, name);
        Ok(name)
    }

    async fn spawn_engine(&self, name: &str, role: InterfaceRole) -> Result<(), WifiError> {
        self.completion
            .clear(completion::START_OK | completion::START_ERROR);
        let mailbox = EngineMailbox::new(self.register.clone(), self.event_slot);
        let engine = (self.factory)(mailbox);
        let core = EngineCore::new(
            engine,
            (name.to_owned(), role),
            self.completion.clone(),
            self.control.clone(),
            self.shared.clone(),
            self.raw_events_tx.clone(),
        );
        debug!("spawning engine loop for {}", name);
        tokio::spawn(eloop::run(core, self.register.clone(), self.control.clone()));

        // Startup confirmation has no deadline; the loop always answers.
        let hit = self
            .completion
            .wait(completion::START_OK | completion::START_ERROR)
            .await;
        if hit & completion::START_OK != 0 {
            Ok(())
        } else {
            Err(WifiError::Bridge)
        }
    }

    async fn attach_engine(&self, name: &str, role: InterfaceRole) -> Result<(), WifiError> {
        debug!("adding {} to the running engine", name);
        self.bridge
            .call(
                completion::ADD_IFACE_OK,
                completion::ADD_IFACE_ERROR,
                EngineCommand::AddInterface {
                    name: name.to_owned(),
                    role,
                },
                None,
            )
            .await?;
        Ok(())
    }

    fn rollback_interface(&self, name: &str) {
        if let Err(err) = self.transport.destroy_interface(name) {
            warn!("rollback of {} failed: {}", name, err);
        }
    }

    /// Tear down the interface running `role`. Stopping a role that is not
    /// running is an error, not a no-op. The call returns only after the
    /// engine confirmed teardown and the hardware interface is released.
    pub async fn stop(&self, role: InterfaceRole) -> Result<(), WifiError> {
        let _lock = self.take_lock_flag()?;
        let (slot, name) = {
            let mut table = self.table_lock();
            let record = table.find_role(role).ok_or(WifiError::NotStarted)?;
            let slot = record.slot;
            let name = record.name.clone();
            if let Some(record) = table.get_mut(slot) {
                record.state = InterfaceState::Stopping;
            }
            (slot, name)
        };

        let task = role.loop_task();
        let last_for_task = !self.table_lock().other_attached_for_task(slot, task);
        if last_for_task {
            self.bridge
                .call(stop_bit(task), 0, EngineCommand::Terminate(task), None)
                .await?;
        } else {
            let removed = self
                .bridge
                .call(
                    completion::REMOVE_IFACE_OK,
                    completion::REMOVE_IFACE_ERROR,
                    EngineCommand::RemoveInterface {
                        name: name.clone(),
                        role,
                    },
                    None,
                )
                .await;
            if removed.is_err() {
                // Teardown is past the point of no return; keep going.
                warn!("engine detach of {} reported failure", name);
            }
        }

        if let Err(err) = self.transport.destroy_interface(&name) {
            warn!("destroy of {} failed: {}", name, err);
        }
        self.table_lock().remove(slot);
        if role == InterfaceRole::Station {
            *self.filter_lock() = None;
            self.shared.take_scan_buf();
            self.shared.take_status_buf();
        }
        info!("{} interface {} stopped", role, name);
        Ok(())
    }

    /// Trigger a scan. The chosen mode also becomes the filter applied when
    /// results are fetched. Completion is bounded by the bridge timeout.
    pub async fn scan(&self, params: ScanParams) -> Result<(), WifiError> {
        params.validate()?;
        self.require_station()?;
        let _gate = self.gates.scan.lock().await;
        *self.filter_lock() = Some(params.filter());
        self.bridge
            .call(
                completion::SCAN_OK,
                completion::SCAN_ERROR,
                EngineCommand::Scan(params),
                Some(self.config.bridge_timeout),
            )
            .await?;
        Ok(())
    }

    /// Fetch and parse the latest scan results, at most `max` records.
    /// The engine's reply buffer is released exactly once per call, on
    /// success and failure paths alike; a missing release would wedge the
    /// next query.
    pub async fn scan_results(&self, max: usize) -> Result<Vec<ScanRecord>, WifiError> {
        self.require_station()?;
        let _gate = self.gates.scan.lock().await;
        let fetched = self
            .bridge
            .call(
                completion::SCAN_RESULTS_OK,
                completion::SCAN_RESULTS_ERROR,
                EngineCommand::ScanResults,
                Some(self.config.bridge_timeout),
            )
            .await;

        let buf = self.shared.take_scan_buf();
        let records = match (&fetched, buf) {
            (Ok(()), Some(buf)) => {
                let filter = self.filter_lock().clone().unwrap_or(ScanFilter::Any);
                parse_scan_results(&buf, &filter, max.min(self.config.scan_limit))
            }
            _ => Vec::new(),
        };
        self.completion.signal(completion::SCAN_BUF_FREED);
        fetched?;
        Ok(records)
    }

    /// Associate with a network. Fails when the engine reports an error or
    /// stays silent past the bridge timeout; the two are indistinguishable.
    pub async fn connect(&self, config: ConnectConfig) -> Result<(), WifiError> {
        config.validate()?;
        self.require_station()?;
        let _gate = self.gates.connect.lock().await;
        self.bridge
            .call(
                completion::CONNECT_OK,
                completion::CONNECT_ERROR,
                EngineCommand::Connect(config),
                Some(self.config.bridge_timeout),
            )
            .await?;
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<(), WifiError> {
        self.require_station()?;
        let _gate = self.gates.connect.lock().await;
        self.bridge
            .call(
                completion::DISCONNECT_OK,
                completion::DISCONNECT_ERROR,
                EngineCommand::Disconnect,
                Some(self.config.bridge_timeout),
            )
            .await?;
        Ok(())
    }

    /// Query association state.
    pub async fn status(&self) -> Result<ConnectionStatus, WifiError> {
        self.require_station()?;
        let _gate = self.gates.status.lock().await;
        self.bridge
            .call(
                completion::STATUS_OK,
                completion::STATUS_ERROR,
                EngineCommand::Status,
                Some(self.config.bridge_timeout),
            )
            .await?;
        let text = self.shared.take_status_buf().ok_or(WifiError::Bridge)?;
        Ok(ConnectionStatus::parse(&text))
    }

    /// Configure automatic reconnection. Enabling requires a live (or
    /// in-progress) association to remember.
    pub async fn set_reconnect_policy(
        &self,
        enable: bool,
        params: Option<ReconnectParams>,
    ) -> Result<(), WifiError> {
        if enable {
            params
                .as_ref()
                .ok_or(ConfigError::InvalidConfig("reconnect parameters missing"))?
                .validate()?;
        }
        self.require_station()?;
        let _gate = self.gates.policy.lock().await;
        self.bridge
            .call(
                completion::POLICY_OK,
                completion::POLICY_ERROR,
                EngineCommand::SetReconnectPolicy { enable, params },
                Some(self.config.bridge_timeout),
            )
            .await?;
        Ok(())
    }
}

impl Drop for DeviceManager {
    fn drop(&mut self) {
        self.cancel.cancel();
        // Wind the loop down; nothing waits for the confirmations.
        for task in self.control.running_tasks() {
            let _ = self.register.post(
                &self.command_slot,
                LoopMessage::Command(EngineCommand::Terminate(task)),
            );
        }
    }
}
