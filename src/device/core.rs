//! Loop-side context: command routing, event handling, reconnect timers.
//!
//! [`EngineCore`] is the state owned by the engine loop task. Caller tasks
//! never touch it; they post [`LoopMessage`]s through the bridge or the
//! [`EngineMailbox`] and observe results through the completion group, the
//! shared reply buffers and the notification channel.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::bridge::{completion, stop_bit};
use super::table::InterfaceRole;
use crate::config::{ConnectConfig, ReconnectParams, ScanParams};
use crate::engine::{ControlReply, ControlRequest, Engine, EngineEvent};
use crate::eloop::{
    EventGroup, EventRegister, LoopContext, LoopControl, LoopTask, SlotHandle, TimerList,
};
use crate::reconnect::{ReconnectAction, ReconnectPolicy, GIVEUP_TIMER, RETRY_TIMER};

/// One decoded command for the loop. Commands are built by the manager at
/// the API boundary; nothing tagged or raw crosses into the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    AddInterface { name: String, role: InterfaceRole },
    RemoveInterface { name: String, role: InterfaceRole },
    Scan(ScanParams),
    ScanResults,
    Connect(ConnectConfig),
    Disconnect,
    Status,
    SetReconnectPolicy {
        enable: bool,
        params: Option<ReconnectParams>,
    },
    Terminate(LoopTask),
}

/// Everything that travels through the loop's event slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopMessage {
    Command(EngineCommand),
    Event(EngineEvent),
}

/// Notification delivered to subscribers, off the loop task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WifiEvent {
    Connected { ssid: String, bssid: [u8; 6] },
    Disconnected { bssid: [u8; 6], reason_code: u16 },
    ScanDone,
}

/// Reply buffers shared between the loop (writer) and callers (readers).
/// The scan buffer must be taken and released before the next results
/// query; the loop refuses to overwrite an unreleased buffer.
pub struct SharedReplies {
    scan_buf: Mutex<Option<String>>,
    status_buf: Mutex<Option<String>>,
}

impl SharedReplies {
    pub fn new() -> Self {
        Self {
            scan_buf: Mutex::new(None),
            status_buf: Mutex::new(None),
        }
    }

    fn lock_scan(&self) -> MutexGuard<'_, Option<String>> {
        self.scan_buf.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_status(&self) -> MutexGuard<'_, Option<String>> {
        self.status_buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn take_scan_buf(&self) -> Option<String> {
        self.lock_scan().take()
    }

    pub fn take_status_buf(&self) -> Option<String> {
        self.lock_status().take()
    }
}

impl Default for SharedReplies {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle the engine implementation uses to report asynchronous outcomes
/// (association results, scan completion) into the loop.
#[derive(Clone)]
pub struct EngineMailbox {
    register: Arc<EventRegister<EngineCore, LoopMessage>>,
    event_slot: SlotHandle,
}

impl EngineMailbox {
    pub(crate) fn new(
        register: Arc<EventRegister<EngineCore, LoopMessage>>,
        event_slot: SlotHandle,
    ) -> Self {
        Self {
            register,
            event_slot,
        }
    }

    pub fn post(&self, event: EngineEvent) {
        if self
            .register
            .post(&self.event_slot, LoopMessage::Event(event))
            .is_err()
        {
            warn!("engine event dropped, event slot gone");
        }
    }
}

/// State owned by the loop task.
pub struct EngineCore {
    engine: Box<dyn Engine>,
    timers: TimerList<EngineCore>,
    completion: Arc<EventGroup>,
    control: Arc<LoopControl>,
    shared: Arc<SharedReplies>,
    notifications: mpsc::UnboundedSender<WifiEvent>,
    reconnect: ReconnectPolicy,
    /// Interface attached during loop startup, before any command flows.
    initial: Option<(String, InterfaceRole)>,
    /// SSID of the connect attempt in flight, if any.
    associating: Option<String>,
    /// Live association, if any.
    associated: Option<(String, [u8; 6])>,
}

impl EngineCore {
    pub(crate) fn new(
        engine: Box<dyn Engine>,
        initial: (String, InterfaceRole),
        completion: Arc<EventGroup>,
        control: Arc<LoopControl>,
        shared: Arc<SharedReplies>,
        notifications: mpsc::UnboundedSender<WifiEvent>,
    ) -> Self {
        Self {
            engine,
            timers: TimerList::new(),
            completion,
            control,
            shared,
            notifications,
            reconnect: ReconnectPolicy::new(),
            initial: Some(initial),
            associating: None,
            associated: None,
        }
    }

    fn notify(&self, event: WifiEvent) {
        // The dispatcher side may already be gone during shutdown.
        let _ = self.notifications.send(event);
    }

    fn signal(&self, ok: bool, ok_bit: u32, err_bit: u32) {
        self.completion.signal(if ok { ok_bit } else { err_bit });
    }

    /// SSID the reconnect policy may remember right now.
    fn live_ssid(&self) -> Option<&str> {
        self.associated
            .as_ref()
            .map(|(ssid, _)| ssid.as_str())
            .or(self.associating.as_deref())
    }

    fn clear_station_state(&mut self) {
        self.reconnect.reset();
        self.timers.cancel(RETRY_TIMER);
        self.timers.cancel(GIVEUP_TIMER);
        self.associating = None;
        self.associated = None;
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::AddInterface { name, role } => {
                debug!("attaching interface {} ({})", name, role);
                let result = self.engine.attach_interface(&name, role);
                if let Err(err) = &result {
                    warn!("attach of {} failed: {}", name, err);
                }
                self.signal(
                    result.is_ok(),
                    completion::ADD_IFACE_OK,
                    completion::ADD_IFACE_ERROR,
                );
            }
            EngineCommand::RemoveInterface { name, role } => {
                debug!("detaching interface {} ({})", name, role);
                let result = self.engine.detach_interface(&name);
                if let Err(err) = &result {
                    warn!("detach of {} failed: {}", name, err);
                }
                if role == InterfaceRole::Station {
                    self.clear_station_state();
                }
                self.signal(
                    result.is_ok(),
                    completion::REMOVE_IFACE_OK,
                    completion::REMOVE_IFACE_ERROR,
                );
            }
            EngineCommand::Scan(params) => {
                // Success is signaled by the ScanDone event, not here.
                if let Err(err) = self.engine.control(ControlRequest::Scan(params)) {
                    warn!("scan request refused: {}", err);
                    self.completion.signal(completion::SCAN_ERROR);
                }
            }
            EngineCommand::ScanResults => {
                let ok = match self.engine.control(ControlRequest::ScanResults) {
                    Ok(ControlReply::Text(buf)) => {
                        let mut slot = self.shared.lock_scan();
                        if slot.is_some() {
                            warn!("previous scan results buffer was never released");
                            false
                        } else {
                            *slot = Some(buf);
                            true
                        }
                    }
                    Ok(ControlReply::Ok) => false,
                    Err(err) => {
                        warn!("scan results fetch failed: {}", err);
                        false
                    }
                };
                self.signal(
                    ok,
                    completion::SCAN_RESULTS_OK,
                    completion::SCAN_RESULTS_ERROR,
                );
            }
            EngineCommand::Connect(config) => {
                let ssid = config.ssid.clone();
                match self.engine.control(ControlRequest::Connect(config)) {
                    Ok(_) => {
                        // Outcome arrives as a Connected or Disconnected event.
                        self.associating = Some(ssid);
                    }
                    Err(err) => {
                        warn!("connect to \"{}\" refused: {}", ssid, err);
                        self.completion.signal(completion::CONNECT_ERROR);
                    }
                }
            }
            EngineCommand::Disconnect => {
                let result = self.engine.control(ControlRequest::Disconnect);
                self.associating = None;
                self.signal(
                    result.is_ok(),
                    completion::DISCONNECT_OK,
                    completion::DISCONNECT_ERROR,
                );
            }
            EngineCommand::Status => {
                let ok = match self.engine.control(ControlRequest::Status) {
                    Ok(ControlReply::Text(text)) => {
                        *self.shared.lock_status() = Some(text);
                        true
                    }
                    Ok(ControlReply::Ok) => false,
                    Err(err) => {
                        warn!("status query failed: {}", err);
                        false
                    }
                };
                self.signal(ok, completion::STATUS_OK, completion::STATUS_ERROR);
            }
            EngineCommand::SetReconnectPolicy { enable, params } => {
                let live = self.live_ssid().map(ToOwned::to_owned);
                let result = self.reconnect.configure(enable, params, live.as_deref());
                if let Err(err) = &result {
                    warn!("reconnect policy rejected: {}", err);
                }
                if !enable {
                    self.timers.cancel(RETRY_TIMER);
                    self.timers.cancel(GIVEUP_TIMER);
                }
                self.signal(result.is_ok(), completion::POLICY_OK, completion::POLICY_ERROR);
            }
            EngineCommand::Terminate(task) => {
                self.control.terminate(task);
            }
        }
    }

    fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Connected { ssid, bssid } => {
                info!("associated with \"{}\"", ssid);
                self.associating = None;
                self.associated = Some((ssid.clone(), bssid));
                self.timers.cancel(RETRY_TIMER);
                self.timers.cancel(GIVEUP_TIMER);
                self.reconnect.on_connected(&ssid);
                self.completion.signal(completion::CONNECT_OK);
                self.notify(WifiEvent::Connected { ssid, bssid });
            }
            EngineEvent::Disconnected { bssid, reason_code } => {
                info!("disassociated (reason {})", reason_code);
                if self.associating.take().is_some() {
                    self.completion.signal(completion::CONNECT_ERROR);
                }
                self.associated = None;
                self.notify(WifiEvent::Disconnected { bssid, reason_code });
                if let Some(delay) = self.reconnect.on_disconnect() {
                    // A repeated disconnect must not stack a second retry
                    // entry; one cancel on success has to clear everything.
                    if !self.timers.is_registered(RETRY_TIMER) {
                        debug!("arming reconnect retry in {:?}", delay);
                        self.timers.register(delay, RETRY_TIMER, retry_fired);
                    }
                }
            }
            EngineEvent::ScanDone => {
                self.completion.signal(completion::SCAN_OK);
                self.notify(WifiEvent::ScanDone);
            }
            EngineEvent::ScanFailed => {
                self.completion.signal(completion::SCAN_ERROR);
            }
        }
    }
}

/// Retry timer: start one reconnect attempt and arm its giving-up window.
fn retry_fired(core: &mut EngineCore) {
    let Some(window) = core.reconnect.on_retry_fired() else {
        return;
    };
    info!(
        "reconnect attempt to \"{}\"",
        core.reconnect.target().unwrap_or("?")
    );
    if let Err(err) = core.engine.control(ControlRequest::Reselect) {
        warn!("reselect failed: {}", err);
    }
    core.associating = core.reconnect.target().map(ToOwned::to_owned);
    core.timers.register(window, GIVEUP_TIMER, giveup_fired);
}

/// Giving-up timer: the attempt's window closed.
fn giveup_fired(core: &mut EngineCore) {
    let associated = core.associated.is_some();
    if !associated && core.reconnect.is_pending() {
        // Force the engine out of its half-done association.
        let _ = core.engine.control(ControlRequest::Disconnect);
        core.associating = None;
    }
    match core.reconnect.on_giveup_fired(associated) {
        ReconnectAction::Retry(period) => {
            core.timers.register(period, RETRY_TIMER, retry_fired);
        }
        ReconnectAction::GiveUp | ReconnectAction::None => {}
    }
}

/// Shared slot handler: both the command slot and the event slot carry
/// [`LoopMessage`]s and drain fully every iteration.
pub(crate) fn loop_slot_handler(core: &mut EngineCore, queue: &mut VecDeque<LoopMessage>) {
    while let Some(message) = queue.pop_front() {
        match message {
            LoopMessage::Command(command) => core.handle_command(command),
            LoopMessage::Event(event) => core.handle_event(event),
        }
    }
}

impl LoopContext for EngineCore {
    type Message = LoopMessage;

    fn timers_mut(&mut self) -> &mut TimerList<Self> {
        &mut self.timers
    }

    fn on_start(&mut self) -> bool {
        let Some((name, role)) = self.initial.take() else {
            self.completion.signal(completion::START_OK);
            return true;
        };
        match self.engine.attach_interface(&name, role) {
            Ok(()) => {
                info!("engine started on {} ({})", name, role);
                self.completion.signal(completion::START_OK);
                true
            }
            Err(err) => {
                warn!("engine startup on {} failed: {}", name, err);
                self.completion.signal(completion::START_ERROR);
                false
            }
        }
    }

    fn on_terminate(&mut self, task: LoopTask) {
        self.engine.shutdown(task);
        if task == LoopTask::Station {
            self.clear_station_state();
        }
        self.completion.signal(stop_bit(task));
    }
}
