//! Reconnect policy for the station role.
//!
//! A pure state machine; the engine loop maps the returned actions onto
//! its timer list and engine calls, so the policy itself is testable
//! without any async machinery.
//!
//! States: disabled -> armed (enabled, network remembered) -> pending (one
//! attempt in flight, giving-up timer armed). Exhausting `max_tries`
//! disables the policy and forgets the network; a successful association
//! re-arms it and resets the try count.

use std::time::Duration;

use log::{debug, info};

use crate::config::ReconnectParams;
use crate::eloop::TimerKey;

const RECONNECT_OWNER: u32 = 1;

/// Timer identity for the delayed retry attempt.
pub const RETRY_TIMER: TimerKey = TimerKey::new(RECONNECT_OWNER, 0);
/// Timer identity for the giving-up window of one attempt.
pub const GIVEUP_TIMER: TimerKey = TimerKey::new(RECONNECT_OWNER, 1);

/// Errors from policy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    /// Enabling requires a currently associated or associating station.
    NotAssociated,
    /// Enabling requires parameters.
    MissingParams,
}

impl std::fmt::Display for PolicyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAssociated => write!(f, "no association to remember"),
            Self::MissingParams => write!(f, "reconnect parameters missing"),
        }
    }
}

impl std::error::Error for PolicyError {}

/// What the loop should do after a giving-up timer fired.
#[derive(Debug, PartialEq, Eq)]
pub enum ReconnectAction {
    /// Nothing to do (association succeeded meanwhile).
    None,
    /// Arm the retry timer for this long.
    Retry(Duration),
    /// Attempt budget exhausted; the policy disabled itself.
    GiveUp,
}

/// Single per-station policy instance. Reset on disable and on interface
/// stop.
pub struct ReconnectPolicy {
    params: Option<ReconnectParams>,
    target: Option<String>,
    try_count: u16,
    pending: bool,
}

impl ReconnectPolicy {
    pub fn new() -> Self {
        Self {
            params: None,
            target: None,
            try_count: 0,
            pending: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.params.is_some() && self.target.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Enable with `params`, remembering `live_ssid` (the network currently
    /// associated or being associated), or disable and forget everything.
    pub fn configure(
        &mut self,
        enable: bool,
        params: Option<ReconnectParams>,
        live_ssid: Option<&str>,
    ) -> Result<(), PolicyError> {
        if !enable {
            self.reset();
            return Ok(());
        }
        let params = params.ok_or(PolicyError::MissingParams)?;
        let ssid = live_ssid.ok_or(PolicyError::NotAssociated)?;
        info!("reconnect policy armed for \"{}\"", ssid);
        self.params = Some(params);
        self.target = Some(ssid.to_owned());
        self.try_count = 0;
        self.pending = false;
        Ok(())
    }

    /// Forget everything; back to disabled.
    pub fn reset(&mut self) {
        if self.params.is_some() {
            debug!("reconnect policy reset");
        }
        self.params = None;
        self.target = None;
        self.try_count = 0;
        self.pending = false;
    }

    /// Association succeeded. Clears the attempt bookkeeping; the caller
    /// cancels any armed timers. Updates the remembered network while the
    /// policy is enabled.
    pub fn on_connected(&mut self, ssid: &str) {
        self.try_count = 0;
        self.pending = false;
        if self.params.is_some() {
            self.target = Some(ssid.to_owned());
        }
    }

    /// Link lost. Returns the delay after which a retry should fire, or
    /// `None` when the policy is not eligible (disabled, no remembered
    /// network, or an attempt already pending).
    pub fn on_disconnect(&mut self) -> Option<Duration> {
        let params = self.params.as_ref()?;
        if self.pending || self.target.is_none() {
            return None;
        }
        Some(params.period())
    }

    /// Retry timer fired: one attempt starts now. Returns the giving-up
    /// window to arm, or `None` when the policy was disabled meanwhile.
    pub fn on_retry_fired(&mut self) -> Option<Duration> {
        let params = self.params.as_ref()?;
        self.target.as_ref()?;
        self.pending = true;
        Some(params.timeout())
    }

    /// Giving-up timer fired. `associated` tells whether the attempt
    /// succeeded in the meantime.
    pub fn on_giveup_fired(&mut self, associated: bool) -> ReconnectAction {
        self.pending = false;
        if associated {
            self.try_count = 0;
            return ReconnectAction::None;
        }
        let Some(params) = self.params.as_ref() else {
            return ReconnectAction::None;
        };
        self.try_count = self.try_count.saturating_add(1);
        if self.try_count >= params.max_tries {
            info!(
                "reconnect abandoned after {} attempt(s), forgetting network",
                self.try_count
            );
            self.reset();
            ReconnectAction::GiveUp
        } else {
            ReconnectAction::Retry(params.period())
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_tries: u16) -> ReconnectParams {
        ReconnectParams {
            timeout_s: 2,
            period_s: 1,
            max_tries,
        }
    }

    fn armed(max_tries: u16) -> ReconnectPolicy {
        let mut policy = ReconnectPolicy::new();
        policy
            .configure(true, Some(params(max_tries)), Some("home"))
            .unwrap();
        policy
    }

    // ==================== Configuration Tests ====================

    #[test]
    fn enable_requires_live_association() {
        let mut policy = ReconnectPolicy::new();
        assert_eq!(
            policy.configure(true, Some(params(3)), None),
            Err(PolicyError::NotAssociated)
        );
        assert!(!policy.is_enabled());
    }

    #[test]
    fn disable_forgets_the_network() {
        let mut policy = armed(3);
        policy.configure(false, None, None).unwrap();
        assert!(!policy.is_enabled());
        assert!(policy.target().is_none());
    }

    // ==================== Cycle Tests ====================

    #[test]
    fn disconnect_arms_retry_once() {
        let mut policy = armed(3);
        let delay = policy.on_disconnect().unwrap();
        assert_eq!(delay, Duration::from_secs(1));
        // An attempt in flight suppresses further arming.
        policy.on_retry_fired().unwrap();
        assert!(policy.on_disconnect().is_none());
    }

    #[test]
    fn three_failures_disable_and_forget() {
        let mut policy = armed(3);
        for attempt in 1..=3u16 {
            let window = policy.on_retry_fired().unwrap();
            assert_eq!(window, Duration::from_secs(2));
            let action = policy.on_giveup_fired(false);
            if attempt < 3 {
                assert_eq!(action, ReconnectAction::Retry(Duration::from_secs(1)));
            } else {
                assert_eq!(action, ReconnectAction::GiveUp);
            }
        }
        assert!(!policy.is_enabled());
        assert!(policy.target().is_none());
    }

    #[test]
    fn success_during_attempt_clears_try_count() {
        let mut policy = armed(2);
        policy.on_retry_fired().unwrap();
        assert_eq!(policy.on_giveup_fired(false), ReconnectAction::Retry(Duration::from_secs(1)));
        // Second attempt succeeds before the window closes.
        policy.on_retry_fired().unwrap();
        policy.on_connected("home");
        assert!(!policy.is_pending());
        assert_eq!(policy.on_giveup_fired(true), ReconnectAction::None);
        assert!(policy.is_enabled());
    }

    #[test]
    fn connected_updates_remembered_network_when_enabled() {
        let mut policy = armed(3);
        policy.on_connected("office");
        assert_eq!(policy.target(), Some("office"));

        let mut disabled = ReconnectPolicy::new();
        disabled.on_connected("office");
        assert!(disabled.target().is_none());
    }
}
