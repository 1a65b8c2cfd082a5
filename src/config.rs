//! Validated caller-facing parameter structs.
//!
//! Every public operation takes one of these and calls `validate()` before
//! touching the engine, so precondition failures are reported synchronously
//! and never reach the loop.

use std::time::Duration;

use crate::scan::{ScanFilter, MAX_SSID_LEN, SCAN_RESULT_LIMIT};

/// Shortest WPA passphrase accepted, in characters.
pub const MIN_PSK_LEN: usize = 8;
/// Longest WPA passphrase accepted, in characters. A 64-character value is
/// treated as a raw hex PSK instead.
pub const MAX_PSK_LEN: usize = 63;
/// Length of a raw pre-shared key in hex digits.
pub const PSK_HEX_LEN: usize = 64;

/// Validation errors for caller-supplied parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    InvalidConfig(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidConfig(reason) => write!(f, "invalid config: {}", reason),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Authentication mode requested for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthKind {
    Open,
    Wpa2Psk,
    WpaWpa2PskMix,
    Sae,
}

impl AuthKind {
    fn takes_key(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Target network for a connect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectConfig {
    pub ssid: String,
    /// Pin the connection to one beacon; `None` lets the engine pick.
    pub bssid: Option<[u8; 6]>,
    pub auth: AuthKind,
    /// Passphrase or 64-digit hex PSK; empty for open networks.
    pub key: String,
}

impl ConnectConfig {
    pub fn open(ssid: &str) -> Self {
        Self {
            ssid: ssid.to_owned(),
            bssid: None,
            auth: AuthKind::Open,
            key: String::new(),
        }
    }

    pub fn psk(ssid: &str, key: &str) -> Self {
        Self {
            ssid: ssid.to_owned(),
            bssid: None,
            auth: AuthKind::Wpa2Psk,
            key: key.to_owned(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ssid.is_empty() {
            return Err(ConfigError::InvalidConfig("ssid is empty"));
        }
        if self.ssid.len() > MAX_SSID_LEN {
            return Err(ConfigError::InvalidConfig("ssid too long"));
        }
        if self.auth.takes_key() {
            if self.key.len() == PSK_HEX_LEN {
                if !self.key.chars().all(|c| c.is_ascii_hexdigit()) {
                    return Err(ConfigError::InvalidConfig("psk is not valid hex"));
                }
            } else if self.key.len() < MIN_PSK_LEN || self.key.len() > MAX_PSK_LEN {
                return Err(ConfigError::InvalidConfig("passphrase length out of range"));
            }
        } else if !self.key.is_empty() {
            return Err(ConfigError::InvalidConfig("open network takes no key"));
        }
        Ok(())
    }
}

/// What to scan for. Modes are mutually exclusive; the chosen mode also
/// becomes the filter applied when results are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanParams {
    Basic,
    Channel(u8),
    Ssid(String),
    SsidPrefix(String),
    Bssid([u8; 6]),
}

impl ScanParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Basic | Self::Bssid(_) => Ok(()),
            Self::Channel(channel) => {
                if (1..=14).contains(channel) {
                    Ok(())
                } else {
                    Err(ConfigError::InvalidConfig("channel out of range"))
                }
            }
            Self::Ssid(ssid) | Self::SsidPrefix(ssid) => {
                if ssid.is_empty() {
                    Err(ConfigError::InvalidConfig("ssid is empty"))
                } else if ssid.len() > MAX_SSID_LEN {
                    Err(ConfigError::InvalidConfig("ssid too long"))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// The result filter implied by this scan request.
    pub fn filter(&self) -> ScanFilter {
        match self {
            Self::Basic => ScanFilter::Any,
            Self::Channel(channel) => ScanFilter::Channel(*channel),
            Self::Ssid(ssid) => ScanFilter::Ssid(ssid.clone()),
            Self::SsidPrefix(prefix) => ScanFilter::SsidPrefix(prefix.clone()),
            Self::Bssid(bssid) => ScanFilter::Bssid(*bssid),
        }
    }
}

/// Reconnect policy knobs, all in seconds except the try count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectParams {
    /// Giving-up window for one reconnect attempt.
    pub timeout_s: u16,
    /// Delay between attempts.
    pub period_s: u16,
    /// Attempts before the policy disables itself.
    pub max_tries: u16,
}

impl ReconnectParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_s < 2 {
            return Err(ConfigError::InvalidConfig("reconnect timeout below 2s"));
        }
        if self.period_s < 1 {
            return Err(ConfigError::InvalidConfig("reconnect period below 1s"));
        }
        if self.max_tries < 1 {
            return Err(ConfigError::InvalidConfig("reconnect max tries below 1"));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(u64::from(self.timeout_s))
    }

    pub fn period(&self) -> Duration {
        Duration::from_secs(u64::from(self.period_s))
    }
}

/// Tunables for one device manager instance.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Deadline for bounded bridged calls (scan, connect, status, policy).
    pub bridge_timeout: Duration,
    /// Upper bound on records returned by one results query.
    pub scan_limit: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            bridge_timeout: Duration::from_secs(5),
            scan_limit: SCAN_RESULT_LIMIT,
        }
    }
}

impl ManagerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bridge_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig("bridge timeout is zero"));
        }
        if self.scan_limit == 0 || self.scan_limit > SCAN_RESULT_LIMIT {
            return Err(ConfigError::InvalidConfig("scan limit out of range"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== ConnectConfig Tests ====================

    #[test]
    fn accepts_valid_psk_config() {
        assert!(ConnectConfig::psk("home", "hunter22").validate().is_ok());
    }

    #[test]
    fn accepts_hex_psk() {
        let config = ConnectConfig::psk("home", &"ab".repeat(32));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_bad_ssids() {
        assert!(ConnectConfig::open("").validate().is_err());
        assert!(ConnectConfig::open(&"x".repeat(33)).validate().is_err());
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(ConnectConfig::psk("home", "short").validate().is_err());
        assert!(ConnectConfig::psk("home", &"x".repeat(64)).validate().is_err());
        let mut open = ConnectConfig::open("home");
        open.key = "surplus".to_owned();
        assert!(open.validate().is_err());
    }

    // ==================== ScanParams Tests ====================

    #[test]
    fn channel_bounds_enforced() {
        assert!(ScanParams::Channel(1).validate().is_ok());
        assert!(ScanParams::Channel(14).validate().is_ok());
        assert!(ScanParams::Channel(0).validate().is_err());
        assert!(ScanParams::Channel(15).validate().is_err());
    }

    #[test]
    fn scan_params_map_to_filters() {
        assert_eq!(ScanParams::Basic.filter(), ScanFilter::Any);
        assert_eq!(
            ScanParams::Ssid("a".to_owned()).filter(),
            ScanFilter::Ssid("a".to_owned())
        );
        assert_eq!(ScanParams::Channel(6).filter(), ScanFilter::Channel(6));
    }

    // ==================== ReconnectParams Tests ====================

    #[test]
    fn reconnect_bounds_enforced() {
        let ok = ReconnectParams {
            timeout_s: 2,
            period_s: 1,
            max_tries: 1,
        };
        assert!(ok.validate().is_ok());
        assert!(ReconnectParams { timeout_s: 1, ..ok }.validate().is_err());
        assert!(ReconnectParams { period_s: 0, ..ok }.validate().is_err());
        assert!(ReconnectParams { max_tries: 0, ..ok }.validate().is_err());
    }

    // ==================== ManagerConfig Tests ====================

    #[test]
    fn manager_config_defaults_validate() {
        assert!(ManagerConfig::default().validate().is_ok());
    }

    #[test]
    fn manager_config_rejects_oversized_scan_limit() {
        let config = ManagerConfig {
            scan_limit: SCAN_RESULT_LIMIT + 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
