//! Scan-result text parsing.
//!
//! The engine answers a results query with one large text buffer: a header
//! line, then one line per beacon with tab-separated fields
//! `bssid <TAB> frequency <TAB> level <TAB> flags <TAB> ssid`. The parser
//! walks that buffer once, converts each field in place and keeps only the
//! records matching the active filter.
//!
//! Malformed trailing data is not an error: the first missing delimiter
//! ends parsing and whatever was accumulated so far is returned as a
//! successful result.

/// Longest SSID accepted anywhere in the crate, in bytes.
pub const MAX_SSID_LEN: usize = 32;

/// Hard cap on records returned by one results query.
pub const SCAN_RESULT_LIMIT: usize = 32;

/// Security mode advertised by a beacon, derived from the flags blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecurityKind {
    Open,
    Wep,
    WpaPsk,
    Wpa2Psk,
    /// Both WPA-PSK and WPA2-PSK advertised.
    WpaWpa2PskMix,
    WpaEap,
    Wpa2Eap,
    Sae,
    Unknown,
}

/// One parsed beacon. Produced fresh per query, never retained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanRecord {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub channel: u8,
    pub rssi: i32,
    pub security: SecurityKind,
    pub wps: bool,
}

/// Record filter, selected by the scan call that triggered the query. The
/// modes are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanFilter {
    Any,
    Ssid(String),
    SsidPrefix(String),
    Channel(u8),
    Bssid([u8; 6]),
}

impl ScanFilter {
    fn accepts(&self, record: &ScanRecord) -> bool {
        match self {
            Self::Any => true,
            Self::Ssid(ssid) => record.ssid == *ssid,
            Self::SsidPrefix(prefix) => record.ssid.starts_with(prefix.as_str()),
            Self::Channel(channel) => record.channel == *channel,
            Self::Bssid(bssid) => record.bssid == *bssid,
        }
    }
}

/// 2.4 GHz channel to center frequency in MHz.
pub fn channel_to_freq(channel: u8) -> Option<u32> {
    match channel {
        1..=13 => Some(2412 + 5 * (u32::from(channel) - 1)),
        14 => Some(2484),
        _ => None,
    }
}

/// Inverse of [`channel_to_freq`]; `None` for out-of-band frequencies.
pub fn freq_to_channel(freq: u32) -> Option<u8> {
    match freq {
        2484 => Some(14),
        2412..=2472 if (freq - 2412) % 5 == 0 => Some(((freq - 2412) / 5 + 1) as u8),
        _ => None,
    }
}

/// Parse `aa:bb:cc:dd:ee:ff` into raw bytes.
pub fn parse_mac(text: &str) -> Option<[u8; 6]> {
    let mut out = [0u8; 6];
    let mut parts = text.split(':');
    for byte in &mut out {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(out)
}

/// Format raw bytes as `aa:bb:cc:dd:ee:ff`.
pub fn format_mac(mac: &[u8; 6]) -> String {
    format!(
        "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}

/// Security mode from the capability-flags blob, e.g.
/// `[WPA2-PSK-CCMP][ESS]`. Mixed WPA/WPA2 PSK takes precedence over either
/// alone; `WPS` anywhere in the blob sets the second return value.
pub fn security_from_flags(flags: &str) -> (SecurityKind, bool) {
    let wps = flags.contains("WPS");
    let wpa_psk = flags.contains("WPA-PSK");
    let wpa2_psk = flags.contains("WPA2-PSK") || flags.contains("RSN-PSK");
    let kind = if flags.contains("SAE") {
        SecurityKind::Sae
    } else if wpa_psk && wpa2_psk {
        SecurityKind::WpaWpa2PskMix
    } else if wpa2_psk {
        SecurityKind::Wpa2Psk
    } else if wpa_psk {
        SecurityKind::WpaPsk
    } else if flags.contains("WPA2-EAP") {
        SecurityKind::Wpa2Eap
    } else if flags.contains("WPA-EAP") {
        SecurityKind::WpaEap
    } else if flags.contains("WEP") {
        SecurityKind::Wep
    } else if flags.contains("OPEN") || !flags.contains('[') || flags == "[ESS]" {
        SecurityKind::Open
    } else {
        SecurityKind::Unknown
    };
    (kind, wps)
}

/// Take the text up to the next `delim`, returning it and the rest of the
/// buffer. `None` when the delimiter is missing, which ends parsing.
fn take_field<'a>(buf: &'a str, delim: char) -> Option<(&'a str, &'a str)> {
    let at = buf.find(delim)?;
    Some((&buf[..at], &buf[at + 1..]))
}

/// Walk one results buffer and collect up to `limit` records passing
/// `filter`. A record failing field conversion (bad address, out-of-band
/// frequency, oversized name) is skipped; a missing delimiter anywhere
/// ends the walk with what was already collected.
pub fn parse_scan_results(buf: &str, filter: &ScanFilter, limit: usize) -> Vec<ScanRecord> {
    let limit = limit.min(SCAN_RESULT_LIMIT);
    let mut records = Vec::new();

    // First line is the column header.
    let Some((_, mut rest)) = take_field(buf, '\n') else {
        return records;
    };

    while !rest.is_empty() && records.len() < limit {
        let Some((bssid_text, after)) = take_field(rest, '\t') else {
            break;
        };
        let Some((freq_text, after)) = take_field(after, '\t') else {
            break;
        };
        let Some((level_text, after)) = take_field(after, '\t') else {
            break;
        };
        let Some((flags_text, after)) = take_field(after, '\t') else {
            break;
        };
        let Some((ssid_text, after)) = take_field(after, '\n') else {
            break;
        };
        rest = after;

        let Some(bssid) = parse_mac(bssid_text) else {
            continue;
        };
        let Some(channel) = freq_text
            .parse::<u32>()
            .ok()
            .and_then(freq_to_channel)
        else {
            continue;
        };
        let Ok(rssi) = level_text.parse::<i32>() else {
            continue;
        };
        if ssid_text.len() > MAX_SSID_LEN {
            continue;
        }
        let (security, wps) = security_from_flags(flags_text);

        let record = ScanRecord {
            ssid: ssid_text.to_owned(),
            bssid,
            channel,
            rssi,
            security,
            wps,
        };
        if filter.accepts(&record) {
            records.push(record);
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "bssid / frequency / signal level / flags / ssid\n";

    fn line(bssid: &str, freq: u32, level: i32, flags: &str, ssid: &str) -> String {
        format!("{bssid}\t{freq}\t{level}\t{flags}\t{ssid}\n")
    }

    fn buffer(lines: &[String]) -> String {
        let mut buf = HEADER.to_owned();
        for l in lines {
            buf.push_str(l);
        }
        buf
    }

    // ==================== Parser Tests ====================

    #[test]
    fn parses_well_formed_records() {
        let buf = buffer(&[
            line("00:11:22:33:44:55", 2412, -40, "[WPA2-PSK-CCMP][ESS]", "home"),
            line("66:77:88:99:aa:bb", 2484, -72, "[ESS]", "cafe"),
        ]);
        let records = parse_scan_results(&buf, &ScanFilter::Any, SCAN_RESULT_LIMIT);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ssid, "home");
        assert_eq!(records[0].channel, 1);
        assert_eq!(records[0].rssi, -40);
        assert_eq!(records[0].security, SecurityKind::Wpa2Psk);
        assert_eq!(records[1].channel, 14);
        assert_eq!(records[1].security, SecurityKind::Open);
    }

    #[test]
    fn malformed_trailing_data_truncates_without_error() {
        let mut buf = buffer(&[line(
            "00:11:22:33:44:55",
            2437,
            -50,
            "[WPA-PSK-TKIP]",
            "ok",
        )]);
        // Second record is cut off mid-way through its fields.
        buf.push_str("66:77:88:99:aa:bb\t2412");
        let records = parse_scan_results(&buf, &ScanFilter::Any, SCAN_RESULT_LIMIT);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ssid, "ok");
    }

    #[test]
    fn missing_header_yields_no_records() {
        let records = parse_scan_results("no newline at all", &ScanFilter::Any, 32);
        assert!(records.is_empty());
    }

    #[test]
    fn bad_fields_skip_the_record_only() {
        let buf = buffer(&[
            line("not-a-mac", 2412, -40, "[ESS]", "bad-addr"),
            line("00:11:22:33:44:55", 5180, -40, "[ESS]", "out-of-band"),
            line("00:11:22:33:44:55", 2412, -40, "[ESS]", "good"),
        ]);
        let records = parse_scan_results(&buf, &ScanFilter::Any, SCAN_RESULT_LIMIT);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ssid, "good");
    }

    #[test]
    fn output_is_capped_at_the_limit() {
        let lines: Vec<String> = (0..40)
            .map(|i| {
                line(
                    "00:11:22:33:44:55",
                    2412,
                    -40,
                    "[ESS]",
                    &format!("net{i}"),
                )
            })
            .collect();
        let buf = buffer(&lines);
        let records = parse_scan_results(&buf, &ScanFilter::Any, usize::MAX);
        assert_eq!(records.len(), SCAN_RESULT_LIMIT);
    }

    // ==================== Filter Tests ====================

    fn three_networks() -> String {
        buffer(&[
            line("00:11:22:33:44:55", 2412, -40, "[WPA2-PSK-CCMP]", "alpha"),
            line("66:77:88:99:aa:bb", 2437, -55, "[WPA2-PSK-CCMP]", "alphabet"),
            line("cc:dd:ee:ff:00:11", 2462, -70, "[ESS]", "beta"),
        ])
    }

    #[test]
    fn exact_ssid_filter_is_idempotent() {
        let buf = three_networks();
        let filter = ScanFilter::Ssid("alpha".to_owned());
        let first = parse_scan_results(&buf, &filter, 32);
        assert_eq!(first.len(), 1);
        assert!(first.iter().all(|r| r.ssid == "alpha"));
        let second = parse_scan_results(&buf, &filter, 32);
        assert_eq!(first, second);
    }

    #[test]
    fn prefix_filter_matches_both_alphas() {
        let buf = three_networks();
        let records =
            parse_scan_results(&buf, &ScanFilter::SsidPrefix("alpha".to_owned()), 32);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn channel_filter_selects_by_channel() {
        let buf = three_networks();
        let records = parse_scan_results(&buf, &ScanFilter::Channel(6), 32);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ssid, "alphabet");
    }

    #[test]
    fn bssid_filter_selects_by_address() {
        let buf = three_networks();
        let bssid = parse_mac("cc:dd:ee:ff:00:11").unwrap();
        let records = parse_scan_results(&buf, &ScanFilter::Bssid(bssid), 32);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].ssid, "beta");
    }

    // ==================== Security Flag Tests ====================

    #[test]
    fn mixed_psk_takes_precedence() {
        let (kind, wps) = security_from_flags("[WPA-PSK-TKIP][WPA2-PSK-CCMP][WPS][ESS]");
        assert_eq!(kind, SecurityKind::WpaWpa2PskMix);
        assert!(wps);
    }

    #[test]
    fn sae_wins_over_psk() {
        let (kind, _) = security_from_flags("[WPA2-PSK+SAE-CCMP][ESS]");
        assert_eq!(kind, SecurityKind::Sae);
    }

    #[test]
    fn recognizes_each_mode() {
        assert_eq!(security_from_flags("[WEP][ESS]").0, SecurityKind::Wep);
        assert_eq!(security_from_flags("[WPA-EAP-TKIP]").0, SecurityKind::WpaEap);
        assert_eq!(security_from_flags("[WPA2-EAP-CCMP]").0, SecurityKind::Wpa2Eap);
        assert_eq!(security_from_flags("[RSN-PSK-CCMP]").0, SecurityKind::Wpa2Psk);
        assert_eq!(security_from_flags("[ESS]").0, SecurityKind::Open);
        assert_eq!(security_from_flags("[FT/802.1X]").0, SecurityKind::Unknown);
    }

    // ==================== Address Helper Tests ====================

    #[test]
    fn mac_round_trip() {
        let mac = parse_mac("a0:b1:c2:d3:e4:f5").unwrap();
        assert_eq!(format_mac(&mac), "a0:b1:c2:d3:e4:f5");
    }

    #[test]
    fn rejects_malformed_macs() {
        assert!(parse_mac("a0:b1:c2:d3:e4").is_none());
        assert!(parse_mac("a0:b1:c2:d3:e4:f5:00").is_none());
        assert!(parse_mac("a0:b1:c2:d3:e4:zz").is_none());
        assert!(parse_mac("a0b1c2d3e4f5").is_none());
    }

    #[test]
    fn channel_frequency_mapping() {
        assert_eq!(channel_to_freq(1), Some(2412));
        assert_eq!(channel_to_freq(13), Some(2472));
        assert_eq!(channel_to_freq(14), Some(2484));
        assert_eq!(channel_to_freq(15), None);
        assert_eq!(freq_to_channel(2437), Some(6));
        assert_eq!(freq_to_channel(2484), Some(14));
        assert_eq!(freq_to_channel(5180), None);
    }
}
