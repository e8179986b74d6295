//! Extraction of authentication events from raw log bytes.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use tracing::debug;

/// A single authentication success observed in the log.
///
/// Produced and consumed within one pass, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthEvent {
    /// Normalized source address (IPv4-mapped IPv6 collapsed to IPv4).
    pub ip: IpAddr,
    /// When the authentication happened, from the log line if present.
    pub observed_at: DateTime<Utc>,
}

/// Result of scanning one batch of log bytes.
#[derive(Debug, Default)]
pub struct Extraction {
    /// Events in log line order.
    pub events: Vec<AuthEvent>,
    /// Lines that matched the marker but could not be parsed.
    pub malformed: usize,
}

/// Session payload embedded in an authentication-success line.
#[derive(Debug, Deserialize)]
struct SessionPayload {
    #[serde(rename = "requestIp", default)]
    request_ip: String,

    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

/// Scan log bytes for authentication-success lines.
///
/// Each line containing `marker` is expected to carry a JSON payload with a
/// `requestIp` field. Lines without the marker are ignored; marker lines that
/// fail to parse are counted and skipped, never fatal. `fallback_time` is
/// used as `observed_at` when the payload carries no timestamp.
pub fn extract(bytes: &[u8], marker: &str, fallback_time: DateTime<Utc>) -> Extraction {
    let text = String::from_utf8_lossy(bytes);
    let mut out = Extraction::default();

    for line in text.lines() {
        if !line.contains(marker) {
            continue;
        }

        match parse_marker_line(line, fallback_time) {
            Some(event) => out.events.push(event),
            None => {
                debug!(line, "skipping malformed authentication line");
                out.malformed += 1;
            }
        }
    }

    out
}

fn parse_marker_line(line: &str, fallback_time: DateTime<Utc>) -> Option<AuthEvent> {
    let start = line.find('{')?;
    let end = line.rfind('}')?;
    let payload: SessionPayload = serde_json::from_str(line.get(start..=end)?).ok()?;

    let ip = parse_request_ip(&payload.request_ip)?;

    Some(AuthEvent {
        ip,
        observed_at: payload.timestamp.unwrap_or(fallback_time),
    })
}

/// Parse a `requestIp` value: a bare address, `ip:port`, or `[v6]:port`.
fn parse_request_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if let Ok(ip) = value.parse::<IpAddr>() {
        return Some(normalize_ip(ip));
    }

    if let Ok(addr) = value.parse::<SocketAddr>() {
        return Some(normalize_ip(addr.ip()));
    }

    // Fall back to splitting a trailing :port off by hand.
    let (host, _port) = value.rsplit_once(':')?;
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .ok()
        .map(normalize_ip)
}

/// Collapse IPv4-mapped IPv6 addresses to their IPv4 form.
fn normalize_ip(ip: IpAddr) -> IpAddr {
    if let IpAddr::V6(v6) = ip {
        if let Some(v4) = v6.to_ipv4_mapped() {
            return IpAddr::V4(v4);
        }
    }
    ip
}
