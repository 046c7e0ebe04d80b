//! Device availability tracking.
//!
//! Turns noisy per-poll reachability results into a stable device status
//! with hysteresis, and keeps the rolling poll and response-time statistics.

mod sample;
mod tracker;

pub use sample::*;
pub use tracker::*;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Initial `min_time` for a device that has never answered a poll.
pub const DEFAULT_MIN_TIME: f64 = 9.99999;

/// Diagnostic used when SNMP is the only availability check but the device
/// has no SNMP credentials configured.
pub const SNMP_NOT_REQUIRED: &str = "Device does not require SNMP";

/// Stable status of a monitored device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    #[default]
    Unknown,
    Down,
    Recovering,
    Up,
}

impl HostStatus {
    /// Integer code used in the database.
    pub fn code(self) -> i64 {
        match self {
            HostStatus::Unknown => 0,
            HostStatus::Down => 1,
            HostStatus::Recovering => 2,
            HostStatus::Up => 3,
        }
    }

    /// Decode a stored status; unrecognized codes load as `Unknown`.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => HostStatus::Down,
            2 => HostStatus::Recovering,
            3 => HostStatus::Up,
            _ => HostStatus::Unknown,
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStatus::Unknown => write!(f, "unknown"),
            HostStatus::Down => write!(f, "down"),
            HostStatus::Recovering => write!(f, "recovering"),
            HostStatus::Up => write!(f, "up"),
        }
    }
}

/// Which reachability checks decide whether a device is up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AvailabilityMode {
    None,
    SnmpAndPing,
    Snmp,
    #[default]
    Ping,
    SnmpOrPing,
}

impl AvailabilityMode {
    pub fn code(self) -> i64 {
        match self {
            AvailabilityMode::None => 0,
            AvailabilityMode::SnmpAndPing => 1,
            AvailabilityMode::Snmp => 2,
            AvailabilityMode::Ping => 3,
            AvailabilityMode::SnmpOrPing => 4,
        }
    }

    pub fn from_code(code: i64) -> Self {
        match code {
            0 => AvailabilityMode::None,
            1 => AvailabilityMode::SnmpAndPing,
            2 => AvailabilityMode::Snmp,
            4 => AvailabilityMode::SnmpOrPing,
            _ => AvailabilityMode::Ping,
        }
    }

    /// Whether the ping check takes part in this mode.
    pub fn uses_ping(self) -> bool {
        matches!(
            self,
            AvailabilityMode::Ping | AvailabilityMode::SnmpAndPing | AvailabilityMode::SnmpOrPing
        )
    }

    /// Whether the SNMP check takes part in this mode.
    pub fn uses_snmp(self) -> bool {
        matches!(
            self,
            AvailabilityMode::Snmp | AvailabilityMode::SnmpAndPing | AvailabilityMode::SnmpOrPing
        )
    }
}

/// Poller log verbosity. Ordered from quietest to loudest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogVerbosity {
    None,
    #[default]
    Low,
    Medium,
    High,
    Debug,
}

impl LogVerbosity {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(LogVerbosity::None),
            2 => Some(LogVerbosity::Low),
            3 => Some(LogVerbosity::Medium),
            4 => Some(LogVerbosity::High),
            5 => Some(LogVerbosity::Debug),
            _ => None,
        }
    }
}

impl FromStr for LogVerbosity {
    type Err = String;

    /// Accepts either the level name or its numeric code (`1`..`5`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(code) = s.parse::<i64>() {
            return LogVerbosity::from_code(code)
                .ok_or_else(|| format!("log verbosity out of range: {}", code));
        }
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(LogVerbosity::None),
            "low" => Ok(LogVerbosity::Low),
            "medium" => Ok(LogVerbosity::Medium),
            "high" => Ok(LogVerbosity::High),
            "debug" => Ok(LogVerbosity::Debug),
            other => Err(format!("unknown log verbosity: {}", other)),
        }
    }
}

/// Up/down signal derived from one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    Up,
    Down,
}

/// Per-device status record, persisted after every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceHealthRecord {
    pub status: HostStatus,
    pub status_event_count: u32,
    /// `None` is the unset sentinel.
    pub status_fail_date: Option<DateTime<Utc>>,
    pub status_rec_date: Option<DateTime<Utc>>,
    pub status_last_error: String,
    pub total_polls: u64,
    pub failed_polls: u64,
    /// Percentage of successful polls.
    pub availability: f64,
    /// Response times in milliseconds.
    pub cur_time: f64,
    pub min_time: f64,
    pub max_time: f64,
    pub avg_time: f64,
    pub snmp_community: String,
    pub snmp_version: u8,
}

impl Default for DeviceHealthRecord {
    fn default() -> Self {
        Self {
            status: HostStatus::Unknown,
            status_event_count: 0,
            status_fail_date: None,
            status_rec_date: None,
            status_last_error: String::new(),
            total_polls: 0,
            failed_polls: 0,
            availability: 100.0,
            cur_time: 0.0,
            min_time: DEFAULT_MIN_TIME,
            max_time: 0.0,
            avg_time: 0.0,
            snmp_community: String::new(),
            snmp_version: 1,
        }
    }
}

impl DeviceHealthRecord {
    /// SNMP v1/v2c without a community string is never checked, so it does
    /// not count toward availability.
    pub fn snmp_applicable(&self) -> bool {
        !(self.snmp_community.is_empty() && self.snmp_version != 3)
    }
}

/// Raw outcome of one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    /// Ping response time in milliseconds, or a non-numeric marker.
    pub ping_status: String,
    pub ping_response: String,
    /// SNMP response time in milliseconds, or a non-numeric marker.
    pub snmp_status: String,
    pub snmp_response: String,
}

impl Default for ProbeResult {
    fn default() -> Self {
        Self {
            ping_status: UNKNOWN_SAMPLE.to_string(),
            ping_response: String::new(),
            snmp_status: UNKNOWN_SAMPLE.to_string(),
            snmp_response: String::new(),
        }
    }
}

/// Log severity of a [`StatusEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Error,
    Notice,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Notice => "NOTICE",
            Severity::Info => "INFO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ERROR" => Some(Severity::Error),
            "NOTICE" => Some(Severity::Notice),
            "INFO" => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which probe a diagnostic line describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeChannel {
    Ping,
    Snmp,
}

/// Something the tracker wants logged or alerted.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// The failure threshold was reached.
    DeviceDown { device_id: i64, last_error: String },
    /// The recovery threshold was reached.
    DeviceRecovered { device_id: i64 },
    /// Raw probe response, only produced at high verbosity.
    Diagnostic {
        device_id: i64,
        channel: ProbeChannel,
        response: String,
    },
}

impl StatusEvent {
    pub fn severity(&self) -> Severity {
        match self {
            StatusEvent::DeviceDown { .. } => Severity::Error,
            StatusEvent::DeviceRecovered { .. } => Severity::Notice,
            StatusEvent::Diagnostic { .. } => Severity::Info,
        }
    }

    /// Status transitions are alerts; diagnostics are not.
    pub fn is_alert(&self) -> bool {
        !matches!(self, StatusEvent::Diagnostic { .. })
    }

    pub fn device_id(&self) -> i64 {
        match self {
            StatusEvent::DeviceDown { device_id, .. }
            | StatusEvent::DeviceRecovered { device_id }
            | StatusEvent::Diagnostic { device_id, .. } => *device_id,
        }
    }

    pub fn message(&self) -> String {
        match self {
            StatusEvent::DeviceDown {
                device_id,
                last_error,
            } => format!(
                "Device[{}] ERROR: HOST EVENT: Device is DOWN Message: {}",
                device_id, last_error
            ),
            StatusEvent::DeviceRecovered { device_id } => format!(
                "Device[{}] NOTICE: HOST EVENT: Device Returned FROM DOWN State",
                device_id
            ),
            StatusEvent::Diagnostic {
                device_id,
                channel,
                response,
            } => {
                let tag = match channel {
                    ProbeChannel::Ping => "PING",
                    ProbeChannel::Snmp => "SNMP",
                };
                format!("Device[{}] {}: {}", device_id, tag, response)
            }
        }
    }
}
