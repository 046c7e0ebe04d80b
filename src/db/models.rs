//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::status::{AvailabilityMode, DeviceHealthRecord, Severity};

/// How the ping half of a reachability check is performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PingMethod {
    #[default]
    Icmp,
    Tcp,
}

impl PingMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            PingMethod::Icmp => "icmp",
            PingMethod::Tcp => "tcp",
        }
    }
}

impl fmt::Display for PingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PingMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "icmp" => Ok(PingMethod::Icmp),
            "tcp" => Ok(PingMethod::Tcp),
            other => Err(format!("unknown ping method: {}", other)),
        }
    }
}

/// A monitored device: probe settings plus its current health record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: i64,
    pub hostname: String,
    pub description: String,
    pub disabled: bool,
    pub availability_method: AvailabilityMode,
    pub ping_method: PingMethod,
    /// Port used by TCP ping.
    pub ping_port: u16,
    pub ping_timeout_ms: u64,
    pub ping_retries: u32,
    pub snmp_port: u16,
    pub snmp_timeout_ms: u64,
    pub health: DeviceHealthRecord,
}

impl Default for Device {
    fn default() -> Self {
        Self {
            id: 0,
            hostname: String::new(),
            description: String::new(),
            disabled: false,
            availability_method: AvailabilityMode::Ping,
            ping_method: PingMethod::Icmp,
            ping_port: 23,
            ping_timeout_ms: 400,
            ping_retries: 1,
            snmp_port: 161,
            snmp_timeout_ms: 500,
            health: DeviceHealthRecord::default(),
        }
    }
}

/// A status alert recorded against a device.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceEvent {
    pub id: i64,
    pub device_id: i64,
    pub time: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}
