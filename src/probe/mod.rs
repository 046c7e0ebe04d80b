//! Reachability probes.
//!
//! Supports ICMP and TCP ping plus an SNMP uptime query, and turns their
//! outcome into the observation and raw sample fed to the status tracker.

mod ping;
mod snmp;
mod tcp;

pub use ping::*;
pub use snmp::*;
pub use tcp::*;

use std::time::Duration;
use thiserror::Error;

use crate::db::{Device, PingMethod};
use crate::status::{
    strip_quotes, validate_result, AvailabilityMode, Observation, ProbeResult, SNMP_NOT_REQUIRED,
};

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("command failed: {0}")]
    Command(String),
    #[error("malformed response: {0}")]
    Protocol(String),
}

/// Combine individual check results into an up/down observation.
///
/// SNMP that does not apply to the device (v1/v2c with no community) is
/// treated as passing.
pub fn observe(
    mode: AvailabilityMode,
    ping_ok: bool,
    snmp_ok: bool,
    snmp_applicable: bool,
) -> Observation {
    let snmp_ok = snmp_ok || !snmp_applicable;
    let up = match mode {
        AvailabilityMode::None => true,
        AvailabilityMode::Ping => ping_ok,
        AvailabilityMode::Snmp => snmp_ok,
        AvailabilityMode::SnmpAndPing => ping_ok && snmp_ok,
        AvailabilityMode::SnmpOrPing => ping_ok || snmp_ok,
    };
    if up {
        Observation::Up
    } else {
        Observation::Down
    }
}

/// Run every check the device's availability mode calls for.
pub async fn probe_device(device: &Device) -> (Observation, ProbeResult) {
    let mode = device.availability_method;
    let snmp_applicable = device.health.snmp_applicable();
    let mut result = ProbeResult::default();

    let ping_ok = if mode.uses_ping() {
        let outcome = ping_device(device).await;
        let ok = outcome.is_ok();
        (result.ping_status, result.ping_response) = describe(device.ping_method.label(), outcome);
        ok
    } else {
        result.ping_response = "Device does not require ping".to_string();
        false
    };

    let snmp_ok = if mode.uses_snmp() && snmp_applicable {
        let outcome = snmp_device(device).await;
        let ok = outcome.is_ok();
        (result.snmp_status, result.snmp_response) = describe("SNMP", outcome);
        ok
    } else {
        result.snmp_response = SNMP_NOT_REQUIRED.to_string();
        false
    };

    (observe(mode, ping_ok, snmp_ok, snmp_applicable), result)
}

/// Ping a device, retrying up to `ping_retries` attempts in total.
async fn ping_device(device: &Device) -> Result<f64, ProbeError> {
    let timeout = Duration::from_millis(device.ping_timeout_ms.max(1));
    let attempts = device.ping_retries.max(1);

    let mut last_err = ProbeError::Timeout(timeout);
    for attempt in 1..=attempts {
        let result = match device.ping_method {
            PingMethod::Icmp => run_ping_probe(&device.hostname, timeout).await,
            PingMethod::Tcp => run_tcp_probe(&device.hostname, device.ping_port, timeout).await,
        };
        match result {
            Ok(ms) => return Ok(ms),
            Err(e) => {
                tracing::debug!(
                    "{} attempt {}/{} for {} failed: {}",
                    device.ping_method.label(),
                    attempt,
                    attempts,
                    device.hostname,
                    e
                );
                last_err = e;
            }
        }
    }
    Err(last_err)
}

async fn snmp_device(device: &Device) -> Result<f64, ProbeError> {
    let target = SnmpTarget {
        host: device.hostname.clone(),
        port: device.snmp_port,
        community: device.health.snmp_community.clone(),
        version: device.health.snmp_version,
        timeout: Duration::from_millis(device.snmp_timeout_ms.max(1)),
    };
    let reply = run_snmp_probe(&target).await?;
    tracing::debug!(
        "SNMP agent {} answered: error status {}, uptime {:?} ticks",
        target.host,
        reply.pdu.error_status,
        reply.pdu.uptime_ticks
    );
    Ok(reply.latency_ms)
}

/// Sample text and diagnostic for one probe outcome.
fn describe(label: &str, outcome: Result<f64, ProbeError>) -> (String, String) {
    match outcome {
        Ok(ms) => (
            clean_sample(&format!("{:.3}", ms)),
            format!("{} Ping Success ({:.3} ms)", label, ms),
        ),
        Err(ProbeError::Timeout(_)) => (clean_sample("down"), format!("{} ping Timed out", label)),
        Err(e) => (clean_sample("down"), format!("{} ping failed: {}", label, e)),
    }
}

/// Normalize a raw sample; anything non-numeric becomes the unknown marker.
pub fn clean_sample(raw: &str) -> String {
    let mut sample = strip_quotes(raw);
    validate_result(&mut sample);
    sample
}

impl PingMethod {
    /// Name used in probe diagnostics.
    pub fn label(self) -> &'static str {
        match self {
            PingMethod::Icmp => "ICMP",
            PingMethod::Tcp => "TCP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observe_single_checks() {
        assert_eq!(observe(AvailabilityMode::None, false, false, true), Observation::Up);
        assert_eq!(observe(AvailabilityMode::Ping, true, false, true), Observation::Up);
        assert_eq!(observe(AvailabilityMode::Ping, false, true, true), Observation::Down);
        assert_eq!(observe(AvailabilityMode::Snmp, false, true, true), Observation::Up);
        assert_eq!(observe(AvailabilityMode::Snmp, true, false, true), Observation::Down);
        assert_eq!(observe(AvailabilityMode::Snmp, false, false, false), Observation::Up);
    }

    #[test]
    fn test_observe_combined_checks() {
        use AvailabilityMode::{SnmpAndPing, SnmpOrPing};

        assert_eq!(observe(SnmpAndPing, true, true, true), Observation::Up);
        assert_eq!(observe(SnmpAndPing, true, false, true), Observation::Down);
        assert_eq!(observe(SnmpAndPing, false, true, true), Observation::Down);
        assert_eq!(observe(SnmpAndPing, true, false, false), Observation::Up);

        assert_eq!(observe(SnmpOrPing, false, true, true), Observation::Up);
        assert_eq!(observe(SnmpOrPing, true, false, true), Observation::Up);
        assert_eq!(observe(SnmpOrPing, false, false, true), Observation::Down);
        assert_eq!(observe(SnmpOrPing, false, false, false), Observation::Up);
    }

    #[test]
    fn test_describe_outcomes() {
        let (status, response) = describe("ICMP", Ok(12.3456));
        assert_eq!(status, "12.346");
        assert_eq!(response, "ICMP Ping Success (12.346 ms)");

        let (status, response) = describe("TCP", Err(ProbeError::Timeout(Duration::from_millis(400))));
        assert_eq!(status, "U");
        assert_eq!(response, "TCP ping Timed out");

        let (status, response) = describe("SNMP", Err(ProbeError::Network("refused".to_string())));
        assert_eq!(status, "U");
        assert_eq!(response, "SNMP ping failed: network error: refused");
    }

    #[test]
    fn test_clean_sample() {
        assert_eq!(clean_sample("'4.200'"), "4.200");
        assert_eq!(clean_sample("7 ms"), "7");
        assert_eq!(clean_sample("timeout"), "U");
    }

    #[test]
    fn test_probe_device_without_checks() {
        let device = Device {
            hostname: "192.0.2.1".to_string(),
            availability_method: AvailabilityMode::None,
            ..Default::default()
        };
        let (observed, result) = tokio_test::block_on(probe_device(&device));
        assert_eq!(observed, Observation::Up);
        assert_eq!(result.ping_status, "U");
        assert_eq!(result.snmp_response, SNMP_NOT_REQUIRED);
    }
}
