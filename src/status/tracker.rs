//! Hysteresis state machine for device status.

use chrono::{DateTime, Utc};

use super::sample::sample_or_zero;
use super::{
    AvailabilityMode, DeviceHealthRecord, HostStatus, LogVerbosity, Observation, ProbeChannel,
    ProbeResult, StatusEvent, SNMP_NOT_REQUIRED,
};

/// Thresholds and verbosity for the tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    /// Consecutive failed polls before an Up device is declared Down.
    pub ping_failure_count: u32,
    /// Consecutive good polls before a Recovering device is declared Up.
    pub ping_recovery_count: u32,
    pub log_verbosity: LogVerbosity,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            ping_failure_count: 2,
            ping_recovery_count: 3,
            log_verbosity: LogVerbosity::Low,
        }
    }
}

/// Per-call context for one device poll.
#[derive(Debug, Clone)]
pub struct PollContext {
    pub device_id: i64,
    pub availability: AvailabilityMode,
    /// Timestamp recorded as the fail or recovery date.
    pub now: DateTime<Utc>,
}

/// Result of a tracker update.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusUpdate {
    pub record: DeviceHealthRecord,
    /// Diagnostics first, then at most one alert.
    pub events: Vec<StatusEvent>,
}

impl StatusUpdate {
    /// The status alert raised by this update, if any.
    pub fn alert(&self) -> Option<&StatusEvent> {
        self.events.iter().find(|e| e.is_alert())
    }
}

/// Converts per-poll observations into a stable device status.
///
/// The tracker owns no device state. Callers hand in the current record and
/// get back the next one; persisting it is up to them.
#[derive(Debug, Clone, Default)]
pub struct HostHealthTracker {
    config: TrackerConfig,
}

impl HostHealthTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Apply one poll result to a device record.
    pub fn update(
        &self,
        observed: Observation,
        record: &DeviceHealthRecord,
        probe: &ProbeResult,
        ctx: &PollContext,
    ) -> StatusUpdate {
        let mut next = record.clone();

        let raised = match observed {
            Observation::Down => self.record_failure(&mut next, probe, ctx),
            Observation::Up => self.record_success(&mut next, probe, ctx),
        };

        let mut events = Vec::new();
        if self.config.log_verbosity >= LogVerbosity::High {
            events.extend(diagnostics(&next, probe, ctx));
        }

        if raised {
            let event = if next.status == HostStatus::Down {
                StatusEvent::DeviceDown {
                    device_id: ctx.device_id,
                    last_error: next.status_last_error.clone(),
                }
            } else {
                StatusEvent::DeviceRecovered {
                    device_id: ctx.device_id,
                }
            };
            events.push(event);
        }

        StatusUpdate {
            record: next,
            events,
        }
    }

    /// Down path. Returns true when the device crossed into Down.
    fn record_failure(
        &self,
        rec: &mut DeviceHealthRecord,
        probe: &ProbeResult,
        ctx: &PollContext,
    ) -> bool {
        rec.failed_polls += 1;
        rec.total_polls += 1;
        recompute_availability(rec);

        rec.status_last_error = failure_message(rec, probe, ctx.availability);

        let threshold = self.config.ping_failure_count;
        match rec.status {
            HostStatus::Up => {
                rec.status_event_count = rec.status_event_count.saturating_add(1);
                if rec.status_event_count >= threshold {
                    rec.status = HostStatus::Down;
                    if threshold == 1 {
                        rec.status_fail_date = Some(ctx.now);
                    }
                    // counting restarts once Down is confirmed
                    rec.status_event_count = 0;
                    return true;
                }
                if rec.status_event_count == 1 {
                    rec.status_fail_date = Some(ctx.now);
                }
                false
            }
            // recovery was never confirmed, so no event
            HostStatus::Recovering => {
                rec.status = HostStatus::Down;
                rec.status_event_count = 1;
                false
            }
            HostStatus::Unknown => {
                rec.status = HostStatus::Down;
                rec.status_event_count = 0;
                false
            }
            HostStatus::Down => {
                rec.status_event_count = rec.status_event_count.saturating_add(1);
                false
            }
        }
    }

    /// Up path. Returns true when the device crossed back into Up.
    fn record_success(
        &self,
        rec: &mut DeviceHealthRecord,
        probe: &ProbeResult,
        ctx: &PollContext,
    ) -> bool {
        rec.total_polls += 1;
        recompute_availability(rec);

        let ping_time = response_time(rec, probe, ctx.availability);
        rec.cur_time = ping_time;
        if ping_time > rec.max_time {
            rec.max_time = ping_time;
        }
        if ping_time < rec.min_time {
            rec.min_time = ping_time;
        }
        update_average(rec, ping_time);

        let threshold = self.config.ping_recovery_count;
        match rec.status {
            HostStatus::Down | HostStatus::Recovering => {
                if rec.status == HostStatus::Down {
                    rec.status = HostStatus::Recovering;
                    rec.status_event_count = 1;
                } else {
                    rec.status_event_count = rec.status_event_count.saturating_add(1);
                }

                if rec.status_event_count >= threshold {
                    rec.status = HostStatus::Up;
                    if threshold == 1 {
                        rec.status_rec_date = Some(ctx.now);
                    }
                    rec.status_event_count = 0;
                    return true;
                }
                if rec.status_event_count == 1 {
                    rec.status_rec_date = Some(ctx.now);
                }
                false
            }
            // a good poll also clears any partial failure count
            HostStatus::Unknown | HostStatus::Up => {
                rec.status = HostStatus::Up;
                rec.status_event_count = 0;
                false
            }
        }
    }
}

/// Percentage of successful polls. Left untouched if nothing was polled yet.
fn recompute_availability(rec: &mut DeviceHealthRecord) {
    debug_assert!(rec.total_polls > 0, "availability computed with zero polls");
    if rec.total_polls == 0 {
        return;
    }
    let good = rec.total_polls.saturating_sub(rec.failed_polls);
    rec.availability = 100.0 * good as f64 / rec.total_polls as f64;
}

/// Incremental mean over successful polls only.
fn update_average(rec: &mut DeviceHealthRecord, ping_time: f64) {
    let good = rec.total_polls.saturating_sub(rec.failed_polls);
    debug_assert!(good > 0, "average time computed with zero successful polls");
    if good == 0 {
        return;
    }
    rec.avg_time = ((good - 1) as f64 * rec.avg_time + ping_time) / good as f64;
}

/// Error text recorded for a failed poll.
fn failure_message(rec: &DeviceHealthRecord, probe: &ProbeResult, mode: AvailabilityMode) -> String {
    match mode {
        AvailabilityMode::SnmpAndPing | AvailabilityMode::SnmpOrPing => {
            if rec.snmp_applicable() {
                format!("{}, {}", probe.snmp_response, probe.ping_response)
            } else {
                probe.ping_response.clone()
            }
        }
        AvailabilityMode::Snmp => {
            if rec.snmp_applicable() {
                probe.snmp_response.clone()
            } else {
                SNMP_NOT_REQUIRED.to_string()
            }
        }
        AvailabilityMode::Ping | AvailabilityMode::None => probe.ping_response.clone(),
    }
}

/// Response time credited to a successful poll, in milliseconds.
fn response_time(rec: &DeviceHealthRecord, probe: &ProbeResult, mode: AvailabilityMode) -> f64 {
    let snmp = if mode.uses_snmp() {
        sample_or_zero(&probe.snmp_status)
    } else {
        0.0
    };
    let ping = if mode.uses_ping() {
        sample_or_zero(&probe.ping_status)
    } else {
        0.0
    };

    match mode {
        AvailabilityMode::SnmpAndPing | AvailabilityMode::SnmpOrPing => {
            if rec.snmp_applicable() {
                (snmp + ping) / 2.0
            } else {
                0.0
            }
        }
        AvailabilityMode::Snmp => {
            if rec.snmp_applicable() {
                snmp
            } else {
                0.0
            }
        }
        AvailabilityMode::None => 0.0,
        AvailabilityMode::Ping => ping,
    }
}

/// Raw probe responses, logged at high verbosity.
fn diagnostics(rec: &DeviceHealthRecord, probe: &ProbeResult, ctx: &PollContext) -> Vec<StatusEvent> {
    let line = |channel, response: &str| StatusEvent::Diagnostic {
        device_id: ctx.device_id,
        channel,
        response: response.to_string(),
    };
    let reachable = matches!(rec.status, HostStatus::Up | HostStatus::Recovering);

    match ctx.availability {
        AvailabilityMode::SnmpAndPing => vec![
            line(ProbeChannel::Ping, &probe.ping_response),
            line(ProbeChannel::Snmp, &probe.snmp_response),
        ],
        AvailabilityMode::Snmp if reachable && !rec.snmp_applicable() => {
            vec![line(ProbeChannel::Snmp, SNMP_NOT_REQUIRED)]
        }
        AvailabilityMode::Snmp => vec![line(ProbeChannel::Snmp, &probe.snmp_response)],
        _ => vec![line(ProbeChannel::Ping, &probe.ping_response)],
    }
}
