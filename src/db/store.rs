//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

use super::models::*;
use crate::config::OptionSource;
use crate::status::{AvailabilityMode, DeviceHealthRecord, HostStatus, Severity};

/// Stored value of an unset fail/recovery date.
pub const UNSET_DATE: &str = "0000-00-00 00:00:00";

const STATUS_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EVENT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const DEVICE_COLUMNS: &str = "id, hostname, description, disabled, availability_method, \
     ping_method, ping_port, ping_timeout, ping_retries, snmp_community, snmp_version, \
     snmp_port, snmp_timeout, status, status_event_count, status_fail_date, status_rec_date, \
     status_last_error, min_time, max_time, cur_time, avg_time, total_polls, failed_polls, \
     availability";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Device CRUD ---

    /// Add a new device and return its ID.
    pub fn add_device(&self, device: &mut Device) -> Result<i64, DbError> {
        let conn = self.conn()?;
        let h = &device.health;
        conn.execute(
            "INSERT INTO devices (hostname, description, disabled, availability_method, ping_method,
                ping_port, ping_timeout, ping_retries, snmp_community, snmp_version, snmp_port,
                snmp_timeout, status, status_event_count, status_fail_date, status_rec_date,
                status_last_error, min_time, max_time, cur_time, avg_time, total_polls,
                failed_polls, availability)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24)",
            params![
                device.hostname,
                device.description,
                device.disabled,
                device.availability_method.code(),
                device.ping_method.as_str(),
                device.ping_port,
                device.ping_timeout_ms as i64,
                device.ping_retries,
                h.snmp_community,
                h.snmp_version,
                device.snmp_port,
                device.snmp_timeout_ms as i64,
                h.status.code(),
                h.status_event_count,
                format_status_date(h.status_fail_date),
                format_status_date(h.status_rec_date),
                h.status_last_error,
                h.min_time,
                h.max_time,
                h.cur_time,
                h.avg_time,
                h.total_polls as i64,
                h.failed_polls as i64,
                h.availability,
            ],
        )?;
        let id = conn.last_insert_rowid();
        device.id = id;
        Ok(id)
    }

    /// Update a device's probe settings. The health record is left alone
    /// apart from the SNMP credentials it carries.
    pub fn update_device(&self, device: &Device) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE devices SET hostname=?1, description=?2, disabled=?3, availability_method=?4,
                ping_method=?5, ping_port=?6, ping_timeout=?7, ping_retries=?8,
                snmp_community=?9, snmp_version=?10, snmp_port=?11, snmp_timeout=?12
             WHERE id=?13",
            params![
                device.hostname,
                device.description,
                device.disabled,
                device.availability_method.code(),
                device.ping_method.as_str(),
                device.ping_port,
                device.ping_timeout_ms as i64,
                device.ping_retries,
                device.health.snmp_community,
                device.health.snmp_version,
                device.snmp_port,
                device.snmp_timeout_ms as i64,
                device.id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get all devices.
    pub fn get_devices(&self) -> Result<Vec<Device>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM devices ORDER BY id", DEVICE_COLUMNS))?;
        let devices = stmt
            .query_map([], device_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(devices)
    }

    /// Get a device by ID.
    pub fn get_device(&self, id: i64) -> Result<Device, DbError> {
        let conn = self.conn()?;
        let device = conn
            .query_row(
                &format!("SELECT {} FROM devices WHERE id = ?1", DEVICE_COLUMNS),
                params![id],
                device_from_row,
            )
            .optional()?;
        device.ok_or(DbError::NotFound)
    }

    /// Delete a device and its event log.
    pub fn delete_device(&self, id: i64) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM device_events WHERE device_id = ?1", params![id])?;
        conn.execute("DELETE FROM devices WHERE id = ?1", params![id])?;
        Ok(())
    }

    // --- Status ---

    /// Write a device's status record.
    pub fn save_device_status(&self, device_id: i64, h: &DeviceHealthRecord) -> Result<(), DbError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE devices SET status=?1, status_event_count=?2, status_fail_date=?3,
                status_rec_date=?4, status_last_error=?5, min_time=?6, max_time=?7, cur_time=?8,
                avg_time=?9, total_polls=?10, failed_polls=?11, availability=?12
             WHERE id=?13",
            params![
                h.status.code(),
                h.status_event_count,
                format_status_date(h.status_fail_date),
                format_status_date(h.status_rec_date),
                h.status_last_error,
                h.min_time,
                h.max_time,
                h.cur_time,
                h.avg_time,
                h.total_polls as i64,
                h.failed_polls as i64,
                h.availability,
                device_id,
            ],
        )?;
        if changed == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    // --- Settings ---

    pub fn get_setting(&self, name: &str) -> Result<Option<String>, DbError> {
        let conn = self.conn()?;
        let value = conn
            .query_row(
                "SELECT value FROM settings WHERE name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn set_setting(&self, name: &str, value: &str) -> Result<(), DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO settings (name, value) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET value=excluded.value",
            params![name, value],
        )?;
        Ok(())
    }

    // --- Device Events ---

    /// Append an entry to a device's event log.
    pub fn add_device_event(
        &self,
        device_id: i64,
        time: DateTime<Utc>,
        severity: Severity,
        message: &str,
    ) -> Result<i64, DbError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO device_events (device_id, time, severity, message) VALUES (?1, ?2, ?3, ?4)",
            params![
                device_id,
                time.format(EVENT_TIME_FORMAT).to_string(),
                severity.as_str(),
                message,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent events for a device, newest first.
    pub fn get_device_events(&self, device_id: i64, limit: u32) -> Result<Vec<DeviceEvent>, DbError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, device_id, time, severity, message FROM device_events
             WHERE device_id = ?1 ORDER BY time DESC, id DESC LIMIT ?2",
        )?;

        let events = stmt
            .query_map(params![device_id, limit], |row| {
                let time_str: String = row.get(2)?;
                let severity: String = row.get(3)?;
                Ok(DeviceEvent {
                    id: row.get(0)?,
                    device_id: row.get(1)?,
                    time: parse_db_time(&time_str).unwrap_or_else(Utc::now),
                    severity: Severity::parse(&severity).unwrap_or(Severity::Info),
                    message: row.get(4)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        Ok(events)
    }
}

impl OptionSource for Store {
    fn get_option(&self, name: &str) -> Option<String> {
        match self.get_setting(name) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!("Failed to read setting {}: {}", name, e);
                None
            }
        }
    }
}

fn device_from_row(row: &Row<'_>) -> SqlResult<Device> {
    let ping_method: String = row.get(5)?;
    let fail_date: Option<String> = row.get(15)?;
    let rec_date: Option<String> = row.get(16)?;
    let total_polls: i64 = row.get(22)?;
    let failed_polls: i64 = row.get(23)?;
    let ping_timeout: i64 = row.get(7)?;
    let snmp_timeout: i64 = row.get(12)?;

    Ok(Device {
        id: row.get(0)?,
        hostname: row.get(1)?,
        description: row.get(2)?,
        disabled: row.get(3)?,
        availability_method: AvailabilityMode::from_code(row.get(4)?),
        ping_method: ping_method.parse().unwrap_or_default(),
        ping_port: row.get(6)?,
        ping_timeout_ms: ping_timeout.max(0) as u64,
        ping_retries: row.get(8)?,
        snmp_port: row.get(11)?,
        snmp_timeout_ms: snmp_timeout.max(0) as u64,
        health: DeviceHealthRecord {
            status: HostStatus::from_code(row.get(13)?),
            status_event_count: row.get(14)?,
            status_fail_date: fail_date.as_deref().and_then(parse_status_date),
            status_rec_date: rec_date.as_deref().and_then(parse_status_date),
            status_last_error: row.get(17)?,
            min_time: row.get(18)?,
            max_time: row.get(19)?,
            cur_time: row.get(20)?,
            avg_time: row.get(21)?,
            total_polls: total_polls.max(0) as u64,
            failed_polls: failed_polls.max(0) as u64,
            availability: row.get(24)?,
            snmp_community: row.get(9)?,
            snmp_version: row.get(10)?,
        },
    })
}

/// Render a fail/recovery date, using [`UNSET_DATE`] for `None`.
pub fn format_status_date(date: Option<DateTime<Utc>>) -> String {
    match date {
        Some(d) => d.format(STATUS_DATE_FORMAT).to_string(),
        None => UNSET_DATE.to_string(),
    }
}

/// Parse a stored fail/recovery date. Empty, zero and garbage values are
/// all treated as unset.
pub fn parse_status_date(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() || s == UNSET_DATE {
        return None;
    }
    parse_db_time(s)
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::NamedTempFile;

    fn test_store() -> (NamedTempFile, Store) {
        let tmp = NamedTempFile::new().unwrap();
        let store = Store::new(tmp.path()).unwrap();
        (tmp, store)
    }

    #[test]
    fn test_device_crud() {
        let (_tmp, store) = test_store();

        // Create
        let mut device = Device {
            hostname: "router1.example.net".to_string(),
            description: "Core router".to_string(),
            ..Default::default()
        };
        let id = store.add_device(&mut device).unwrap();
        assert!(id > 0);

        // Read
        let fetched = store.get_device(id).unwrap();
        assert_eq!(fetched.hostname, "router1.example.net");
        assert_eq!(fetched.health.status, HostStatus::Unknown);
        assert_eq!(fetched.health.status_fail_date, None);

        // Update
        let mut updated = fetched;
        updated.availability_method = AvailabilityMode::SnmpOrPing;
        updated.ping_method = PingMethod::Tcp;
        updated.health.snmp_community = "public".to_string();
        store.update_device(&updated).unwrap();

        let fetched2 = store.get_device(id).unwrap();
        assert_eq!(fetched2.availability_method, AvailabilityMode::SnmpOrPing);
        assert_eq!(fetched2.ping_method, PingMethod::Tcp);
        assert_eq!(fetched2.health.snmp_community, "public");

        // Delete
        store.delete_device(id).unwrap();
        assert!(matches!(store.get_device(id), Err(DbError::NotFound)));
    }

    #[test]
    fn test_save_device_status() {
        let (_tmp, store) = test_store();
        let mut device = Device {
            hostname: "10.0.0.1".to_string(),
            ..Default::default()
        };
        let id = store.add_device(&mut device).unwrap();

        let failed_at = Utc.with_ymd_and_hms(2024, 3, 9, 8, 30, 0).unwrap();
        let record = DeviceHealthRecord {
            status: HostStatus::Recovering,
            status_event_count: 1,
            status_fail_date: Some(failed_at),
            status_rec_date: None,
            status_last_error: "ICMP ping timed out".to_string(),
            total_polls: 12,
            failed_polls: 3,
            availability: 75.0,
            cur_time: 1.25,
            min_time: 0.5,
            max_time: 4.0,
            avg_time: 1.5,
            ..Default::default()
        };
        store.save_device_status(id, &record).unwrap();

        let loaded = store.get_device(id).unwrap().health;
        assert_eq!(loaded, record);
    }

    #[test]
    fn test_save_status_for_missing_device() {
        let (_tmp, store) = test_store();
        let result = store.save_device_status(999, &DeviceHealthRecord::default());
        assert!(matches!(result, Err(DbError::NotFound)));
    }

    #[test]
    fn test_settings() {
        let (_tmp, store) = test_store();
        assert_eq!(store.get_setting("ping_failure_count").unwrap(), None);

        store.set_setting("ping_failure_count", "3").unwrap();
        store.set_setting("ping_failure_count", "4").unwrap();
        assert_eq!(store.get_option("ping_failure_count"), Some("4".to_string()));
    }

    #[test]
    fn test_device_events() {
        let (_tmp, store) = test_store();
        let mut device = Device {
            hostname: "switch".to_string(),
            ..Default::default()
        };
        let id = store.add_device(&mut device).unwrap();

        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        store.add_device_event(id, t0, Severity::Error, "down").unwrap();
        store.add_device_event(id, t1, Severity::Notice, "up").unwrap();

        let events = store.get_device_events(id, 10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message, "up");
        assert_eq!(events[0].severity, Severity::Notice);
        assert_eq!(events[1].time, t0);

        assert_eq!(store.get_device_events(id, 1).unwrap().len(), 1);

        store.delete_device(id).unwrap();
        assert!(store.get_device_events(id, 10).unwrap().is_empty());
    }

    #[test]
    fn test_status_dates() {
        assert_eq!(parse_status_date(""), None);
        assert_eq!(parse_status_date(UNSET_DATE), None);
        assert_eq!(parse_status_date("yesterday"), None);

        let d = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 58).unwrap();
        assert_eq!(format_status_date(Some(d)), "2023-12-31 23:59:58");
        assert_eq!(parse_status_date("2023-12-31 23:59:58"), Some(d));
        assert_eq!(format_status_date(None), UNSET_DATE);
    }
}
