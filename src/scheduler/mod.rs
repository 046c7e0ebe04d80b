//! Scheduler module for polling devices and tracking their status.
//!
//! Each enabled device gets its own poll loop. The loop owns the device's
//! status record for as long as it runs, so updates for one device never
//! overlap.

use crate::config::PollerConfig;
use crate::db::{Device, Store};
use crate::probe::probe_device;
use crate::status::{
    DeviceHealthRecord, HostHealthTracker, Observation, PollContext, ProbeResult, Severity,
    StatusEvent, StatusUpdate,
};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

/// Tag attached to every log line the poller emits.
const LOG_ORIGIN: &str = "POLLER";

/// A running poll loop.
struct PollHandle {
    /// Distinguishes this loop from a later one for the same device.
    generation: u64,
    stop_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

type PollerMap = Arc<RwLock<HashMap<i64, PollHandle>>>;

/// The main scheduler that orchestrates device polling.
pub struct Scheduler {
    store: Arc<Store>,
    tracker: Arc<HostHealthTracker>,
    config: PollerConfig,
    pollers: PollerMap,
    next_generation: AtomicU64,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, tracker: HostHealthTracker, config: PollerConfig) -> Self {
        Self {
            store,
            tracker: Arc::new(tracker),
            config,
            pollers: Arc::new(RwLock::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Start polling every enabled device in the store.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let devices = self.store.get_devices()?;
        let thresholds = self.tracker.config();

        tracing::info!(
            "Starting scheduler with {} devices, interval {:?}",
            devices.len(),
            self.config.interval
        );
        tracing::info!(
            "Status thresholds: down after {} failures, up after {} successes, verbosity {:?}",
            thresholds.ping_failure_count,
            thresholds.ping_recovery_count,
            thresholds.log_verbosity
        );

        for device in devices {
            self.add_device(device).await;
        }

        Ok(())
    }

    /// Start polling a device. Disabled devices and devices already being
    /// polled are skipped.
    pub async fn add_device(&self, device: Device) {
        if device.disabled {
            tracing::debug!("Scheduler: Skipping disabled device {}", device.hostname);
            return;
        }

        let mut pollers = self.pollers.write().await;
        if pollers.contains_key(&device.id) {
            return;
        }

        tracing::info!("Scheduler: Adding device {} ({})", device.id, device.hostname);

        let (stop_tx, stop_rx) = broadcast::channel(1);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let poller = DevicePoller {
            store: self.store.clone(),
            tracker: self.tracker.clone(),
        };
        let interval = self.config.interval;
        let device_id = device.id;
        let registry = self.pollers.clone();

        let task = tokio::spawn(async move {
            run_poll_loop(device, poller, interval, stop_rx).await;

            // a newer loop may already own the slot
            let mut pollers = registry.write().await;
            if pollers
                .get(&device_id)
                .is_some_and(|h| h.generation == generation)
            {
                pollers.remove(&device_id);
            }
        });

        pollers.insert(
            device_id,
            PollHandle {
                generation,
                stop_tx,
                task,
            },
        );
    }

    /// Stop polling a device and wait for its loop to exit, so no write from
    /// the old loop can land after this returns.
    pub async fn remove_device(&self, id: i64) {
        let handle = self.pollers.write().await.remove(&id);

        if let Some(handle) = handle {
            let _ = handle.stop_tx.send(());
            if let Err(e) = handle.task.await {
                tracing::error!("Scheduler: Poll loop for device {} failed: {}", id, e);
            }
            tracing::info!("Scheduler: Removed device {}", id);
        }
    }

    /// Number of devices currently being polled.
    pub async fn active_devices(&self) -> usize {
        self.pollers.read().await.len()
    }
}

/// Applies poll results for one device: tracker update, logging, persistence.
struct DevicePoller {
    store: Arc<Store>,
    tracker: Arc<HostHealthTracker>,
}

impl DevicePoller {
    /// Fold one poll result into `record` and write it out. A failed write
    /// is logged and the in-memory record is kept, so the next successful
    /// write carries the full history.
    fn apply(
        &self,
        device: &Device,
        record: &mut DeviceHealthRecord,
        observed: Observation,
        probe: &ProbeResult,
        now: DateTime<Utc>,
    ) -> StatusUpdate {
        let ctx = PollContext {
            device_id: device.id,
            availability: device.availability_method,
            now,
        };
        let update = self.tracker.update(observed, record, probe, &ctx);
        *record = update.record.clone();

        for event in &update.events {
            emit_event(event);
        }
        if let Some(alert) = update.alert() {
            if let Err(e) =
                self.store
                    .add_device_event(device.id, now, alert.severity(), &alert.message())
            {
                tracing::error!(
                    origin = LOG_ORIGIN,
                    "Failed to record event for device {}: {}",
                    device.id,
                    e
                );
            }
        }

        if let Err(e) = self.store.save_device_status(device.id, record) {
            tracing::error!(
                origin = LOG_ORIGIN,
                "Device[{}] ERROR: failed to save status: {}",
                device.id,
                e
            );
        }

        update
    }
}

/// Send a tracker event to the log.
fn emit_event(event: &StatusEvent) {
    let message = event.message();
    match event.severity() {
        Severity::Error => tracing::error!(origin = LOG_ORIGIN, device_id = event.device_id(), "{}", message),
        Severity::Notice => tracing::warn!(origin = LOG_ORIGIN, device_id = event.device_id(), "{}", message),
        Severity::Info => tracing::info!(origin = LOG_ORIGIN, device_id = event.device_id(), "{}", message),
    }
}

/// Run the poll loop for a single device.
async fn run_poll_loop(
    device: Device,
    poller: DevicePoller,
    interval: Duration,
    mut stop_rx: broadcast::Receiver<()>,
) {
    let mut record = device.health.clone();

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = stop_rx.recv() => {
                break;
            }
            _ = ticker.tick() => {
                // jitter so devices added together do not probe in lockstep
                let jitter = rand::random::<u64>() % 100;
                tokio::time::sleep(Duration::from_millis(jitter)).await;

                let (observed, probe) = probe_device(&device).await;
                tracing::debug!(
                    "Device[{}] observed {:?} (ping {}, snmp {})",
                    device.id,
                    observed,
                    probe.ping_status,
                    probe.snmp_status
                );
                poller.apply(&device, &mut record, observed, &probe, Utc::now());
            }
        }
    }
}
