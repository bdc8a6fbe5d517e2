use crate::models::device::{DeviceSnapshot, DeviceStatus, HealthSummary};
use crate::services::adb::DeviceChannel;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{info, warn};

struct DeviceState {
    status: DeviceStatus,
    locked: bool,
    current_task: Option<String>,
    error_msg: String,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl DeviceState {
    fn new() -> Self {
        Self {
            status: DeviceStatus::Online,
            locked: false,
            current_task: None,
            error_msg: String::new(),
            last_activity: Instant::now(),
            last_activity_at: Utc::now(),
        }
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
        self.last_activity_at = Utc::now();
    }

    fn snapshot(&self, serial: &str) -> DeviceSnapshot {
        DeviceSnapshot {
            serial: serial.to_string(),
            status: self.status,
            current_task: self.current_task.clone(),
            error_msg: self.error_msg.clone(),
            last_activity: self.last_activity_at,
        }
    }
}

/// Registry and mutual-exclusion layer over all managed devices.
///
/// The logical per-device lock is a flag guarded by the registry mutex, not an
/// OS lock: it has to be forcibly reclaimable by `check_timeout` from a thread
/// that never acquired it. Invariant: status is Busy iff the flag is set.
pub struct DeviceRegistry {
    devices: Mutex<HashMap<String, DeviceState>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create a device record. New devices start Online.
    pub fn get(&self, serial: &str) -> DeviceSnapshot {
        let mut devices = self.devices.lock();
        devices
            .entry(serial.to_string())
            .or_insert_with(DeviceState::new)
            .snapshot(serial)
    }

    /// Try to take the device for a task. Non-blocking: callers must not wait
    /// on a busy device.
    pub fn acquire(&self, serial: &str, task: &str) -> bool {
        let mut devices = self.devices.lock();
        let state = devices.entry(serial.to_string()).or_insert_with(DeviceState::new);
        if state.locked {
            return false;
        }
        state.locked = true;
        state.status = DeviceStatus::Busy;
        state.current_task = Some(task.to_string());
        state.touch();
        true
    }

    /// Release the device. Idempotent: a worker that lost ownership to a
    /// forced timeout may call this without effect beyond clearing the label.
    pub fn release(&self, serial: &str) {
        let mut devices = self.devices.lock();
        if let Some(state) = devices.get_mut(serial) {
            state.locked = false;
            state.current_task = None;
            if state.status != DeviceStatus::Error {
                state.status = DeviceStatus::Online;
            }
        }
    }

    /// Refresh the activity timestamp of a held device, keeping a healthy
    /// long-running task clear of the stuck-task bound.
    pub fn heartbeat(&self, serial: &str) {
        let mut devices = self.devices.lock();
        if let Some(state) = devices.get_mut(serial) {
            if state.status == DeviceStatus::Busy {
                state.touch();
            }
        }
    }

    /// Force-recover a device whose task went silent past `max_idle`.
    ///
    /// Only fires for Busy devices. Reclaims the lock and parks the device in
    /// Error until the next successful liveness probe.
    pub fn check_timeout(&self, serial: &str, max_idle: Duration) -> bool {
        let mut devices = self.devices.lock();
        let Some(state) = devices.get_mut(serial) else {
            return false;
        };
        if state.status != DeviceStatus::Busy {
            return false;
        }
        let elapsed = state.last_activity.elapsed();
        if elapsed <= max_idle {
            return false;
        }
        warn!(serial, elapsed_secs = elapsed.as_secs(), "task timeout, reclaiming device");
        state.status = DeviceStatus::Error;
        state.error_msg = format!("Task timeout after {}s", elapsed.as_secs());
        state.locked = false;
        state.current_task = None;
        true
    }

    /// Reconcile against a freshly enumerated serial list. Missing devices
    /// move to Offline unless Busy; reappearing Offline devices come back
    /// Online. Returns the records for every enumerated serial.
    pub fn discover(&self, known_serials: &[String]) -> Vec<DeviceSnapshot> {
        let mut devices = self.devices.lock();

        for (serial, state) in devices.iter_mut() {
            if !known_serials.contains(serial) && state.status != DeviceStatus::Busy {
                if state.status != DeviceStatus::Offline {
                    info!(serial, "device no longer enumerable, marking offline");
                }
                state.status = DeviceStatus::Offline;
            }
        }

        known_serials
            .iter()
            .map(|serial| {
                let state = devices.entry(serial.clone()).or_insert_with(DeviceState::new);
                if state.status == DeviceStatus::Offline {
                    state.status = DeviceStatus::Online;
                }
                state.snapshot(serial)
            })
            .collect()
    }

    /// Run stuck-task detection and a liveness probe over every device.
    ///
    /// Busy devices are never probed (that would race the in-flight task), so
    /// a device wedged in Busy under the timeout bound still counts as busy
    /// even if physically disconnected. A successful probe recovers Error and
    /// Offline devices to Online; a failed probe only ever demotes Online to
    /// Offline, leaving Error devices in Error.
    pub fn health_check<F>(&self, max_idle: Duration, probe: F) -> HealthSummary
    where
        F: Fn(&str) -> bool,
    {
        let serials: Vec<String> = self.devices.lock().keys().cloned().collect();
        let mut summary = HealthSummary::default();

        for serial in serials {
            summary.total += 1;
            self.check_timeout(&serial, max_idle);

            let status = {
                let devices = self.devices.lock();
                match devices.get(&serial) {
                    Some(state) => state.status,
                    None => continue,
                }
            };

            if status == DeviceStatus::Busy {
                summary.busy += 1;
                continue;
            }

            // Probe without holding the registry lock.
            let alive = probe(&serial);
            let mut devices = self.devices.lock();
            let Some(state) = devices.get_mut(&serial) else {
                continue;
            };
            if state.status == DeviceStatus::Busy {
                // A task slipped in while we probed; leave it alone.
                summary.busy += 1;
                continue;
            }
            if alive {
                state.status = DeviceStatus::Online;
                state.error_msg.clear();
                summary.online += 1;
            } else {
                match state.status {
                    DeviceStatus::Online | DeviceStatus::Offline => {
                        state.status = DeviceStatus::Offline;
                        summary.offline += 1;
                    }
                    DeviceStatus::Error => summary.error += 1,
                    DeviceStatus::Busy => unreachable!(),
                }
            }
        }

        summary
    }

    pub fn snapshot(&self, serial: &str) -> Option<DeviceSnapshot> {
        let devices = self.devices.lock();
        devices.get(serial).map(|state| state.snapshot(serial))
    }

    pub fn all(&self) -> Vec<DeviceSnapshot> {
        let devices = self.devices.lock();
        let mut all: Vec<DeviceSnapshot> = devices
            .iter()
            .map(|(serial, state)| state.snapshot(serial))
            .collect();
        all.sort_by(|a, b| a.serial.cmp(&b.serial));
        all
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Enumerate devices over the channel and reconcile the registry.
pub fn discover_devices<C: DeviceChannel>(
    registry: &DeviceRegistry,
    channel: &C,
) -> Vec<DeviceSnapshot> {
    let serials = channel.list_devices();
    registry.discover(&serials)
}

/// Full health sweep: stuck-task recovery plus liveness probing.
pub fn run_health_check<C: DeviceChannel>(
    registry: &DeviceRegistry,
    channel: &C,
    max_idle: Duration,
) -> HealthSummary {
    registry.health_check(max_idle, |serial| channel.ping(serial))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testkit::MockChannel;
    use std::sync::Arc;

    #[test]
    fn test_get_creates_online_device() {
        let registry = DeviceRegistry::new();
        let snap = registry.get("emulator-5554");
        assert_eq!(snap.status, DeviceStatus::Online);
        assert!(snap.current_task.is_none());
    }

    #[test]
    fn test_acquire_is_exclusive_until_release() {
        let registry = DeviceRegistry::new();
        assert!(registry.acquire("emulator-5554", "full_scan"));
        assert!(!registry.acquire("emulator-5554", "full_scan"));

        let snap = registry.snapshot("emulator-5554").unwrap();
        assert_eq!(snap.status, DeviceStatus::Busy);
        assert_eq!(snap.current_task.as_deref(), Some("full_scan"));

        registry.release("emulator-5554");
        assert!(registry.acquire("emulator-5554", "full_scan"));
    }

    #[test]
    fn test_acquire_under_concurrent_attempts() {
        let registry = Arc::new(DeviceRegistry::new());
        registry.get("emulator-5554");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(std::thread::spawn(move || {
                let mut wins = 0;
                for _ in 0..200 {
                    if registry.acquire("emulator-5554", "t") {
                        wins += 1;
                        // Second acquire while held must always fail.
                        assert!(!registry.acquire("emulator-5554", "t"));
                        registry.release("emulator-5554");
                    }
                }
                wins
            }));
        }

        let total: u32 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert!(total > 0, "at least one acquisition should have succeeded");
        // The lock must be free again at the end.
        assert!(registry.acquire("emulator-5554", "t"));
    }

    #[test]
    fn test_release_is_idempotent() {
        let registry = DeviceRegistry::new();
        registry.get("emulator-5554");
        registry.release("emulator-5554");
        registry.release("emulator-5554");
        assert_eq!(registry.snapshot("emulator-5554").unwrap().status, DeviceStatus::Online);
    }

    #[test]
    fn test_release_preserves_error_status() {
        let registry = DeviceRegistry::new();
        assert!(registry.acquire("emulator-5554", "full_scan"));
        // Zero bound: any elapsed time counts as stuck.
        assert!(registry.check_timeout("emulator-5554", Duration::from_secs(0)));

        registry.release("emulator-5554");
        assert_eq!(registry.snapshot("emulator-5554").unwrap().status, DeviceStatus::Error);
    }

    #[test]
    fn test_check_timeout_only_fires_when_busy() {
        let registry = DeviceRegistry::new();
        registry.get("emulator-5554");

        // Online device: never fires, regardless of bound.
        assert!(!registry.check_timeout("emulator-5554", Duration::from_secs(0)));

        // Error and Offline devices: never fires either.
        registry.acquire("emulator-5554", "t");
        assert!(registry.check_timeout("emulator-5554", Duration::from_secs(0)));
        assert!(!registry.check_timeout("emulator-5554", Duration::from_secs(0)));

        registry.discover(&[]);
        assert!(!registry.check_timeout("unknown-serial", Duration::from_secs(0)));
    }

    #[test]
    fn test_check_timeout_reclaims_lock() {
        let registry = DeviceRegistry::new();
        assert!(registry.acquire("emulator-5554", "full_scan"));
        assert!(registry.check_timeout("emulator-5554", Duration::from_secs(0)));

        let snap = registry.snapshot("emulator-5554").unwrap();
        assert_eq!(snap.status, DeviceStatus::Error);
        assert!(snap.error_msg.contains("timeout"), "got: {}", snap.error_msg);

        // The lock is free for the next task.
        assert!(registry.acquire("emulator-5554", "retry"));
    }

    #[test]
    fn test_heartbeat_defers_timeout() {
        let registry = DeviceRegistry::new();
        assert!(registry.acquire("emulator-5554", "full_scan"));
        std::thread::sleep(Duration::from_millis(30));
        registry.heartbeat("emulator-5554");
        assert!(!registry.check_timeout("emulator-5554", Duration::from_millis(25)));
    }

    #[test]
    fn test_discover_marks_missing_offline_and_revives() {
        let registry = DeviceRegistry::new();
        registry.get("emulator-5554");
        registry.get("emulator-5556");

        let known = vec!["emulator-5554".to_string()];
        let found = registry.discover(&known);
        assert_eq!(found.len(), 1);
        assert_eq!(registry.snapshot("emulator-5556").unwrap().status, DeviceStatus::Offline);

        // Reappears: back to Online.
        let known = vec!["emulator-5554".to_string(), "emulator-5556".to_string()];
        registry.discover(&known);
        assert_eq!(registry.snapshot("emulator-5556").unwrap().status, DeviceStatus::Online);
    }

    #[test]
    fn test_discover_never_demotes_busy() {
        let registry = DeviceRegistry::new();
        assert!(registry.acquire("emulator-5554", "full_scan"));
        registry.discover(&[]);
        assert_eq!(registry.snapshot("emulator-5554").unwrap().status, DeviceStatus::Busy);
    }

    #[test]
    fn test_health_check_counts_and_probe_rules() {
        let registry = DeviceRegistry::new();
        registry.get("dead");
        registry.get("alive");
        registry.acquire("busy", "full_scan");

        let summary = registry.health_check(Duration::from_secs(120), |serial| serial == "alive");
        assert_eq!(summary.total, 3);
        assert_eq!(summary.online, 1);
        assert_eq!(summary.offline, 1);
        assert_eq!(summary.busy, 1);
        assert_eq!(summary.error, 0);

        // The busy device was never probed into Offline.
        assert_eq!(registry.snapshot("busy").unwrap().status, DeviceStatus::Busy);
    }

    #[test]
    fn test_channel_helpers() {
        let registry = DeviceRegistry::new();
        registry.get("gone-device");

        let channel = MockChannel::new();
        channel.set_devices(&["emulator-5554", "emulator-5556"]);

        let found = discover_devices(&registry, &channel);
        assert_eq!(found.len(), 2);
        assert_eq!(registry.snapshot("gone-device").unwrap().status, DeviceStatus::Offline);

        // The mock channel answers every ping.
        let summary = run_health_check(&registry, &channel, Duration::from_secs(120));
        assert_eq!(summary.total, 3);
        assert_eq!(summary.online, 3);
    }

    #[test]
    fn test_health_check_recovers_stuck_task() {
        let registry = DeviceRegistry::new();
        registry.acquire("wedged", "full_scan");
        std::thread::sleep(Duration::from_millis(10));

        // While unresponsive, the reclaimed device stays parked in Error.
        let summary = registry.health_check(Duration::from_millis(1), |_| false);
        assert_eq!(summary.error, 1);
        assert_eq!(registry.snapshot("wedged").unwrap().status, DeviceStatus::Error);

        // The lock was reclaimed, so a new task can run without operator help.
        assert!(registry.acquire("wedged", "retry"));
        registry.release("wedged");

        // Error clears on the next successful probe.
        let summary = registry.health_check(Duration::from_secs(120), |_| true);
        assert_eq!(summary.online, 1);
        assert_eq!(registry.snapshot("wedged").unwrap().status, DeviceStatus::Online);
    }
}
