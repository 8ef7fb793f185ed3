//! One long-running task that watches every device's last-alive
//! timestamp and pets the hardware/software watchdog only while all of
//! them are fresh. Grounded on the teacher's periodic
//! `tokio::spawn(loop { sleep(...).await; ... })` expiry task shape.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Shared "last alive" clock for one device; the device's reader/writer
/// tasks stamp it every loop iteration with relaxed-ordering stores.
pub fn new_heartbeat() -> Arc<AtomicU64> {
    Arc::new(AtomicU64::new(now_millis()))
}

pub fn pet_heartbeat(heartbeat: &AtomicU64) {
    heartbeat.store(now_millis(), Ordering::Relaxed);
}

#[cfg(target_os = "linux")]
mod watchdog_device {
    use std::fs::{File, OpenOptions};
    use std::io::Write;

    pub struct WatchdogHandle(File);

    pub fn open() -> std::io::Result<WatchdogHandle> {
        OpenOptions::new()
            .write(true)
            .open("/dev/watchdog")
            .map(WatchdogHandle)
    }

    impl WatchdogHandle {
        pub fn pet(&mut self) {
            let _ = self.0.write_all(&[0u8]);
        }
    }

    impl Drop for WatchdogHandle {
        fn drop(&mut self) {
            let _ = self.0.write_all(b"V");
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod watchdog_device {
    pub struct WatchdogHandle;

    pub fn open() -> std::io::Result<WatchdogHandle> {
        Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "hardware watchdog is only implemented on Linux",
        ))
    }

    impl WatchdogHandle {
        pub fn pet(&mut self) {}
    }
}

/// Whether opening `/dev/watchdog` failed because the process lacks the
/// privilege to, vs. some other reason (missing device, already armed
/// by another process).
pub enum WatchdogOpenError {
    PermissionDenied,
    Other(String),
}

/// Open the watchdog device once at startup, before any device task
/// runs, so a privilege failure can be reported as exit code 3 instead
/// of silently degrading to "unarmed" deep inside a background task.
/// Opening (and then dropping without writing) a real `/dev/watchdog`
/// can itself trigger a reboot on some drivers, so this must only be
/// called once and the resulting handle fed into [`Supervisor::run`].
pub fn open_watchdog(enabled: bool) -> Result<Option<watchdog_device::WatchdogHandle>, WatchdogOpenError> {
    if !enabled {
        return Ok(None);
    }
    match watchdog_device::open() {
        Ok(handle) => Ok(Some(handle)),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            Err(WatchdogOpenError::PermissionDenied)
        }
        Err(e) => Err(WatchdogOpenError::Other(e.to_string())),
    }
}

pub struct Supervisor {
    names: Vec<String>,
    heartbeats: Vec<Arc<AtomicU64>>,
    timeout: Duration,
    watchdog: Option<watchdog_device::WatchdogHandle>,
}

impl Supervisor {
    pub fn new(
        names: Vec<String>,
        heartbeats: Vec<Arc<AtomicU64>>,
        timeout: Duration,
        watchdog: Option<watchdog_device::WatchdogHandle>,
    ) -> Self {
        Supervisor {
            names,
            heartbeats,
            timeout,
            watchdog,
        }
    }

    /// Runs forever, waking at `timeout / 2` to check freshness and
    /// conditionally pet the watchdog.
    pub async fn run(mut self) {
        let pet_interval = self.timeout / 2;

        loop {
            tokio::time::sleep(pet_interval).await;
            let now = now_millis();
            let timeout_ms = self.timeout.as_millis() as u64;

            let mut stalled = Vec::new();
            for (name, heartbeat) in self.names.iter().zip(&self.heartbeats) {
                let age = now.saturating_sub(heartbeat.load(Ordering::Relaxed));
                if age >= timeout_ms {
                    stalled.push((name.clone(), age));
                }
            }

            if stalled.is_empty() {
                if let Some(handle) = self.watchdog.as_mut() {
                    handle.pet();
                }
            } else {
                for (name, age) in &stalled {
                    error!(device = %name, age_ms = age, "device task stalled; withholding watchdog pet");
                }
            }
        }
    }
}

/// Decide whether to arm the watchdog at startup per the bootloop guard:
/// refuse to arm (and only log) once `PreviousResets >= MaxResets`.
/// Returns the (possibly incremented) reset count to persist.
pub fn should_arm(previous_resets: u32, max_resets: u32) -> (bool, u32) {
    if max_resets > 0 && previous_resets >= max_resets {
        warn!(
            previous_resets,
            max_resets, "watchdog bootloop guard tripped; refusing to arm"
        );
        (false, previous_resets)
    } else {
        info!(previous_resets = previous_resets + 1, "arming watchdog");
        (true, previous_resets + 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn refuses_to_arm_past_max_resets() {
        let (armed, count) = should_arm(3, 3);
        assert!(!armed);
        assert_eq!(count, 3);
    }

    #[test]
    fn arms_and_increments_below_max_resets() {
        let (armed, count) = should_arm(1, 3);
        assert!(armed);
        assert_eq!(count, 2);
    }

    #[test]
    fn zero_max_resets_means_unbounded() {
        let (armed, count) = should_arm(50, 0);
        assert!(armed);
        assert_eq!(count, 51);
    }
}
