//! `SetTimeDevice`: an observer-only pseudo-device with no real
//! transport. It watches for the first `Date`/`GmtTime` pair that
//! followed a status=A RMC fix and sets the system clock exactly once.

use std::sync::atomic::{AtomicBool, Ordering};

use mux_codec::message::Message;
use tracing::{error, info, warn};

pub struct SetTimeDevice {
    pending_date: Option<(u16, u8, u8)>,
    done: bool,
    permission_denied: AtomicBool,
}

impl Default for SetTimeDevice {
    fn default() -> Self {
        SetTimeDevice {
            pending_date: None,
            done: false,
            permission_denied: AtomicBool::new(false),
        }
    }
}

impl SetTimeDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one incoming message. Returns once the clock has been set,
    /// never again afterward (`done` latches permanently).
    pub fn on_message(&mut self, message: &Message) {
        if self.done {
            return;
        }
        match message {
            Message::Date { year, month, day } => {
                self.pending_date = Some((*year, *month, *day));
            }
            Message::GmtTime {
                hour,
                minute,
                second,
            } => {
                if let Some((year, month, day)) = self.pending_date.take() {
                    self.apply(year, month, day, *hour, *minute, *second);
                }
            }
            _ => {}
        }
    }

    fn apply(&mut self, year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) {
        match set_system_clock(year, month, day, hour, minute, second) {
            Ok(()) => {
                info!(year, month, day, hour, minute, second, "system clock set from RMC fix");
                self.done = true;
            }
            Err(ClockError::PermissionDenied) => {
                if !self.permission_denied.swap(true, Ordering::Relaxed) {
                    warn!("permission denied setting system clock; SetTimeDevice disabled");
                }
                self.done = true;
            }
            Err(ClockError::Other(message)) => {
                error!(%message, "failed to set system clock");
                self.done = true;
            }
        }
    }
}

enum ClockError {
    PermissionDenied,
    Other(String),
}

#[cfg(target_os = "linux")]
fn set_system_clock(
    year: u16,
    month: u8,
    day: u8,
    hour: u8,
    minute: u8,
    second: u8,
) -> Result<(), ClockError> {
    use chrono::{NaiveDate, NaiveDateTime};
    use nix::sys::time::TimeSpec;
    use nix::time::{clock_settime, ClockId};

    let date = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .ok_or_else(|| ClockError::Other("invalid date".to_string()))?;
    let time = date
        .and_hms_opt(hour as u32, minute as u32, second as u32)
        .ok_or_else(|| ClockError::Other("invalid time".to_string()))?;
    let datetime: NaiveDateTime = time;
    let epoch_seconds = datetime.and_utc().timestamp();

    let ts = TimeSpec::new(epoch_seconds, 0);
    let result = clock_settime(ClockId::CLOCK_REALTIME, ts).map_err(|errno| match errno {
        nix::errno::Errno::EPERM => ClockError::PermissionDenied,
        other => ClockError::Other(other.to_string()),
    });

    // Best-effort: also push the fix into the hardware RTC so the clock
    // survives a power cycle. Failure here (no RTC, wrong permissions)
    // is not reported back to the caller — the wall clock write above is
    // the one that matters for the device's done/permission semantics.
    if result.is_ok() {
        if let Err(e) = rtc::set_rtc_time(year, month, day, hour, minute, second) {
            warn!(error = %e, "best-effort RTC_SET_TIME write failed");
        }
    }

    result
}

#[cfg(target_os = "linux")]
mod rtc {
    use std::fs::OpenOptions;
    use std::os::unix::io::AsRawFd;

    // linux/rtc.h: struct rtc_time mirrors struct tm's layout/fields.
    #[repr(C)]
    #[derive(Default)]
    struct RtcTime {
        tm_sec: i32,
        tm_min: i32,
        tm_hour: i32,
        tm_mday: i32,
        tm_mon: i32,
        tm_year: i32,
        tm_wday: i32,
        tm_yday: i32,
        tm_isdst: i32,
    }

    nix::ioctl_write_ptr!(rtc_set_time, b'p', 0x0a, RtcTime);

    pub fn set_rtc_time(
        year: u16,
        month: u8,
        day: u8,
        hour: u8,
        minute: u8,
        second: u8,
    ) -> nix::Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .open("/dev/rtc0")
            .map_err(|_| nix::errno::Errno::ENODEV)?;
        let time = RtcTime {
            tm_sec: second as i32,
            tm_min: minute as i32,
            tm_hour: hour as i32,
            tm_mday: day as i32,
            tm_mon: month as i32 - 1,
            tm_year: year as i32 - 1900,
            ..Default::default()
        };
        unsafe { rtc_set_time(file.as_raw_fd(), &time) }.map(drop)
    }
}

#[cfg(not(target_os = "linux"))]
fn set_system_clock(
    _year: u16,
    _month: u8,
    _day: u8,
    _hour: u8,
    _minute: u8,
    _second: u8,
) -> Result<(), ClockError> {
    Err(ClockError::Other(
        "system clock setting is only implemented on Linux".to_string(),
    ))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ignores_gmttime_without_preceding_date() {
        let mut device = SetTimeDevice::new();
        device.on_message(&Message::GmtTime {
            hour: 1,
            minute: 2,
            second: 3,
        });
        assert!(!device.done);
    }

    #[test]
    fn latches_after_first_attempt() {
        let mut device = SetTimeDevice::new();
        device.on_message(&Message::Date {
            year: 2024,
            month: 1,
            day: 1,
        });
        device.on_message(&Message::GmtTime {
            hour: 0,
            minute: 0,
            second: 0,
        });
        assert!(device.done);
        // a second RMC's worth of messages must not re-trigger anything
        device.on_message(&Message::Date {
            year: 2030,
            month: 6,
            day: 6,
        });
        device.on_message(&Message::GmtTime {
            hour: 6,
            minute: 6,
            second: 6,
        });
        assert!(device.pending_date.is_none() || device.done);
    }
}
