//! Time reconstruction: wrap compensation and anchor back-fill (§4.5).

use chrono::{DateTime, TimeZone, Utc};

/// `round(2^32 / 1000)`, the correction applied per detected wrap of the
/// 32-bit device millisecond counter.
pub const WRAP_ADD_MILLIS: u64 = 4_294_967;

/// Tracks the monotonic-counter wrap state across a boot session.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeTracker {
    prev_system_time: u32,
    high_time: u64,
}

impl TimeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prev_system_time(&self) -> u32 {
        self.prev_system_time
    }

    pub fn high_time(&self) -> u64 {
        self.high_time
    }

    pub fn restore(prev_system_time: u32, high_time: u64) -> Self {
        TimeTracker {
            prev_system_time,
            high_time,
        }
    }

    /// Called for every observed system-time value. Detects a wrap
    /// (`t < prev_system_time`) and returns the corrected, monotonic
    /// millisecond value.
    pub fn check_time(&mut self, t: u32) -> u64 {
        if t < self.prev_system_time {
            self.high_time += 1;
        }
        self.prev_system_time = t;
        t as u64 + self.high_time * WRAP_ADD_MILLIS
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// A time-synchronization anchor: the affine mapping from wrap-compensated
/// device milliseconds to UTC.
#[derive(Debug, Clone, Copy)]
pub struct TimeAnchor {
    pub raw_system_time: u32,
    pub corrected_system_time: u64,
    pub utc_anchor_secs: u32,
}

impl TimeAnchor {
    /// `utc(t) = utc_anchor + (t - systemTime_anchor) / 1000`, in seconds.
    /// `t` is expected to already be wrap-compensated via the same
    /// session's [`TimeTracker`] — except for the boot/exception fix-up
    /// case, which by design passes the literal value `0`.
    pub fn utc_seconds(&self, t: u64) -> f64 {
        self.utc_anchor_secs as f64
            + (t as i64 - self.corrected_system_time as i64) as f64 / 1000.0
    }

    pub fn utc_datetime(&self, t: u64) -> DateTime<Utc> {
        seconds_to_datetime(self.utc_seconds(t))
    }
}

pub fn seconds_to_datetime(seconds: f64) -> DateTime<Utc> {
    let whole = seconds.floor();
    let nanos = ((seconds - whole) * 1_000_000_000.0).round() as u32;
    Utc.timestamp_opt(whole as i64, nanos)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap())
}
