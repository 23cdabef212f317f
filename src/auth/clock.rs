//! Time source for token signing and skew learning.

use std::sync::atomic::{AtomicI64, Ordering};

/// Wall clock in epoch seconds.
pub trait Clock: Send + Sync {
    /// Current time, rounded to the nearest second.
    fn now_epoch_secs(&self) -> i64;
}

/// The device clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_secs(&self) -> i64 {
        let millis = chrono::Utc::now().timestamp_millis();
        (millis as f64 / 1000.0).round() as i64
    }
}

/// A settable clock.
#[derive(Debug, Default)]
pub struct FixedClock {
    secs: AtomicI64,
}

impl FixedClock {
    pub fn new(secs: i64) -> Self {
        Self {
            secs: AtomicI64::new(secs),
        }
    }

    pub fn set(&self, secs: i64) {
        self.secs.store(secs, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.secs.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_epoch_secs(&self) -> i64 {
        self.secs.load(Ordering::SeqCst)
    }
}
