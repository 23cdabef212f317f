//! Learned server/device clock skew.

use chrono::{DateTime, NaiveDateTime};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::auth::clock::Clock;
use crate::observability::metrics;
use crate::storage::{KeyValueStore, CLOCK_SKEW_KEY};

/// `serverTime - deviceTime` in seconds, shared by every request.
pub struct ClockSkew {
    value: AtomicI64,
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for ClockSkew {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockSkew").field("value", &self.get()).finish()
    }
}

impl ClockSkew {
    /// Restore the persisted value, or start at 0.
    pub fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let value = store
            .get(CLOCK_SKEW_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .unwrap_or(0);
        Self {
            value: AtomicI64::new(value),
            store,
        }
    }

    pub fn get(&self) -> i64 {
        self.value.load(Ordering::SeqCst)
    }

    /// Adopt and persist a new value.
    pub fn set(&self, skew: i64) {
        self.value.store(skew, Ordering::SeqCst);
        if let Err(e) = self.store.set(CLOCK_SKEW_KEY, &skew.to_string()) {
            tracing::warn!(error = %e, "Failed to persist clock skew");
        }
    }

    pub fn reset(&self) {
        self.set(0);
    }

    /// Learn the skew from an authoritative `Date` header value.
    /// Returns the adopted skew, or `None` if the date did not parse.
    pub fn learn(&self, date_header: &str, clock: &dyn Clock) -> Option<i64> {
        let server = parse_http_date(date_header)?;
        let device = clock.now_epoch_secs();
        let skew = server - device;

        tracing::info!(
            previous = self.get(),
            skew,
            "Adopting clock skew from Date header"
        );
        self.set(skew);
        metrics::record_skew_correction();
        Some(skew)
    }
}

/// Parse an HTTP `Date` header into epoch seconds.
///
/// Accepts IMF-fixdate / RFC 2822, the long-weekday form
/// (`Tuesday, 15 Nov 1994 08:12:31 GMT`) and RFC 850.
pub fn parse_http_date(value: &str) -> Option<i64> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(value) {
        return Some(dt.timestamp());
    }

    let stripped = value
        .strip_suffix(" GMT")
        .or_else(|| value.strip_suffix(" UTC"))
        .unwrap_or(value);

    const FORMATS: [&str; 3] = [
        "%A, %d %b %Y %H:%M:%S",
        "%a, %d %b %Y %H:%M:%S",
        "%A, %d-%b-%y %H:%M:%S",
    ];
    FORMATS.iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(stripped, fmt)
            .ok()
            .map(|naive| naive.and_utc().timestamp())
    })
}
