//! Monotonic client timestamps

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

static LAST_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Milliseconds since the Unix epoch, strictly increasing within the process.
///
/// Follows the wall clock, but never returns the same value twice and never
/// goes backwards if the wall clock is adjusted.
pub fn now_millis() -> i64 {
    let wall = Utc::now().timestamp_millis();
    let mut last = LAST_MILLIS.load(Ordering::Acquire);
    loop {
        let next = wall.max(last + 1);
        match LAST_MILLIS.compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(current) => last = current,
        }
    }
}
