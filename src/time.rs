//! Monotonic millisecond clock used by the signing-sequence generator and
//! by cooldown/expiry bookkeeping across the crate.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_millis() as u64
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

/// Strictly-advancing millisecond source for signed frames.
///
/// Each call returns a value greater than every value previously returned,
/// even if the wall clock has not advanced or has gone backwards.
#[derive(Debug, Default)]
pub struct SigningClock {
    last: std::sync::atomic::AtomicU64,
}

impl SigningClock {
    pub fn new() -> Self {
        Self {
            last: std::sync::atomic::AtomicU64::new(0),
        }
    }

    /// Returns the next strictly-increasing timestamp.
    pub fn next(&self) -> u64 {
        use std::sync::atomic::Ordering;
        let wall = now_ms();
        let mut last = self.last.load(Ordering::Acquire);
        loop {
            let candidate = wall.max(last + 1);
            match self.last.compare_exchange_weak(
                last,
                candidate,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return candidate,
                Err(observed) => last = observed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signing_clock_strictly_increases() {
        let clock = SigningClock::new();
        let mut prev = clock.next();
        for _ in 0..1000 {
            let next = clock.next();
            assert!(next > prev);
            prev = next;
        }
    }
}
