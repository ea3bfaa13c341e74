//! Ed25519 signing and the per-peer time-sequence replay filter
//! that rejects stale and duplicate timestamps.

use std::collections::HashSet;
use std::sync::Mutex;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SigningError {
    #[error("timestamp is older than the accepted window")]
    TooOld,
    #[error("duplicate timestamp")]
    Duplicate,
}

/// Partitions recently-accepted timestamps into two alternating buckets at
/// a configurable precision. Used to reject replayed signed frames without
/// needing to remember every timestamp ever seen.
pub struct TimeSequenceFilter {
    precision_ms: u64,
    inner: Mutex<Buckets>,
}

struct Buckets {
    current_id: u64,
    current: HashSet<u64>,
    previous_id: u64,
    previous: HashSet<u64>,
}

impl TimeSequenceFilter {
    /// `precision_ms` is the bucket width; spec.md's default is 1000ms.
    pub fn new(precision_ms: u64) -> Self {
        Self {
            precision_ms: precision_ms.max(1),
            inner: Mutex::new(Buckets {
                current_id: 0,
                current: HashSet::new(),
                previous_id: 0,
                previous: HashSet::new(),
            }),
        }
    }

    pub fn with_default_precision() -> Self {
        Self::new(1000)
    }

    /// Checks and records `t`. Accepts if `t` falls in the current or
    /// previous bucket and has not been seen before in that bucket;
    /// rejects older timestamps and exact duplicates.
    pub fn check(&self, t: u64) -> Result<(), SigningError> {
        let bucket = t / self.precision_ms;
        let mut b = self.inner.lock().expect("time-sequence filter mutex poisoned");

        if bucket > b.current_id || (b.current_id == 0 && b.current.is_empty() && b.previous.is_empty()) {
            if bucket > b.current_id {
                b.previous_id = b.current_id;
                b.previous = std::mem::take(&mut b.current);
                b.current_id = bucket;
            }
        }

        if bucket == b.current_id {
            if !b.current.insert(t) {
                return Err(SigningError::Duplicate);
            }
            Ok(())
        } else if bucket == b.previous_id {
            if !b.previous.insert(t) {
                return Err(SigningError::Duplicate);
            }
            Ok(())
        } else {
            Err(SigningError::TooOld)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_fresh_timestamps_in_same_bucket() {
        let filter = TimeSequenceFilter::new(1000);
        assert!(filter.check(500).is_ok());
        assert!(filter.check(501).is_ok());
    }

    #[test]
    fn rejects_exact_duplicate() {
        let filter = TimeSequenceFilter::new(1000);
        assert!(filter.check(500).is_ok());
        assert_eq!(filter.check(500), Err(SigningError::Duplicate));
    }

    #[test]
    fn accepts_previous_bucket_once_advanced() {
        let filter = TimeSequenceFilter::new(1000);
        assert!(filter.check(500).is_ok());
        // advance to next bucket
        assert!(filter.check(1500).is_ok());
        // a fresh timestamp in the now-previous bucket is still accepted
        assert!(filter.check(600).is_ok());
        // but a duplicate of the previous bucket's value is not
        assert_eq!(filter.check(500), Err(SigningError::Duplicate));
    }

    #[test]
    fn rejects_timestamp_older_than_both_buckets() {
        let filter = TimeSequenceFilter::new(1000);
        assert!(filter.check(5000).is_ok());
        assert!(filter.check(6000).is_ok());
        assert_eq!(filter.check(100), Err(SigningError::TooOld));
    }

    #[test]
    fn shuffled_batch_accepts_all_unique_within_window() {
        let filter = TimeSequenceFilter::new(1000);
        let mut values: Vec<u64> = (1000..1100).collect();
        // simple deterministic shuffle
        for i in 0..values.len() {
            let j = (i * 37 + 11) % values.len();
            values.swap(i, j);
        }
        let mut accepted = 0;
        for v in values {
            if filter.check(v).is_ok() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 100);
    }
}
