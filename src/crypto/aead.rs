//! ChaCha20-Poly1305 AEAD state and the numeric-sequence replay filter
//! that rejects delayed and duplicate frames.

use std::collections::HashSet;
use std::sync::Mutex;

use chacha20poly1305::aead::{Aead, KeyInit, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use thiserror::Error;

use crate::frame::layout::AEAD_NONCE_LEN;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SequenceError {
    #[error("delayed frame")]
    DelayedFrame,
    #[error("delayed duplicate frame")]
    DelayedDuplicateFrame,
    #[error("immediate duplicate frame")]
    ImmediateDuplicateFrame,
}

#[derive(Debug, Error)]
pub enum AeadError {
    #[error("seal/open failed")]
    CryptoFailure,
    #[error("sequence rejected: {0}")]
    Sequence(#[from] SequenceError),
}

/// Which sequence space a frame's numbers are drawn from; priority and
/// bulk traffic keep independent counters and windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceClass {
    Priority,
    Bulk,
}

const WINDOW: u64 = 256;

/// Sliding-window replay filter over a monotonic sequence number space.
/// Accepts numbers ahead of the current high-water mark unconditionally
/// (advancing the window), and numbers inside the window only once.
pub struct NumericSequenceFilter {
    inner: Mutex<Window>,
}

struct Window {
    highest: u64,
    seen: HashSet<u64>,
}

impl NumericSequenceFilter {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Window {
                highest: 0,
                seen: HashSet::new(),
            }),
        }
    }

    pub fn check(&self, n: u64) -> Result<(), SequenceError> {
        let mut w = self.inner.lock().expect("sequence filter mutex poisoned");

        if n > w.highest {
            let advance = n - w.highest;
            if advance < WINDOW {
                // shift the window; numbers that fall out are forgotten
                let cutoff = n.saturating_sub(WINDOW);
                w.seen.retain(|v| *v > cutoff);
            } else {
                w.seen.clear();
            }
            w.highest = n;
            w.seen.insert(n);
            return Ok(());
        }

        if n == w.highest {
            return Err(SequenceError::ImmediateDuplicateFrame);
        }

        if w.highest - n >= WINDOW {
            return Err(SequenceError::DelayedFrame);
        }

        if !w.seen.insert(n) {
            return Err(SequenceError::DelayedDuplicateFrame);
        }
        Ok(())
    }
}

impl Default for NumericSequenceFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// A single ChaCha20-Poly1305 key paired with a monotonic outbound
/// counter. One instance exists per session per `SequenceClass`.
pub struct AeadState {
    cipher: ChaCha20Poly1305,
    next_seq: Mutex<u64>,
}

impl AeadState {
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(Key::from_slice(key)),
            next_seq: Mutex::new(0),
        }
    }

    /// Allocates the next outbound sequence number for this state.
    pub fn next_sequence(&self) -> u64 {
        let mut n = self.next_seq.lock().expect("aead sequence mutex poisoned");
        let v = *n;
        *n += 1;
        v
    }

    pub fn seal(&self, nonce_bytes: &[u8; AEAD_NONCE_LEN], aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, AeadError> {
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|_| AeadError::CryptoFailure)
    }

    pub fn open(&self, nonce_bytes: &[u8; AEAD_NONCE_LEN], aad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, AeadError> {
        let nonce = Nonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, Payload { msg: ciphertext, aad })
            .map_err(|_| AeadError::CryptoFailure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open_round_trip() {
        let state = AeadState::new(&[7u8; 32]);
        let nonce = [1u8; AEAD_NONCE_LEN];
        let ct = state.seal(&nonce, b"aad", b"hello").unwrap();
        let pt = state.open(&nonce, b"aad", &ct).unwrap();
        assert_eq!(pt, b"hello");
    }

    #[test]
    fn mismatched_aad_fails_to_open() {
        let state = AeadState::new(&[7u8; 32]);
        let nonce = [1u8; AEAD_NONCE_LEN];
        let ct = state.seal(&nonce, b"aad-a", b"hello").unwrap();
        assert!(state.open(&nonce, b"aad-b", &ct).is_err());
    }

    #[test]
    fn sequence_advances_and_rejects_repeats() {
        let filter = NumericSequenceFilter::new();
        assert!(filter.check(0).is_ok());
        assert!(filter.check(1).is_ok());
        assert_eq!(filter.check(1), Err(SequenceError::ImmediateDuplicateFrame));
        assert!(filter.check(3).is_ok());
        // 2 now falls inside the window, previously unseen
        assert!(filter.check(2).is_ok());
        assert_eq!(filter.check(2), Err(SequenceError::DelayedDuplicateFrame));
    }

    #[test]
    fn sequence_rejects_frame_outside_window() {
        let filter = NumericSequenceFilter::new();
        filter.check(1000).unwrap();
        assert_eq!(filter.check(1), Err(SequenceError::DelayedFrame));
    }

    #[test]
    fn sequence_under_shuffle_accepts_majority_and_flags_duplicates() {
        let filter = NumericSequenceFilter::new();
        let mut seq: Vec<u64> = Vec::new();
        let mut n = 0u64;
        for batch in 0..100 {
            for i in 0..100u64 {
                seq.push(n);
                if i % 10 == 0 && n > 0 {
                    seq.push(n - 1); // duplicate every 10th
                }
                n += 1;
            }
            let _ = batch;
        }
        // deterministic shuffle
        for i in 0..seq.len() {
            let j = (i * 2654435761u64 as usize + 7) % seq.len();
            seq.swap(i, j);
        }

        let mut accepted = 0;
        let mut saw_delayed = false;
        let mut saw_delayed_dup = false;
        for v in seq {
            match filter.check(v) {
                Ok(()) => accepted += 1,
                Err(SequenceError::DelayedFrame) => saw_delayed = true,
                Err(SequenceError::DelayedDuplicateFrame) => saw_delayed_dup = true,
                Err(SequenceError::ImmediateDuplicateFrame) => {}
            }
        }
        assert!(accepted >= 65 * 100, "expected most frames accepted, got {accepted}");
        assert!(saw_delayed || saw_delayed_dup);
    }
}
