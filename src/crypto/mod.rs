//! Cryptographic primitives used by sessions and the frame codec: Ed25519
//! signing with a time-sequence replay filter, ChaCha20-Poly1305 AEAD with
//! a numeric-sequence replay filter, and X25519 key exchange.

pub mod aead;
pub mod kx;
pub mod signing;

pub use aead::{AeadError, AeadState, NumericSequenceFilter, SequenceClass, SequenceError};
pub use kx::{EphemeralKeyExchange, KxError};
pub use signing::{SigningError, TimeSequenceFilter};
