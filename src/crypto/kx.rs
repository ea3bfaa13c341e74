//! X25519 ephemeral key exchange.

use rand_core::OsRng;
use thiserror::Error;
use x25519_dalek::{EphemeralSecret, PublicKey, SharedSecret};

#[derive(Debug, Error)]
pub enum KxError {
    #[error("peer public key is all-zero (low-order point)")]
    LowOrderPoint,
}

/// One side of an ephemeral Diffie-Hellman exchange. Consumed on use:
/// deriving the shared secret takes `self` so the ephemeral scalar can
/// never be reused.
pub struct EphemeralKeyExchange {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeyExchange {
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public.to_bytes()
    }

    /// Derives the shared secret against a peer's public key, consuming
    /// this exchange so it cannot be reused for a second derivation.
    pub fn diffie_hellman(self, peer_public: &PublicKey) -> Result<SharedSecret, KxError> {
        if peer_public.as_bytes().iter().all(|b| *b == 0) {
            return Err(KxError::LowOrderPoint);
        }
        Ok(self.secret.diffie_hellman(peer_public))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn both_sides_derive_the_same_shared_secret() {
        let a = EphemeralKeyExchange::generate();
        let b = EphemeralKeyExchange::generate();
        let a_pub = a.public_key();
        let b_pub = b.public_key();

        let shared_a = a.diffie_hellman(&b_pub).unwrap();
        let shared_b = b.diffie_hellman(&a_pub).unwrap();
        assert_eq!(shared_a.as_bytes(), shared_b.as_bytes());
    }

    #[test]
    fn all_zero_peer_key_is_rejected() {
        let a = EphemeralKeyExchange::generate();
        let zero = PublicKey::from([0u8; 32]);
        assert!(a.diffie_hellman(&zero).is_err());
    }
}
