//! Node identity: a (public key, IPv6 address) pair whose low bits are
//! derived by hashing the public key.

use std::net::Ipv6Addr;

use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use thiserror::Error;

/// Number of leading bytes of an overlay address reserved for the
/// configured prefix; the remaining bytes are the hash of the public key.
pub const PREFIX_BYTES: usize = 2;

#[derive(Debug, Error)]
pub enum AddressError {
    #[error("public key does not hash to the claimed address")]
    HashMismatch,
    #[error("address does not fall under the configured overlay prefix")]
    PrefixMismatch,
    #[error("unsupported signing key type {0}")]
    UnsupportedKeyType(u8),
}

/// Signing key algorithm recorded alongside an address. Only `Ed25519` is
/// implemented; the type is kept open-ended so a future algorithm can be
/// added without breaking the wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum SigningKeyType {
    Ed25519 = 0,
}

impl SigningKeyType {
    pub fn from_u8(v: u8) -> Result<Self, AddressError> {
        match v {
            0 => Ok(SigningKeyType::Ed25519),
            other => Err(AddressError::UnsupportedKeyType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

/// A node's identity: its Ed25519 public key, signing key type, and the
/// overlay IPv6 address derived from that key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAddress {
    pub key_type: SigningKeyType,
    pub public_key: VerifyingKey,
    pub ip: Ipv6Addr,
}

impl PublicAddress {
    /// Derives the overlay IPv6 address for `public_key` under `prefix`.
    ///
    /// `prefix` supplies the top `PREFIX_BYTES` bytes (the overlay's well
    /// known range); the remaining 14 bytes are the low bytes of
    /// `sha3_256(public_key)`.
    pub fn derive(key_type: SigningKeyType, public_key: VerifyingKey, prefix: [u8; PREFIX_BYTES]) -> Self {
        let ip = derive_ip(&public_key, prefix);
        Self {
            key_type,
            public_key,
            ip,
        }
    }

    /// Recomputes the hash of `public_key` and checks it matches `ip`'s low
    /// bits, and that `ip` falls under `prefix`.
    pub fn verify(&self, prefix: [u8; PREFIX_BYTES]) -> Result<(), AddressError> {
        let octets = self.ip.octets();
        if octets[..PREFIX_BYTES] != prefix {
            return Err(AddressError::PrefixMismatch);
        }
        let expected = derive_ip(&self.public_key, prefix);
        if expected != self.ip {
            return Err(AddressError::HashMismatch);
        }
        Ok(())
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key.to_bytes()
    }
}

fn derive_ip(public_key: &VerifyingKey, prefix: [u8; PREFIX_BYTES]) -> Ipv6Addr {
    let digest = Sha3_256::digest(public_key.as_bytes());
    let mut octets = [0u8; 16];
    octets[..PREFIX_BYTES].copy_from_slice(&prefix);
    octets[PREFIX_BYTES..].copy_from_slice(&digest[..16 - PREFIX_BYTES]);
    Ipv6Addr::from(octets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    const PREFIX: [u8; PREFIX_BYTES] = [0xfd, 0x00];

    #[test]
    fn derive_and_verify_round_trip() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let addr = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        assert!(addr.verify(PREFIX).is_ok());
    }

    #[test]
    fn tampered_address_fails_verification() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let mut addr = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        let mut octets = addr.ip.octets();
        octets[15] ^= 0xff;
        addr.ip = Ipv6Addr::from(octets);
        assert!(matches!(addr.verify(PREFIX), Err(AddressError::HashMismatch)));
    }

    #[test]
    fn wrong_prefix_is_rejected() {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        let addr = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        assert!(matches!(addr.verify([0xfe, 0x00]), Err(AddressError::PrefixMismatch)));
    }
}
