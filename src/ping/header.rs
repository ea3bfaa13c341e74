//! The CBOR envelope every ping frame's body opens with, followed by a handler-specific payload the envelope
//! does not interpret.
//!
//! Wire shape: `u8 version(=1) | u8 hdr_len | cbor(header)
//! | payload`. The header alone carries enough to dispatch (`ping_type`),
//! correlate request/response (`ping_id`, `follow_up`), and bootstrap an
//! unknown peer's session (`addr_hash`, `key_type`, `public_key`) without
//! the handler needing to parse its own payload first.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use thiserror::Error;
use sha3::{Digest, Sha3_256};

use crate::address::{AddressError, PublicAddress, SigningKeyType, PREFIX_BYTES};

pub const PING_BODY_VERSION: u8 = 1;
const MAX_PING_TYPE_LEN: usize = 64;
const MAX_HEADER_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum PingHeaderError {
    #[error("ping_type is empty")]
    Empty,
    #[error("ping_type exceeds {MAX_PING_TYPE_LEN} characters")]
    TooLong,
    #[error("ping_type contains a character outside [a-z0-9.]")]
    InvalidCharacter,
    #[error("ping_id is zero")]
    ZeroPingId,
    #[error("encoded header exceeds {MAX_HEADER_LEN} bytes")]
    HeaderTooLong,
    #[error("ping body shorter than the version+length prefix")]
    Truncated,
    #[error("unsupported ping body version {0}")]
    UnsupportedVersion(u8),
    #[error("cbor encode/decode failed: {0}")]
    Cbor(#[from] serde_cbor::Error),
}

/// Validates a ping-type string against the handler-registry naming
/// convention `^[a-z0-9.]+$`.
pub fn validate_ping_type(s: &str) -> Result<(), PingHeaderError> {
    if s.is_empty() {
        return Err(PingHeaderError::Empty);
    }
    if s.len() > MAX_PING_TYPE_LEN {
        return Err(PingHeaderError::TooLong);
    }
    if !s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '.') {
        return Err(PingHeaderError::InvalidCharacter);
    }
    Ok(())
}

/// Draws a random nonzero ping id.
pub fn random_nonzero_ping_id() -> u64 {
    loop {
        let v = rand::thread_rng().next_u64();
        if v != 0 {
            return v;
        }
    }
}

/// The envelope carried at the front of a `RouterPing`/`RouterHopPing`
/// frame's message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingHeader {
    #[serde(rename = "i")]
    pub ping_id: u64,
    #[serde(rename = "t")]
    pub ping_type: String,
    #[serde(rename = "c", default)]
    pub ping_code: u8,
    #[serde(rename = "f", default)]
    pub follow_up: bool,
    #[serde(rename = "h", default, skip_serializing_if = "Option::is_none")]
    pub addr_hash: Option<ByteBuf>,
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub key_type: Option<String>,
    #[serde(rename = "k", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<ByteBuf>,
}

impl PingHeader {
    pub fn new(ping_id: u64, ping_type: impl Into<String>) -> Result<Self, PingHeaderError> {
        let ping_type = ping_type.into();
        validate_ping_type(&ping_type)?;
        if ping_id == 0 {
            return Err(PingHeaderError::ZeroPingId);
        }
        Ok(Self {
            ping_id,
            ping_type,
            ping_code: 0,
            follow_up: false,
            addr_hash: None,
            key_type: None,
            public_key: None,
        })
    }

    pub fn with_follow_up(mut self, follow_up: bool) -> Self {
        self.follow_up = follow_up;
        self
    }

    pub fn with_code(mut self, code: u8) -> Self {
        self.ping_code = code;
        self
    }

    /// Attaches this router's own identity so a peer that does not yet
    /// have a session for us can bootstrap one straight from the ping
    ///.
    pub fn with_identity(mut self, identity: &PublicAddress) -> Self {
        let hash = Sha3_256::digest(identity.public_key.as_bytes());
        self.addr_hash = Some(ByteBuf::from(hash.to_vec()));
        self.key_type = Some(key_type_name(identity.key_type).to_string());
        self.public_key = Some(ByteBuf::from(identity.public_key_bytes().to_vec()));
        self
    }

    /// Reconstructs the sender's `PublicAddress` from this header's
    /// self-identifying fields, verifying it against `claimed_src` (the
    /// frame's own source address) and the locally configured overlay
    /// prefix. `None` if the header carries no identity fields or the
    /// reconstructed address does not match.
    pub fn bootstrap_address(&self, claimed_src: std::net::Ipv6Addr, prefix: [u8; PREFIX_BYTES]) -> Option<PublicAddress> {
        let key_type = self.key_type.as_deref()?;
        let public_key_bytes = self.public_key.as_ref()?;
        let key_type = key_type_from_name(key_type)?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(
            public_key_bytes.as_slice().try_into().ok()?,
        )
        .ok()?;
        let candidate = PublicAddress::derive(key_type, verifying_key, prefix);
        if candidate.ip != claimed_src {
            return None;
        }
        match candidate.verify(prefix) {
            Ok(()) => Some(candidate),
            Err(AddressError::HashMismatch | AddressError::PrefixMismatch | AddressError::UnsupportedKeyType(_)) => None,
        }
    }

    /// Encodes `[version, hdr_len, cbor(header), payload...]`.
    pub fn encode_body(&self, payload: &[u8]) -> Result<Vec<u8>, PingHeaderError> {
        let hdr_bytes = serde_cbor::to_vec(self)?;
        if hdr_bytes.len() > MAX_HEADER_LEN {
            return Err(PingHeaderError::HeaderTooLong);
        }
        let mut out = Vec::with_capacity(2 + hdr_bytes.len() + payload.len());
        out.push(PING_BODY_VERSION);
        out.push(hdr_bytes.len() as u8);
        out.extend_from_slice(&hdr_bytes);
        out.extend_from_slice(payload);
        Ok(out)
    }

    /// Splits a frame's message payload into `(header, remaining payload)`.
    pub fn decode_body(bytes: &[u8]) -> Result<(Self, &[u8]), PingHeaderError> {
        if bytes.len() < 2 {
            return Err(PingHeaderError::Truncated);
        }
        let version = bytes[0];
        if version != PING_BODY_VERSION {
            return Err(PingHeaderError::UnsupportedVersion(version));
        }
        let hdr_len = bytes[1] as usize;
        if bytes.len() < 2 + hdr_len {
            return Err(PingHeaderError::Truncated);
        }
        let header: Self = serde_cbor::from_slice(&bytes[2..2 + hdr_len])?;
        validate_ping_type(&header.ping_type)?;
        Ok((header, &bytes[2 + hdr_len..]))
    }
}

fn key_type_name(t: SigningKeyType) -> &'static str {
    match t {
        SigningKeyType::Ed25519 => "ed25519",
    }
}

fn key_type_from_name(s: &str) -> Option<SigningKeyType> {
    match s {
        "ed25519" => Some(SigningKeyType::Ed25519),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    const PREFIX: [u8; PREFIX_BYTES] = [0xfd, 0x00];

    #[test]
    fn valid_ping_types_are_accepted() {
        assert!(validate_ping_type("hello").is_ok());
        assert!(validate_ping_type("router.hop.announce").is_ok());
        assert!(validate_ping_type("a2.b").is_ok());
    }

    #[test]
    fn empty_or_malformed_types_are_rejected() {
        assert!(validate_ping_type("").is_err());
        assert!(validate_ping_type("Hello").is_err());
        assert!(validate_ping_type("hello_world").is_err());
        assert!(validate_ping_type("hello world").is_err());
    }

    #[test]
    fn header_and_payload_round_trip_through_the_wire_shape() {
        let header = PingHeader::new(42, "hello").unwrap().with_follow_up(true);
        let body = header.encode_body(b"payload bytes").unwrap();
        let (decoded, payload) = PingHeader::decode_body(&body).unwrap();
        assert_eq!(decoded.ping_id, 42);
        assert_eq!(decoded.ping_type, "hello");
        assert!(decoded.follow_up);
        assert_eq!(payload, b"payload bytes");
    }

    #[test]
    fn zero_ping_id_is_rejected() {
        assert!(matches!(PingHeader::new(0, "hello"), Err(PingHeaderError::ZeroPingId)));
    }

    #[test]
    fn identity_round_trips_through_bootstrap() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        let header = PingHeader::new(1, "hello").unwrap().with_identity(&identity);
        let bootstrapped = header.bootstrap_address(identity.ip, PREFIX).unwrap();
        assert_eq!(bootstrapped.ip, identity.ip);
        assert_eq!(bootstrapped.public_key, identity.public_key);
    }

    #[test]
    fn bootstrap_rejects_mismatched_source() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        let header = PingHeader::new(1, "hello").unwrap().with_identity(&identity);
        let other = SigningKey::generate(&mut OsRng);
        let other_identity = PublicAddress::derive(SigningKeyType::Ed25519, other.verifying_key(), PREFIX);
        assert!(header.bootstrap_address(other_identity.ip, PREFIX).is_none());
    }
}
