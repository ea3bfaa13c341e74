//! The `announce` ping: gossips reachability of one origin address
//! through the mesh via `RouterHopPing`/`RouterHopPingDeprecated`
//! frames, each carrying a signed chain of the hops it has travelled
//! through so far plus the origin's router info.
//!
//! Announces are flooded, not routed: every router that sees a fresher
//! (shorter hop-count) announcement for an origin re-announces it to
//! every other peer except the one it arrived on. Duplicate delivery of
//! the same announcement is expected and deliberately tolerated —
//! `MessageType::is_hop_ping` frames skip the usual immediate-duplicate
//! rejection during unseal.
//!
//! Each hop in the chain signs its own record, so a router that sees
//! its own address already present anywhere in the chain knows the
//! announcement looped back and drops it rather than re-flooding —
//! this is the loop-avoidance spec.md §1 calls out in place of full
//! routing consensus. A hop's signature is bound to the specific frame
//! that carried it (source address, signed timestamp, auth trailer) so
//! a captured record cannot be grafted verbatim onto an unrelated frame.

use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use tracing::trace;

use crate::address::{PublicAddress, SigningKeyType, PREFIX_BYTES};
use crate::config::Identity;
use crate::routing::RouteSource;

use super::cooldown::Cooldown;
use super::header::{random_nonzero_ping_id, PingHeader, PingHeaderError};
use super::registry::{PingContext, PingHandler, PingOutcome};
use super::PingError;

pub const PING_TYPE: &str = "announce";

/// A chain longer than this is rejected outright rather than re-flooded
///.
const MAX_HOPS: usize = 100;

/// How long a given (origin, hop_count) combination is suppressed from
/// re-triggering a re-flood; a practical rate-limit layered on top of
/// the signed-chain loop check, not a substitute for it.
const REFLOOD_COOLDOWN: Duration = Duration::from_secs(5);

/// How often a router re-floods a self-announce. `spawn_workers` repeats
/// `send_self_announce` on this period.
pub const ANNOUNCE_INTERVAL_SECS: u64 = 300;

/// An announce's stated expiry: 10s of slack beyond twice the announce
/// interval, so one missed re-announce does not immediately age out a
/// still-live router.
pub const ANNOUNCE_EXPIRY_SECS: u64 = 2 * ANNOUNCE_INTERVAL_SECS + 10;

/// The origin's identity as carried in an announce message, reconstructed
/// and verified the same way `PingHeader::bootstrap_address` bootstraps a
/// peer's identity from a ping's self-identifying fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RouterInfo {
    #[serde(rename = "a")]
    addr: [u8; 16],
    #[serde(rename = "k")]
    key: ByteBuf,
}

impl RouterInfo {
    fn from_identity(identity: &Identity) -> Self {
        Self {
            addr: identity.address.ip.octets(),
            key: ByteBuf::from(identity.address.public_key_bytes().to_vec()),
        }
    }

    /// Reconstructs and verifies the `PublicAddress` this info describes
    /// under `prefix`, rejecting it if the claimed address does not
    /// actually hash to the carried key.
    fn verify(&self, prefix: [u8; PREFIX_BYTES]) -> Option<PublicAddress> {
        let key_bytes = <[u8; 32]>::try_from(self.key.as_slice()).ok()?;
        let verifying_key = VerifyingKey::from_bytes(&key_bytes).ok()?;
        let candidate = PublicAddress::derive(SigningKeyType::Ed25519, verifying_key, prefix);
        if candidate.ip != Ipv6Addr::from(self.addr) {
            return None;
        }
        candidate.verify(prefix).ok()?;
        Some(candidate)
    }
}

/// One signed link in an announcement's travelled path. `forward_label`
/// and `return_label` are both the switch label the announcement
/// arrived on at this hop — the label a router further down the chain
/// needs to route a reply back through here. `delay` is this hop's
/// measured link latency in milliseconds; `next` is reserved, opaque
/// attachment data carried for a future hop to interpret but not
/// otherwise acted on here.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct HopRecord {
    #[serde(rename = "r")]
    router: [u8; 16],
    #[serde(rename = "k")]
    router_key: ByteBuf,
    #[serde(rename = "fl")]
    forward_label: u16,
    #[serde(rename = "rl")]
    return_label: u16,
    #[serde(rename = "d")]
    delay: u16,
    #[serde(rename = "n", default)]
    next: ByteBuf,
    /// The carrying frame's source address at the moment this hop
    /// signed, binding the record to that frame.
    #[serde(rename = "si")]
    src_ip: [u8; 16],
    /// The carrying frame's signed timestamp at the moment this hop
    /// signed.
    #[serde(rename = "st")]
    sequence_time_ms: u64,
    /// The carrying frame's auth trailer at the moment this hop signed.
    #[serde(rename = "fa")]
    frame_auth_data: ByteBuf,
    #[serde(rename = "s")]
    signature: ByteBuf,
}

impl HopRecord {
    #[allow(clippy::too_many_arguments)]
    fn signed_bytes(
        router: &[u8; 16],
        forward_label: u16,
        return_label: u16,
        delay: u16,
        next: &[u8],
        src_ip: &[u8; 16],
        sequence_time_ms: u64,
        frame_auth_data: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(16 + 2 + 2 + 2 + next.len() + 16 + 8 + frame_auth_data.len());
        buf.extend_from_slice(router);
        buf.extend_from_slice(&forward_label.to_be_bytes());
        buf.extend_from_slice(&return_label.to_be_bytes());
        buf.extend_from_slice(&delay.to_be_bytes());
        buf.extend_from_slice(next);
        buf.extend_from_slice(src_ip);
        buf.extend_from_slice(&sequence_time_ms.to_be_bytes());
        buf.extend_from_slice(frame_auth_data);
        buf
    }

    #[allow(clippy::too_many_arguments)]
    fn sign(
        identity: &Identity,
        forward_label: u16,
        return_label: u16,
        delay: u16,
        src_ip: Ipv6Addr,
        sequence_time_ms: u64,
        frame_auth_data: &[u8],
    ) -> Self {
        let router = identity.address.ip.octets();
        let src_ip = src_ip.octets();
        let next = Vec::new();
        let bytes = Self::signed_bytes(&router, forward_label, return_label, delay, &next, &src_ip, sequence_time_ms, frame_auth_data);
        let signature = identity.signing_key.sign(&bytes);
        Self {
            router,
            router_key: ByteBuf::from(identity.address.public_key_bytes().to_vec()),
            forward_label,
            return_label,
            delay,
            next: ByteBuf::from(next),
            src_ip,
            sequence_time_ms,
            frame_auth_data: ByteBuf::from(frame_auth_data.to_vec()),
            signature: ByteBuf::from(signature.to_bytes().to_vec()),
        }
    }

    fn verify(&self) -> bool {
        let Ok(key_bytes) = <[u8; 32]>::try_from(self.router_key.as_slice()) else {
            return false;
        };
        let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
            return false;
        };
        let Ok(sig_bytes) = <[u8; 64]>::try_from(self.signature.as_slice()) else {
            return false;
        };
        let signature = Signature::from_bytes(&sig_bytes);
        let bytes = Self::signed_bytes(
            &self.router,
            self.forward_label,
            self.return_label,
            self.delay,
            self.next.as_slice(),
            &self.src_ip,
            self.sequence_time_ms,
            self.frame_auth_data.as_slice(),
        );
        verifying_key.verify(&bytes, &signature).is_ok()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AnnounceBody {
    #[serde(rename = "o")]
    origin: [u8; 16],
    #[serde(rename = "i")]
    info: RouterInfo,
    #[serde(rename = "b")]
    return_label: u16,
    #[serde(rename = "e")]
    expires: u64,
    #[serde(rename = "h")]
    hops: Vec<HopRecord>,
}

pub struct AnnounceHandler {
    seen: Cooldown,
}

impl AnnounceHandler {
    pub fn new() -> Self {
        Self {
            seen: Cooldown::new(REFLOOD_COOLDOWN),
        }
    }

    /// Builds the first announcement a router sends about itself, with
    /// an empty hop chain (it is its own origin, zero hops away).
    /// `return_label` is the label this router's switch assigned the
    /// link the announcement is about to go out on, so the receiving
    /// peer knows what to use to route a reply back here.
    pub fn build_self_announce(identity: &Identity, return_label: u16, expires_at_ms: u64) -> Result<(PingHeader, Vec<u8>), PingError> {
        let body = AnnounceBody {
            origin: identity.address.ip.octets(),
            info: RouterInfo::from_identity(identity),
            return_label,
            expires: expires_at_ms,
            hops: Vec::new(),
        };
        encode(body)
    }
}

impl Default for AnnounceHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn encode(body: AnnounceBody) -> Result<(PingHeader, Vec<u8>), PingError> {
    let header = PingHeader::new(random_nonzero_ping_id(), PING_TYPE)?;
    let payload = serde_cbor::to_vec(&body).expect("serializable");
    Ok((header, payload))
}

#[async_trait]
impl PingHandler for AnnounceHandler {
    async fn handle(&self, _header: &PingHeader, body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError> {
        let body: AnnounceBody = serde_cbor::from_slice(body).map_err(PingHeaderError::from)?;
        let origin = Ipv6Addr::from(body.origin);

        if body.hops.len() > MAX_HOPS {
            trace!(origin = %origin, hops = body.hops.len(), "announce hop chain exceeds bound, dropping");
            return Ok(PingOutcome::None);
        }

        let self_octets = ctx.config.identity.address.ip.octets();
        for hop in &body.hops {
            if hop.router == self_octets {
                trace!(origin = %origin, "announce chain already carries this router, dropping loop");
                return Ok(PingOutcome::None);
            }
            if !hop.verify() {
                trace!(origin = %origin, "announce hop signature invalid, dropping");
                return Ok(PingOutcome::None);
            }
        }

        // Save the announced router info to state (spec.md §4.8 step 3),
        // provided it actually verifies and names the claimed origin.
        if let Some(info) = body.info.verify(ctx.config.overlay_prefix) {
            if info.ip == origin && body.expires > crate::time::now_ms() {
                let ttl_ms = body.expires - crate::time::now_ms();
                ctx.router_info.save(info, Instant::now() + Duration::from_millis(ttl_ms)).await;
            }
        }

        // The path back to origin is the reverse of the path it has
        // travelled so far, ending at the link this announcement just
        // arrived on.
        let mut return_path: Vec<u16> = body.hops.iter().rev().map(|h| h.return_label).collect();
        return_path.push(ctx.link.label());

        let our_delay = ctx.link.latency().map(|d| d.as_millis().min(u16::MAX as u128) as u16).unwrap_or(0);
        let total_delay: u16 = body
            .hops
            .iter()
            .fold(0u32, |acc, h| acc + h.delay as u32)
            .saturating_add(our_delay as u32)
            .min(u16::MAX as u32) as u16;

        let added = ctx
            .routing
            .add_route(origin, return_path, RouteSource::Announce, body.hops.len() as u8, total_delay)
            .await;
        if !added {
            trace!(origin = %origin, "announce did not improve on the known route, not re-flooding");
            return Ok(PingOutcome::None);
        }

        let hop_count = body.hops.len();
        if hop_count >= MAX_HOPS {
            trace!(origin = %origin, "announce reached max hop count, not re-flooding");
            return Ok(PingOutcome::None);
        }

        let tag = (hop_count as u32) ^ u32::from_be_bytes([body.origin[12], body.origin[13], body.origin[14], body.origin[15]]);
        if !self.seen.should_fire(origin, tag).await {
            return Ok(PingOutcome::None);
        }

        let inbound_label = ctx.link.label();
        let mut hops = body.hops;
        hops.push(HopRecord::sign(
            &ctx.config.identity,
            inbound_label,
            inbound_label,
            our_delay,
            ctx.from,
            ctx.sequence_time_ms,
            ctx.frame_auth_data,
        ));
        let forward = encode(AnnounceBody {
            origin: body.origin,
            info: body.info,
            return_label: body.return_label,
            expires: body.expires,
            hops,
        })?;

        Ok(PingOutcome::Flood {
            header: forward.0,
            body: forward.1,
            exclude_label: ctx.link.label(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::PREFIX_BYTES;
    use crate::config::Identity;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    const PREFIX: [u8; PREFIX_BYTES] = [0xfd, 0x00];

    fn signed_hop(identity: &Identity) -> HopRecord {
        HopRecord::sign(identity, 7, 9, 3, Ipv6Addr::LOCALHOST, 42, b"auth")
    }

    #[test]
    fn hop_record_signature_round_trips() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = Identity::new(signing_key, PREFIX);
        let hop = signed_hop(&identity);
        assert!(hop.verify());
    }

    #[test]
    fn tampered_hop_record_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = Identity::new(signing_key, PREFIX);
        let mut hop = signed_hop(&identity);
        hop.forward_label = 8;
        assert!(!hop.verify());
    }

    #[test]
    fn hop_record_bound_to_a_different_frame_fails_verification() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = Identity::new(signing_key, PREFIX);
        let mut hop = signed_hop(&identity);
        hop.sequence_time_ms = 43;
        assert!(!hop.verify());
    }

    #[test]
    fn self_announce_has_no_hops() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = Identity::new(signing_key, PREFIX);
        let (header, body) = AnnounceHandler::build_self_announce(&identity, 3, 1_000).unwrap();
        assert_eq!(header.ping_type, PING_TYPE);
        let decoded: AnnounceBody = serde_cbor::from_slice(&body).unwrap();
        assert!(decoded.hops.is_empty());
        assert_eq!(decoded.return_label, 3);
        assert_eq!(decoded.expires, 1_000);
        assert_eq!(Ipv6Addr::from(decoded.origin), identity.address.ip);
    }

    #[test]
    fn router_info_round_trips_through_verify() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let identity = Identity::new(signing_key, PREFIX);
        let info = RouterInfo::from_identity(&identity);
        let verified = info.verify(PREFIX).unwrap();
        assert_eq!(verified.ip, identity.address.ip);
    }
}
