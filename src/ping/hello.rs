//! The `hello` ping: X25519 key exchange that installs a session's AEAD
//! state.
//!
//! Client-side state per remote destination is `idle` (nothing in
//! `pending`), `pending` (a request is in flight, expiring after 30s),
//! or freshly `done` (the last exchange completed, during a 5s cool-down
//! before another may start). The server side is stateless: every
//! non-follow-up hello gets a fresh ephemeral exchange and an immediate
//! follow-up reply.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;
use sha3::{Digest, Sha3_256};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use x25519_dalek::PublicKey;

use crate::crypto::EphemeralKeyExchange;

use super::cooldown::Cooldown;
use super::header::{random_nonzero_ping_id, PingHeader, PingHeaderError};
use super::registry::{PingContext, PingHandler, PingOutcome};
use super::PingError;

pub const PING_TYPE: &str = "hello";
pub const KX_TYPE: &str = "x25519";

/// A pending client-side exchange expires after 30s with no reply
///.
const PENDING_EXPIRY: Duration = Duration::from_secs(30);
/// After a successful exchange, a fresh hello to the same peer is
/// suppressed for 5s.
const DONE_COOLDOWN: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum HelloError {
    #[error("a hello request is already active for this peer")]
    AlreadyActive,
    #[error(transparent)]
    Ping(#[from] PingError),
}

impl From<PingHeaderError> for HelloError {
    fn from(e: PingHeaderError) -> Self {
        HelloError::Ping(PingError::from(e))
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct HelloBody {
    #[serde(rename = "kx")]
    kx_key: ByteBuf,
    #[serde(rename = "kxt")]
    kx_type: String,
    mtu: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    err: Option<String>,
}

struct PendingHello {
    exchange: EphemeralKeyExchange,
    ping_id: u64,
    started_at: Instant,
}

fn derive_key(shared: &x25519_dalek::SharedSecret) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(shared.as_bytes());
    hasher.finalize().into()
}

/// Handles both sides of a hello exchange.
pub struct HelloHandler {
    pending: Mutex<HashMap<Ipv6Addr, PendingHello>>,
    done_cooldown: Cooldown,
}

impl HelloHandler {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
            done_cooldown: Cooldown::new(DONE_COOLDOWN),
        }
    }

    /// Builds the request a router sends to kick off a handshake with
    /// `peer`. Returns `AlreadyActive` if a request is already in flight
    /// and has not yet expired.
    pub async fn build_request(&self, peer: Ipv6Addr, local_mtu: u16) -> Result<(PingHeader, Vec<u8>), HelloError> {
        let mut pending = self.pending.lock().await;
        if let Some(p) = pending.get(&peer) {
            if p.started_at.elapsed() < PENDING_EXPIRY {
                return Err(HelloError::AlreadyActive);
            }
        }

        let exchange = EphemeralKeyExchange::generate();
        let ping_id = random_nonzero_ping_id();
        let body = HelloBody {
            kx_key: ByteBuf::from(exchange.public_key_bytes().to_vec()),
            kx_type: KX_TYPE.to_string(),
            mtu: local_mtu,
            err: None,
        };
        pending.insert(
            peer,
            PendingHello {
                exchange,
                ping_id,
                started_at: Instant::now(),
            },
        );
        drop(pending);

        let header = PingHeader::new(ping_id, PING_TYPE)?;
        let payload = serde_cbor::to_vec(&body).expect("serializable");
        Ok((header, payload))
    }
}

impl Default for HelloHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PingHandler for HelloHandler {
    async fn handle(&self, header: &PingHeader, body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError> {
        let body: HelloBody = serde_cbor::from_slice(body).map_err(PingHeaderError::from)?;
        let kx_bytes: [u8; 32] = body
            .kx_key
            .as_slice()
            .try_into()
            .map_err(|_| PingError::Protocol("hello kx key is not 32 bytes".into()))?;
        let peer_pub = PublicKey::from(kx_bytes);

        if !header.follow_up {
            // Server side: a fresh request from a peer we may or may not
            // already have signing state for.
            let exchange = EphemeralKeyExchange::generate();
            let response_pub = exchange.public_key_bytes();
            let shared = exchange
                .diffie_hellman(&peer_pub)
                .map_err(|_| PingError::Protocol("peer sent a low-order key exchange point".into()))?;
            ctx.session.install_encryption(derive_key(&shared));
            ctx.session.set_tunnel_mtu(body.mtu);
            debug!(peer = %ctx.from, "installed responder session key");

            let response = HelloBody {
                kx_key: ByteBuf::from(response_pub.to_vec()),
                kx_type: KX_TYPE.to_string(),
                mtu: ctx.config.tunnel_mtu,
                err: None,
            };
            let reply_header = PingHeader::new(header.ping_id, PING_TYPE)?.with_follow_up(true);
            let reply_payload = serde_cbor::to_vec(&response).expect("serializable");
            Ok(PingOutcome::Reply(reply_header, reply_payload))
        } else {
            // Client side: the matching response to a pending request.
            let mut pending = self.pending.lock().await;
            let Some(p) = pending.get(&ctx.from) else {
                debug!(peer = %ctx.from, "hello follow-up with no pending request, ignoring");
                return Ok(PingOutcome::None);
            };
            if p.ping_id != header.ping_id {
                debug!(peer = %ctx.from, "hello follow-up ping_id mismatch, ignoring");
                return Ok(PingOutcome::None);
            }
            // Removing here is the compare-and-set: only the first
            // matching follow-up observes `Some` and can complete the
            // exchange.
            let p = pending.remove(&ctx.from).expect("checked present above");
            drop(pending);

            let shared = p
                .exchange
                .diffie_hellman(&peer_pub)
                .map_err(|_| PingError::Protocol("peer sent a low-order key exchange point".into()))?;
            ctx.session.install_encryption(derive_key(&shared));
            ctx.session.set_tunnel_mtu(body.mtu);
            self.done_cooldown.should_fire(ctx.from, 0).await;
            debug!(peer = %ctx.from, "installed initiator session key");
            Ok(PingOutcome::None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_request_before_expiry_is_rejected() {
        let handler = HelloHandler::new();
        let peer = Ipv6Addr::LOCALHOST;
        assert!(handler.build_request(peer, 1400).await.is_ok());
        assert!(matches!(handler.build_request(peer, 1400).await, Err(HelloError::AlreadyActive)));
    }
}
