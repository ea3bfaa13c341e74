//! The `disconnect` ping: a polite notice that either the sending
//! router is going down entirely, or that one or more routers it could
//! previously reach have become unreachable through it.
//!
//! Receiving one drops any routes that pass through the named routers
//! immediately, rather than waiting for them to expire from the routing
//! table on their own. It is forwarded on to other peers only when it
//! actually changed something and the local router is not a stub (a
//! stub relies on upstream routers for gossip and never re-floods
//! control traffic of its own).

use std::net::Ipv6Addr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::header::{random_nonzero_ping_id, PingHeader, PingHeaderError};
use super::registry::{PingContext, PingHandler, PingOutcome};
use super::PingError;

pub const PING_TYPE: &str = "disconnect";

/// Why a disconnect ping was sent; only used to pick which body shape
/// `build` produces, not carried on the wire itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// This router is shutting down; every peer should drop all routes
    /// that led through it.
    GoingDown,
    /// One specific peer link dropped; only routes through that peer
    /// need to go.
    PeerLost(Ipv6Addr),
}

#[derive(Debug, Serialize, Deserialize)]
struct DisconnectBody {
    #[serde(rename = "off", default)]
    going_down: bool,
    #[serde(rename = "d", default)]
    disconnected: Vec<[u8; 16]>,
}

pub struct DisconnectHandler;

impl DisconnectHandler {
    /// Builds the ping body for `reason`. For `GoingDown` the affected
    /// router is implicit: it is whoever the frame's `src` turns out to
    /// be, i.e. the sender itself. For `PeerLost`, the affected router
    /// is named explicitly so it can be forwarded on by routers that
    /// never had a direct link to it.
    pub fn build(reason: DisconnectReason) -> Result<(PingHeader, Vec<u8>), PingError> {
        let body = match reason {
            DisconnectReason::GoingDown => DisconnectBody { going_down: true, disconnected: Vec::new() },
            DisconnectReason::PeerLost(peer) => DisconnectBody {
                going_down: false,
                disconnected: vec![peer.octets()],
            },
        };
        let header = PingHeader::new(random_nonzero_ping_id(), PING_TYPE)?;
        let payload = serde_cbor::to_vec(&body).expect("serializable");
        Ok((header, payload))
    }
}

#[async_trait]
impl PingHandler for DisconnectHandler {
    async fn handle(&self, _header: &PingHeader, body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError> {
        let body: DisconnectBody = serde_cbor::from_slice(body).map_err(PingHeaderError::from)?;

        let affected: Vec<Ipv6Addr> = if body.going_down {
            vec![ctx.from]
        } else {
            body.disconnected.into_iter().map(Ipv6Addr::from).collect()
        };

        let mut removed = 0usize;
        for router in &affected {
            removed += ctx.routing.remove_disconnected(router, Some(ctx.from)).await;
            if body.going_down && *router == ctx.from {
                info!(router = %router, "peer reported going down");
            }
        }

        if removed == 0 || ctx.config.stub {
            return Ok(PingOutcome::None);
        }

        let forward_body = DisconnectBody {
            going_down: body.going_down,
            disconnected: affected.iter().map(|a| a.octets()).collect(),
        };
        let header = PingHeader::new(random_nonzero_ping_id(), PING_TYPE)?;
        let payload = serde_cbor::to_vec(&forward_body).expect("serializable");
        Ok(PingOutcome::Flood { header, body: payload, exclude_label: ctx.link.label() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn going_down_body_carries_no_explicit_list() {
        let (header, body) = DisconnectHandler::build(DisconnectReason::GoingDown).unwrap();
        assert_eq!(header.ping_type, PING_TYPE);
        let decoded: DisconnectBody = serde_cbor::from_slice(&body).unwrap();
        assert!(decoded.going_down);
        assert!(decoded.disconnected.is_empty());
    }

    #[test]
    fn peer_lost_body_names_the_peer() {
        let peer = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2);
        let (_, body) = DisconnectHandler::build(DisconnectReason::PeerLost(peer)).unwrap();
        let decoded: DisconnectBody = serde_cbor::from_slice(&body).unwrap();
        assert!(!decoded.going_down);
        assert_eq!(decoded.disconnected, vec![peer.octets()]);
    }
}
