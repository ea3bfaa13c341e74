//! The `pingpong` keepalive: a bare round-trip used to detect a dead
//! link faster than the underlying transport would on its own.
//!
//! The client side tracks one outstanding ping per peer so the
//! keepalive worker can await completion (or time out) without its own
//! bookkeeping; `retry_id` lets a caller that is re-pinging the same
//! peer before the previous attempt expired measure latency from the
//! *first* attempt rather than restarting the clock.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::trace;

use super::header::{random_nonzero_ping_id, PingHeader};
use super::registry::{PingContext, PingHandler, PingOutcome};
use super::PingError;

pub const PING_TYPE: &str = "pingpong";

struct Pending {
    ping_id: u64,
    started_at: Instant,
    notify: Arc<Notify>,
}

/// What `send` hands back to its caller: a notify that fires once the
/// matching follow-up pong arrives, and the ping id sent (for passing
/// back in as `retry_id` on the next attempt).
pub struct PingPongRequest {
    pub header: PingHeader,
    pub body: Vec<u8>,
    pub notify: Arc<Notify>,
    pub ping_id: u64,
}

pub struct PingPongHandler {
    pending: Mutex<HashMap<Ipv6Addr, Pending>>,
}

impl PingPongHandler {
    pub fn new() -> Self {
        Self { pending: Mutex::new(HashMap::new()) }
    }

    /// Builds a keepalive request to `peer`. If `retry_id` names a
    /// still-pending request to the same peer, its notify and start
    /// time are reused instead of starting a fresh one.
    pub async fn send(&self, peer: Ipv6Addr, retry_id: Option<u64>) -> Result<PingPongRequest, PingError> {
        let mut pending = self.pending.lock().await;
        if let Some(retry_id) = retry_id {
            if let Some(p) = pending.get(&peer) {
                if p.ping_id == retry_id {
                    let header = PingHeader::new(p.ping_id, PING_TYPE)?;
                    return Ok(PingPongRequest { header, body: Vec::new(), notify: p.notify.clone(), ping_id: p.ping_id });
                }
            }
        }

        let ping_id = random_nonzero_ping_id();
        let notify = Arc::new(Notify::new());
        pending.insert(peer, Pending { ping_id, started_at: Instant::now(), notify: notify.clone() });
        let header = PingHeader::new(ping_id, PING_TYPE)?;
        Ok(PingPongRequest { header, body: Vec::new(), notify, ping_id })
    }

    /// Drops a pending request without waiting for its reply, e.g. once
    /// the keepalive worker has given up on it.
    pub async fn cancel(&self, peer: Ipv6Addr, ping_id: u64) {
        let mut pending = self.pending.lock().await;
        if pending.get(&peer).is_some_and(|p| p.ping_id == ping_id) {
            pending.remove(&peer);
        }
    }
}

impl Default for PingPongHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PingHandler for PingPongHandler {
    async fn handle(&self, header: &PingHeader, _body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError> {
        if header.follow_up {
            let mut pending = self.pending.lock().await;
            match pending.get(&ctx.from) {
                Some(p) if p.ping_id == header.ping_id => {
                    trace!(peer = %ctx.from, ping_id = header.ping_id, latency = ?p.started_at.elapsed(), "keepalive pong received");
                    let p = pending.remove(&ctx.from).expect("checked present above");
                    p.notify.notify_waiters();
                }
                _ => trace!(peer = %ctx.from, ping_id = header.ping_id, "keepalive pong with no matching pending request, ignoring"),
            }
            Ok(PingOutcome::None)
        } else {
            trace!(peer = %ctx.from, ping_id = header.ping_id, "keepalive ping received, replying");
            let reply = PingHeader::new(header.ping_id, PING_TYPE)?.with_follow_up(true);
            Ok(PingOutcome::Reply(reply, Vec::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn retry_id_reuses_the_pending_notify() {
        let handler = PingPongHandler::new();
        let peer = Ipv6Addr::LOCALHOST;
        let first = handler.send(peer, None).await.unwrap();
        let second = handler.send(peer, Some(first.ping_id)).await.unwrap();
        assert_eq!(first.ping_id, second.ping_id);
        assert!(Arc::ptr_eq(&first.notify, &second.notify));
    }

    #[tokio::test]
    async fn unmatched_retry_id_starts_fresh() {
        let handler = PingPongHandler::new();
        let peer = Ipv6Addr::LOCALHOST;
        let first = handler.send(peer, None).await.unwrap();
        let second = handler.send(peer, Some(first.ping_id.wrapping_add(1))).await.unwrap();
        assert_ne!(first.ping_id, second.ping_id);
    }
}
