//! The handler registry pings are dispatched through.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::RouterConfig;
use crate::routing::{ConnectionStateTable, RouterInfoTable, RoutingTable};
use crate::session::Session;
use crate::switch::{PeerLink, Switch};

use super::header::PingHeader;
use super::PingError;

/// Everything a handler needs to act on one incoming ping, borrowed for
/// the duration of the dispatch call.
pub struct PingContext<'a> {
    pub from: Ipv6Addr,
    pub session: &'a Session,
    pub link: &'a Arc<dyn PeerLink>,
    pub routing: &'a RoutingTable,
    pub connections: &'a ConnectionStateTable,
    pub switch: &'a Switch,
    pub router_info: &'a RouterInfoTable,
    pub config: &'a RouterConfig,
    /// The carrying frame's signed timestamp, threaded through so a
    /// handler can bind a record it signs to the specific frame it
    /// arrived on (spec.md §4.8 step 1) without needing the frame itself.
    pub sequence_time_ms: u64,
    /// The carrying frame's auth trailer, for the same binding purpose.
    pub frame_auth_data: &'a [u8],
}

/// What a handler wants the router façade to do after it has updated its
/// own state. Handlers only ever compute; sending is the façade's job
/// (it alone holds the identity signing key and the buffer pool).
pub enum PingOutcome {
    /// Nothing further to send.
    None,
    /// Send `header`/`body` back out the link the triggering ping arrived on.
    Reply(PingHeader, Vec<u8>),
    /// Flood `header`/`body` to every registered link except
    /// `exclude_label` (the link it arrived on, to avoid reflecting it
    /// back).
    Flood { header: PingHeader, body: Vec<u8>, exclude_label: u16 },
}

#[async_trait]
pub trait PingHandler: Send + Sync {
    async fn handle(&self, header: &PingHeader, body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError>;
}

/// A name-keyed table of handlers, looked up by the incoming ping's
/// `ping_type`. Registration happens once at startup; lookups happen on
/// every received ping, so this stays a read-mostly `RwLock`.
pub struct HandlerRegistry {
    handlers: tokio::sync::RwLock<HashMap<String, Arc<dyn PingHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: tokio::sync::RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, ping_type: impl Into<String>, handler: Arc<dyn PingHandler>) {
        self.handlers.write().await.insert(ping_type.into(), handler);
    }

    pub async fn dispatch(&self, header: &PingHeader, body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers.get(&header.ping_type).cloned()
        };
        match handler {
            Some(handler) => handler.handle(header, body, ctx).await,
            None => Err(PingError::UnknownPingType(header.ping_type.clone())),
        }
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
