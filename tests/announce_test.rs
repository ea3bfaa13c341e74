//! Black-box announce gossip: a three-router chain (origin -> relay ->
//! edge) exercising loop detection, route installation, and re-flood
//! suppression once a chain no longer improves on what is already known.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use mycoria_core::address::PREFIX_BYTES;
use mycoria_core::config::{AllowAll, Identity, RouterConfig};
use mycoria_core::frame::Frame;
use mycoria_core::ping::announce::AnnounceHandler;
use mycoria_core::ping::{PingContext, PingOutcome};
use mycoria_core::routing::{ConnectionStateTable, RouterInfoTable, RoutingTable};
use mycoria_core::session::Session;
use mycoria_core::switch::{LinkError, PeerLink, Switch};
use rand::rngs::OsRng;

const PREFIX: [u8; PREFIX_BYTES] = [0xfd, 0x00];

struct NullLink(u16);

#[async_trait]
impl PeerLink for NullLink {
    fn label(&self) -> u16 {
        self.0
    }
    fn is_originator(&self) -> bool {
        true
    }
    fn local_addr(&self) -> SocketAddr {
        "[::1]:0".parse().unwrap()
    }
    fn remote_addr(&self) -> SocketAddr {
        "[::1]:0".parse().unwrap()
    }
    fn latency(&self) -> Option<Duration> {
        None
    }
    fn flow_control_active(&self) -> bool {
        false
    }
    fn is_closing(&self) -> bool {
        false
    }
    async fn send_priority(&self, _frame: Frame) -> Result<(), LinkError> {
        Ok(())
    }
    async fn send_bulk(&self, _frame: Frame) -> Result<(), LinkError> {
        Ok(())
    }
}

struct Node {
    config: RouterConfig,
    session: Session,
    routing: RoutingTable,
    connections: ConnectionStateTable,
    switch: Switch,
    router_info: RouterInfoTable,
    announce: AnnounceHandler,
}

impl Node {
    fn new() -> Self {
        let identity = Identity::new(SigningKey::generate(&mut OsRng), PREFIX);
        let self_address = identity.address.ip;
        let mut config = RouterConfig::new(identity, PREFIX);
        config.inbound_policy = Arc::new(AllowAll);
        Self {
            config,
            session: Session::new(1400),
            routing: RoutingTable::new(Duration::from_secs(600)),
            connections: ConnectionStateTable::new(),
            switch: Switch::new(self_address),
            router_info: RouterInfoTable::new(),
            announce: AnnounceHandler::new(),
        }
    }

    fn context<'a>(&'a self, from: std::net::Ipv6Addr, link: &'a Arc<dyn PeerLink>) -> PingContext<'a> {
        PingContext {
            from,
            session: &self.session,
            link,
            routing: &self.routing,
            connections: &self.connections,
            switch: &self.switch,
            router_info: &self.router_info,
            config: &self.config,
            sequence_time_ms: 0,
            frame_auth_data: &[],
        }
    }
}

#[tokio::test]
async fn announce_propagates_across_a_relay_and_installs_a_return_route() {
    let origin = Node::new();
    let relay = Node::new();
    let edge = Node::new();

    let origin_addr = origin.config.identity.address.ip;
    let inbound_link: Arc<dyn PeerLink> = Arc::new(NullLink(9));

    let (header, body) = AnnounceHandler::build_self_announce(&origin.config.identity, 1, 1_000_000_000).unwrap();

    // Relay receives origin's self-announce over `inbound_link` and
    // re-floods it with its own hop appended.
    let relay_ctx = relay.context(origin_addr, &inbound_link);
    let outcome = relay.announce.handle(&header, &body, &relay_ctx).await.unwrap();
    let (relayed_header, relayed_body) = match outcome {
        PingOutcome::Flood { header, body, .. } => (header, body),
        _ => panic!("expected the relay to re-flood a fresh announce"),
    };
    assert!(relay.routing.lookup_nearest(&origin_addr).await.is_some());

    // Edge receives the relayed announce over a different link and
    // installs its own return route back to origin.
    let edge_inbound: Arc<dyn PeerLink> = Arc::new(NullLink(3));
    let edge_ctx = edge.context(relay.config.identity.address.ip, &edge_inbound);
    let outcome = edge.announce.handle(&relayed_header, &relayed_body, &edge_ctx).await.unwrap();
    assert!(matches!(outcome, PingOutcome::Flood { .. }));
    let route = edge.routing.lookup_nearest(&origin_addr).await.unwrap();
    assert_eq!(route.switch_path.last().copied(), Some(3));
    assert_eq!(route.hop_count, 1);
}

#[tokio::test]
async fn announce_carrying_a_known_router_is_dropped_as_a_loop() {
    let origin = Node::new();
    let relay = Node::new();

    let origin_addr = origin.config.identity.address.ip;
    let link: Arc<dyn PeerLink> = Arc::new(NullLink(1));

    let (header, body) = AnnounceHandler::build_self_announce(&origin.config.identity, 1, 1_000_000_000).unwrap();
    let relay_ctx = relay.context(origin_addr, &link);
    let outcome = relay.announce.handle(&header, &body, &relay_ctx).await.unwrap();
    let (relayed_header, relayed_body) = match outcome {
        PingOutcome::Flood { header, body, .. } => (header, body),
        _ => panic!("expected a re-flood"),
    };

    // Feeding the relayed announce straight back to the relay itself
    // means its own hop record is already in the chain: the loop guard
    // must drop it rather than re-flood.
    let looped_ctx = relay.context(origin_addr, &link);
    let outcome = relay.announce.handle(&relayed_header, &relayed_body, &looped_ctx).await.unwrap();
    assert!(matches!(outcome, PingOutcome::None));
}
