//! Black-box hello handshake: two independent `HelloHandler`s wired
//! together through a fake `PeerLink`, exercising the full request /
//! reply / follow-up round trip and confirming both sides land on the
//! same AEAD key.

use std::net::{Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use mycoria_core::address::PREFIX_BYTES;
use mycoria_core::config::{AllowAll, Identity, RouterConfig};
use mycoria_core::frame::Frame;
use mycoria_core::ping;
use mycoria_core::ping::hello::HelloHandler;
use mycoria_core::ping::PingContext;
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

fn identity() -> Identity {
    Identity::new(SigningKey::generate(&mut OsRng), PREFIX)
}

fn config(identity: Identity) -> RouterConfig {
    let mut cfg = RouterConfig::new(identity, PREFIX);
    cfg.inbound_policy = Arc::new(AllowAll);
    cfg
}

struct Node {
    config: RouterConfig,
    session: Session,
    routing: RoutingTable,
    connections: ConnectionStateTable,
    switch: Switch,
    router_info: RouterInfoTable,
    hello: HelloHandler,
}

impl Node {
    fn new() -> Self {
        let identity = identity();
        let self_address = identity.address.ip;
        Self {
            config: config(identity),
            session: Session::new(1400),
            routing: RoutingTable::new(Duration::from_secs(600)),
            connections: ConnectionStateTable::new(),
            switch: Switch::new(self_address),
            router_info: RouterInfoTable::new(),
            hello: HelloHandler::new(),
        }
    }

    fn context<'a>(&'a self, from: Ipv6Addr, link: &'a Arc<dyn PeerLink>) -> PingContext<'a> {
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
async fn hello_handshake_installs_matching_keys_on_both_sides() {
    let initiator = Node::new();
    let responder = Node::new();
    let link: Arc<dyn PeerLink> = Arc::new(NullLink(1));

    let (req_header, req_body) = initiator.hello.build_request(responder.config.identity.address.ip, 1400).await.unwrap();
    let (req_header_decoded, _) = ping::parse_ping(mycoria_core::MessageType::RouterPing, &req_header.encode_body(&req_body).unwrap()).unwrap();
    assert_eq!(req_header_decoded.ping_type, "hello");

    // Responder handles the bare request.
    let responder_ctx = responder.context(initiator.config.identity.address.ip, &link);
    let outcome = responder.hello.handle(&req_header, &req_body, &responder_ctx).await.unwrap();
    let (reply_header, reply_body) = match outcome {
        mycoria_core::ping::PingOutcome::Reply(h, b) => (h, b),
        _ => panic!("expected a direct reply to a bare hello request"),
    };
    assert!(reply_header.follow_up);

    // Initiator completes the exchange from the follow-up.
    let initiator_ctx = initiator.context(responder.config.identity.address.ip, &link);
    let outcome = initiator.hello.handle(&reply_header, &reply_body, &initiator_ctx).await.unwrap();
    assert!(matches!(outcome, mycoria_core::ping::PingOutcome::None));

    assert!(initiator.session.has_encryption());
    assert!(responder.session.has_encryption());

    // A repeated follow-up finds nothing pending (it was already consumed
    // above) and is ignored rather than re-installing a key.
    let outcome = initiator.hello.handle(&reply_header, &reply_body, &initiator_ctx).await.unwrap();
    assert!(matches!(outcome, mycoria_core::ping::PingOutcome::None));
}
