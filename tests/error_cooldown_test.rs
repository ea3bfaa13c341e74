//! Black-box error-ping cooldown: a flood of identical `Unreachable`
//! reports from the same peer is only acted on once per cooldown
//! window, but marks the affected flow's connection state immediately.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use mycoria_core::address::PREFIX_BYTES;
use mycoria_core::config::{AllowAll, Identity, RouterConfig};
use mycoria_core::frame::Frame;
use mycoria_core::ping::error_ping::{ErrorCode, ErrorPingHandler};
use mycoria_core::ping::{PingContext, PingHandler, PingOutcome};
use mycoria_core::routing::{ConnectionStateTable, ConnectionStatus, FiveTuple, RouterInfoTable, RoutingTable};
use mycoria_core::session::Session;
use mycoria_core::switch::{LinkError, PeerLink, Switch};
use rand::rngs::OsRng;

const PREFIX: [u8; PREFIX_BYTES] = [0xfd, 0x00];

struct NullLink;

#[async_trait]
impl PeerLink for NullLink {
    fn label(&self) -> u16 {
        1
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

#[tokio::test]
async fn repeated_unreachable_reports_are_cooled_down_but_mark_the_flow() {
    let identity = Identity::new(SigningKey::generate(&mut OsRng), PREFIX);
    let self_address = identity.address.ip;
    let mut config = RouterConfig::new(identity, PREFIX);
    config.inbound_policy = Arc::new(AllowAll);

    let session = Session::new(1400);
    let routing = RoutingTable::new(Duration::from_secs(600));
    let connections = ConnectionStateTable::new();
    let switch = Switch::new(self_address);
    let router_info = RouterInfoTable::new();
    let link: Arc<dyn PeerLink> = Arc::new(NullLink);
    let handler = ErrorPingHandler::new();

    let peer = Identity::new(SigningKey::generate(&mut OsRng), PREFIX).address.ip;
    let victim_dst = Identity::new(SigningKey::generate(&mut OsRng), PREFIX).address.ip;

    let (header, body) = ErrorPingHandler::build_unreachable(victim_dst).unwrap();

    let ctx = PingContext {
        from: peer,
        session: &session,
        link: &link,
        routing: &routing,
        connections: &connections,
        switch: &switch,
        router_info: &router_info,
        config: &config,
        sequence_time_ms: 0,
        frame_auth_data: &[],
    };

    let outcome = handler.handle(&header, &body, &ctx).await.unwrap();
    assert!(matches!(outcome, PingOutcome::None));

    let tuple = FiveTuple {
        local: victim_dst,
        remote: peer,
        protocol: 0,
        local_port: 0,
        remote_port: 0,
    };
    let entry = connections.get(&tuple).await.expect("connection state recorded on first report");
    assert_eq!(entry.status().await, ConnectionStatus::Unreachable);

    // A second, third, and fourth identical report within the cooldown
    // window are all silently absorbed without erroring.
    for _ in 0..3 {
        let outcome = handler.handle(&header, &body, &ctx).await.unwrap();
        assert!(matches!(outcome, PingOutcome::None));
    }

    // may_send mirrors the same per-(peer, code) cooldown on the sending
    // side: the first check fires, immediate repeats do not.
    assert!(handler.may_send(peer, ErrorCode::Unreachable).await);
    assert!(!handler.may_send(peer, ErrorCode::Unreachable).await);
    assert!(handler.may_send(peer, ErrorCode::Rejected).await);
}
