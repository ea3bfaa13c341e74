//! The router façade: owns every shared table, wires the frame codec,
//! switch, sessions and ping framework together, and drives the tun and
//! peer ingress pipelines.
//!
//! Handlers never call back into the router directly; they only see a
//! borrowed `PingContext`. The router is the one place that holds the
//! identity signing key and the buffer pool, so it is also the one place
//! that turns a handler's computed `PingOutcome` into bytes on a link.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::buffer::BufferPool;
use crate::config::{self, RouterConfig};
use crate::crypto::SequenceClass;
use crate::error::RouterError;
use crate::frame::seal::{sign_with_clock, verify_signature};
use crate::frame::{Frame, FrameError, MessageClass, MessageType};
use crate::net_iface::{NetStackEndpoint, TunDevice};
use crate::ping::announce::AnnounceHandler;
use crate::ping::disconnect::{DisconnectHandler, DisconnectReason};
use crate::ping::error_ping::{ErrorCode, ErrorPingHandler};
use crate::ping::hello::HelloHandler;
use crate::ping::pingpong::PingPongHandler;
use crate::ping::{self, HandlerRegistry, PingContext, PingError, PingHeader, PingOutcome};
use crate::routing::icmpv6::{self, IcmpUnreachableCode};
use crate::routing::{ConnectionDirection, ConnectionStateTable, ConnectionStatus, FiveTuple, RouteSource, RouterInfoTable, RoutingTable};
use crate::session::Session;
use crate::switch::{PeerLink, Switch};
use crate::task::alert::{Manager as AlertManager, Severity};
use crate::task::scheduler::Scheduler;
use crate::time::SigningClock;

const ROUTE_TTL: Duration = Duration::from_secs(600);
const HELLO_WAIT: Duration = Duration::from_millis(200);
const HELLO_COOLDOWN: Duration = Duration::from_secs(30);
const TUN_SEND_TIMEOUT: Duration = Duration::from_millis(200);
const KEEPALIVE_PERIOD: Duration = Duration::from_secs(15);
const KEEPALIVE_WAIT: Duration = Duration::from_secs(1);
/// A gap this much larger than `KEEPALIVE_PERIOD` between two ticks
/// means the process was suspended (laptop sleep, container pause) and
/// every peer needs a fast liveness check rather than patiently waiting
/// out the usual failure count.
const CLOCK_JUMP_THRESHOLD: Duration = Duration::from_secs(5 * 60);
const KEEPALIVE_MAX_FAILURES: u32 = 5;
const KEEPALIVE_MAX_FAILURES_FAST_CHECK: u32 = 1;
const ANNOUNCE_PERIOD: Duration = Duration::from_secs(crate::ping::announce::ANNOUNCE_INTERVAL_SECS);
const ANNOUNCE_INITIAL_DELAY: Duration = Duration::from_secs(5);
const ROUTE_SWEEP_PERIOD: Duration = Duration::from_secs(10 * 60);
const CONNECTION_SWEEP_PERIOD: Duration = Duration::from_secs(10);
const SHUTDOWN_DRAIN: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum IngressError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Ping(#[from] PingError),
    #[error("no route to {0}")]
    NoRoute(Ipv6Addr),
    #[error("policy denied")]
    PolicyDenied,
}

/// One entry per directly-reachable peer: its verified identity, the
/// link used to reach it, and the switch label that names that link.
struct PeerRecord {
    link: Arc<dyn PeerLink>,
    label: u16,
    /// Consecutive missed keepalives; reset on any pong, checked against
    /// `KEEPALIVE_MAX_FAILURES`(_FAST_CHECK) to decide when to drop the
    /// link.
    keepalive_failures: AtomicU32,
}

/// The router façade. Cheaply clonable via `Arc<Router>`; every worker
/// loop holds one such handle.
pub struct Router {
    config: RouterConfig,
    pool: Arc<BufferPool>,
    switch: Arc<Switch>,
    routing: Arc<RoutingTable>,
    router_info: Arc<RouterInfoTable>,
    connections: Arc<ConnectionStateTable>,
    sessions: RwLock<HashMap<Ipv6Addr, Arc<Session>>>,
    peers: RwLock<HashMap<Ipv6Addr, PeerRecord>>,
    handlers: Arc<HandlerRegistry>,
    hello: Arc<HelloHandler>,
    error_ping: Arc<ErrorPingHandler>,
    pingpong: Arc<PingPongHandler>,
    clock: SigningClock,
    scheduler: Arc<Scheduler>,
    alerts: Arc<dyn AlertManager>,
    tun: Arc<dyn TunDevice>,
    local_api: Arc<dyn NetStackEndpoint>,
    hello_cooldown: crate::ping::cooldown::Cooldown,
    traffic_enabled: AtomicBool,
    /// Wall-clock timestamp of the last keepalive tick, used to detect a
    /// suspend/resume gap large enough to warrant a fast liveness check
    /// of every peer (spec.md §4.10/§8, "keepalive sleep recovery").
    last_keepalive_tick: Mutex<Instant>,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        tun: Arc<dyn TunDevice>,
        local_api: Arc<dyn NetStackEndpoint>,
        alerts: Arc<dyn AlertManager>,
    ) -> Arc<Self> {
        let self_address = config.identity.address.ip;
        let hello = Arc::new(HelloHandler::new());
        let error_ping = Arc::new(ErrorPingHandler::new());
        let pingpong = Arc::new(PingPongHandler::new());
        let handlers = Arc::new(HandlerRegistry::new());

        Arc::new(Self {
            config,
            pool: BufferPool::with_default_size(),
            switch: Arc::new(Switch::new(self_address)),
            routing: Arc::new(RoutingTable::new(ROUTE_TTL)),
            router_info: Arc::new(RouterInfoTable::new()),
            connections: Arc::new(ConnectionStateTable::new()),
            sessions: RwLock::new(HashMap::new()),
            peers: RwLock::new(HashMap::new()),
            handlers,
            hello,
            error_ping,
            pingpong,
            clock: SigningClock::new(),
            scheduler: Arc::new(Scheduler::new()),
            alerts,
            tun,
            local_api,
            hello_cooldown: crate::ping::cooldown::Cooldown::new(HELLO_COOLDOWN),
            traffic_enabled: AtomicBool::new(true),
            last_keepalive_tick: Mutex::new(Instant::now()),
        })
    }

    pub fn self_address(&self) -> Ipv6Addr {
        self.config.identity.address.ip
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn routing(&self) -> &Arc<RoutingTable> {
        &self.routing
    }

    pub fn connections(&self) -> &Arc<ConnectionStateTable> {
        &self.connections
    }

    /// Registers the five built-in ping handlers. Called once by the
    /// binary assembling a `Router` before spawning any workers. The
    /// router keeps its own `Arc` to `hello`/`error_ping` alongside the
    /// registry's so it can call their non-trait builder methods
    /// directly (`build_request`, `may_send`, ...).
    pub async fn register_builtin_handlers(self: &Arc<Self>) {
        self.handlers.register(ping::hello::PING_TYPE, self.hello.clone()).await;
        self.handlers.register(ping::announce::PING_TYPE, Arc::new(AnnounceHandler::new())).await;
        self.handlers.register(ping::disconnect::PING_TYPE, Arc::new(DisconnectHandler)).await;
        self.handlers.register(ping::error_ping::PING_TYPE, self.error_ping.clone()).await;
        self.handlers.register(ping::pingpong::PING_TYPE, self.pingpong.clone()).await;
    }

    async fn session_for(&self, peer: Ipv6Addr) -> Arc<Session> {
        if let Some(session) = self.sessions.read().await.get(&peer) {
            return session.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(peer)
            .or_insert_with(|| Arc::new(Session::new(self.config.tunnel_mtu)))
            .clone()
    }

    /// Registers a directly-connected peer: installs its signing key,
    /// assigns it a switch label, and adds a direct route. Called by the
    /// transport layer once it has authenticated the peer's identity
    /// (outside this crate's scope; see `net_iface`).
    pub async fn register_peer(self: &Arc<Self>, identity: &crate::address::PublicAddress, link: Arc<dyn PeerLink>) {
        let label = self.switch.register_link(link.clone()).await;
        let session = self.session_for(identity.ip).await;
        session.install_signing(identity.public_key);
        self.peers.write().await.insert(
            identity.ip,
            PeerRecord { link: link.clone(), label, keepalive_failures: AtomicU32::new(0) },
        );
        let delay = link.latency().map(|d| d.as_millis().min(u16::MAX as u128) as u16).unwrap_or(0);
        self.routing
            .add_route(identity.ip, vec![label], RouteSource::DirectPeer, 1, delay)
            .await;
        trace!(peer = %identity.ip, label, "registered direct peer");
    }

    pub async fn deregister_peer(self: &Arc<Self>, peer: Ipv6Addr) {
        let label = match self.peers.write().await.remove(&peer) {
            Some(record) => {
                self.switch.deregister_label(record.label).await;
                Some(record.label)
            }
            None => None,
        };
        let removed = self.routing.remove_disconnected(&peer, Some(peer)).await;
        if removed > 0 && !self.config.stub {
            if let Ok((header, body)) = DisconnectHandler::build(DisconnectReason::PeerLost(peer)) {
                self.flood_ping(&header, &body, label.unwrap_or(0)).await;
            }
        }
    }

    // ---- outbound ping transmission -----------------------------------

    /// Signs and sends a ping to `dst` over `link` as a bare control
    /// frame (no switch path: the two peers are directly connected).
    async fn send_ping_direct(&self, dst: Ipv6Addr, header: &PingHeader, body: &[u8], link: &Arc<dyn PeerLink>) -> Result<(), IngressError> {
        let payload = header.encode_body(body)?;
        let mut frame = Frame::build(&self.pool, self.self_address(), dst, MessageType::RouterPing, &[], &payload, &[])?;
        sign_with_clock(&mut frame, &self.config.identity.signing_key, &self.clock)?;
        link.send_priority(frame).await.map_err(|e| {
            warn!(peer = %dst, error = %e, "failed to send ping");
            IngressError::NoRoute(dst)
        })
    }

    /// Floods a hop ping's header to every registered link except
    /// `exclude_label`, addressed to the well-known broadcast address
    ///.
    async fn flood_ping(&self, header: &PingHeader, body: &[u8], exclude_label: u16) {
        let payload = match header.encode_body(body) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "failed to encode ping for flooding");
                return;
            }
        };
        let broadcast = config::broadcast_address(self.config.overlay_prefix);
        for (label, link) in self.switch.all_links().await {
            if label == exclude_label {
                continue;
            }
            let mut frame = match Frame::build(&self.pool, self.self_address(), broadcast, MessageType::RouterHopPing, &[], &payload, &[]) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "failed to build flooded frame");
                    continue;
                }
            };
            if let Err(e) = sign_with_clock(&mut frame, &self.config.identity.signing_key, &self.clock) {
                warn!(error = %e, "failed to sign flooded frame");
                continue;
            }
            if let Err(e) = link.send_priority(frame).await {
                debug!(label, error = %e, "failed to flood ping to link");
            }
        }
    }

    /// Triggers a hello handshake with `peer` if one is not already
    /// cooling down, using the link the routing table names as the next
    /// hop. No-op if there is no route yet.
    async fn trigger_hello(&self, peer: Ipv6Addr) {
        if !self.hello_cooldown.should_fire(peer, 0).await {
            return;
        }
        let Some(route) = self.routing.lookup_nearest(&peer).await else {
            return;
        };
        let Some(label) = route.switch_path.first().copied() else {
            return;
        };
        let Some(link) = self.switch.link_by_label(label).await else {
            return;
        };
        match self.hello.build_request(peer, self.config.tunnel_mtu).await {
            Ok((header, body)) => {
                if let Err(e) = self.send_ping_direct(peer, &header, &body, &link).await {
                    debug!(peer = %peer, error = %e, "failed to send hello request");
                }
            }
            Err(e) => warn!(peer = %peer, error = %e, "failed to build hello request"),
        }
    }

    // ---- ingress from tun -----------------------------------------------

    /// Handles one raw IPv6 packet read from the local tun device
    ///.
    pub async fn ingress_from_tun(self: &Arc<Self>, packet: &[u8]) {
        if packet.len() < 40 || packet[0] >> 4 != 6 {
            trace!("dropping malformed tun packet");
            return;
        }
        let src = Ipv6Addr::from(<[u8; 16]>::try_from(&packet[8..24]).expect("checked length"));
        let dst = Ipv6Addr::from(<[u8; 16]>::try_from(&packet[24..40]).expect("checked length"));

        if src != self.self_address() {
            trace!(%src, "dropping tun packet whose source is not this router");
            return;
        }
        if dst.octets()[..2] != self.config.overlay_prefix {
            trace!(%dst, "dropping tun packet outside the overlay prefix");
            return;
        }
        if dst.is_multicast() {
            trace!(%dst, "dropping multicast tun packet");
            return;
        }
        if dst == config::local_api_address(self.config.overlay_prefix) {
            self.local_api.handle_local_packet(packet).await;
            return;
        }

        let protocol = packet[6];
        let (local_port, remote_port) = ports(packet, protocol);
        let tuple = FiveTuple { local: src, remote: dst, protocol, local_port, remote_port };
        let entry = self.connections.open(tuple, ConnectionDirection::Outbound).await;

        match entry.status().await {
            ConnectionStatus::Unreachable => {
                self.send_icmp_unreachable(src, IcmpUnreachableCode::NoRoute, packet).await;
                return;
            }
            ConnectionStatus::Denied | ConnectionStatus::Rejected => {
                self.send_icmp_unreachable(src, IcmpUnreachableCode::AdminProhibited, packet).await;
                return;
            }
            ConnectionStatus::Prohibited => {
                self.send_icmp_unreachable(src, IcmpUnreachableCode::AdminProhibited, packet).await;
                return;
            }
            ConnectionStatus::Allowed | ConnectionStatus::Unknown => {}
        }

        if self.config.isolate && !self.config.is_friend(&dst) {
            entry.set_status(ConnectionStatus::Prohibited).await;
            self.send_icmp_unreachable(src, IcmpUnreachableCode::AdminProhibited, packet).await;
            return;
        }

        let Some(route) = self.routing.lookup_nearest(&dst).await else {
            entry.set_status(ConnectionStatus::Unreachable).await;
            self.send_icmp_unreachable(src, IcmpUnreachableCode::NoRoute, packet).await;
            return;
        };

        let session = self.session_for(dst).await;
        if !session.has_encryption() {
            self.trigger_hello(dst).await;
            let notified = session.encryption_ready.notified();
            tokio::pin!(notified);
            let _ = timeout(HELLO_WAIT, notified).await;
            if !session.has_encryption() {
                debug!(%dst, "no session established within the hello wait window, dropping");
                return;
            }
        }

        if packet.len() > session.tunnel_mtu() as usize {
            self.send_icmp_packet_too_big(src, session.tunnel_mtu() as u32, packet).await;
            return;
        }

        let Some(next_label) = route.switch_path.first().copied() else {
            entry.set_status(ConnectionStatus::Unreachable).await;
            return;
        };
        let Some(link) = self.switch.link_by_label(next_label).await else {
            entry.set_status(ConnectionStatus::Unreachable).await;
            return;
        };
        let forward_labels = crate::switch::encode_switch_block(&route.switch_path[1..]);

        let seq = match session.next_outbound_sequence() {
            Ok(seq) => seq as u32,
            Err(e) => {
                debug!(%dst, error = %e, "no outbound sequence available, dropping");
                return;
            }
        };

        let mut frame = match Frame::build(&self.pool, src, dst, MessageType::NetworkTraffic, &forward_labels, packet, &[]) {
            Ok(f) => f,
            Err(e) => {
                debug!(%dst, error = %e, "failed to build outbound traffic frame");
                return;
            }
        };
        if let Err(e) = session.seal_outbound(&mut frame, MessageClass::Encrypted, seq, 0, 0) {
            debug!(%dst, error = %e, "failed to seal outbound traffic frame");
            return;
        }

        match self.switch.forward_by_peer(frame, &link).await {
            Ok(_) => entry.set_status(ConnectionStatus::Allowed).await,
            Err(e) => {
                warn!(%dst, error = %e, "failed to forward outbound traffic frame");
                entry.set_status(ConnectionStatus::Unreachable).await;
            }
        }
    }

    async fn send_icmp_unreachable(&self, to_local_src: Ipv6Addr, code: IcmpUnreachableCode, original: &[u8]) {
        let reply = icmpv6::reply_unreachable(to_local_src, code, original);
        self.emit_icmp(reply.dst, reply.body).await;
    }

    async fn send_icmp_packet_too_big(&self, to_local_src: Ipv6Addr, mtu: u32, original: &[u8]) {
        let reply = icmpv6::reply_packet_too_big(to_local_src, mtu, original);
        self.emit_icmp(reply.dst, reply.body).await;
    }

    /// Wraps an ICMPv6 body in a minimal IPv6 header addressed from the
    /// local API address to `dst` and writes it to the tun device
    ///.
    async fn emit_icmp(&self, dst: Ipv6Addr, body: Vec<u8>) {
        let src = config::local_api_address(self.config.overlay_prefix);
        let packet = build_icmpv6_packet(src, dst, &body);
        if let Err(e) = timeout(TUN_SEND_TIMEOUT, self.tun.send(&packet)).await {
            debug!(%dst, error = %e, "timed out writing icmpv6 reply to tun");
        }
    }

    /// Informs the remote sender of a denied inbound flow with a typed
    /// error ping, cooled down per (peer, code) so a persistently denied
    /// remote does not get flooded with repeats.
    async fn send_policy_error(&self, peer: Ipv6Addr, code: ErrorCode, dst: Ipv6Addr, protocol: u8, port: u16) {
        if !self.error_ping.may_send(peer, code).await {
            return;
        }
        let Ok((header, body)) = ErrorPingHandler::build_policy(code, dst, protocol, port) else {
            return;
        };
        let Some(link) = self.peers.read().await.get(&peer).map(|r| r.link.clone()) else {
            return;
        };
        if let Err(e) = self.send_ping_direct(peer, &header, &body, &link).await {
            debug!(%peer, error = %e, "failed to send policy error ping");
        }
    }

    // ---- ingress from peer -----------------------------------------------

    /// Handles one frame received from `link`.
    pub async fn handle_frame(self: &Arc<Self>, mut frame: Frame, link: Arc<dyn PeerLink>) {
        frame.set_recv_link(link.clone());
        let outcome = match self.switch.handle(frame).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(error = %e, "switch rejected frame");
                return;
            }
        };
        let frame = match outcome {
            crate::switch::SwitchOutcome::Forwarded => return,
            crate::switch::SwitchOutcome::Delivered(frame) => frame,
        };

        match frame.message_type() {
            MessageType::RouterPing | MessageType::RouterHopPing | MessageType::RouterHopPingDeprecated => {
                self.handle_ping_frame(frame, link).await;
            }
            MessageType::NetworkTraffic => {
                self.handle_traffic_frame(frame).await;
            }
            MessageType::SessionCtrl | MessageType::SessionData => {
                trace!(message_type = ?frame.message_type(), "session channel not yet supported, dropping");
            }
        }
    }

    async fn handle_ping_frame(self: &Arc<Self>, frame: Frame, link: Arc<dyn PeerLink>) {
        let from = frame.src();
        let session = self.session_for(from).await;

        let remote_key = match session.remote_signing_key() {
            Ok(key) => key,
            Err(_) => {
                debug!(%from, "dropping ping from a peer with no installed signing key");
                return;
            }
        };
        if verify_signature(&frame, &remote_key).is_err() {
            debug!(%from, "ping signature verification failed");
            return;
        }
        if !frame.message_type().is_hop_ping() {
            if let Err(e) = session.check_incoming_timestamp(frame.signed_timestamp()) {
                debug!(%from, error = %e, "ping timestamp replay check failed");
                return;
            }
        }

        let (header, body) = match ping::parse_ping(frame.message_type(), frame.message_payload()) {
            Ok(h) => h,
            Err(e) => {
                debug!(%from, error = %e, "failed to parse ping payload");
                return;
            }
        };

        let ctx = PingContext {
            from,
            session: &session,
            link: &link,
            routing: &self.routing,
            connections: &self.connections,
            switch: &self.switch,
            router_info: &self.router_info,
            config: &self.config,
            sequence_time_ms: frame.signed_timestamp(),
            frame_auth_data: frame.auth_trailer(),
        };
        let outcome = match self.handlers.dispatch(&header, &body, &ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!(%from, error = %e, "ping handler failed");
                return;
            }
        };

        match outcome {
            PingOutcome::None => {}
            PingOutcome::Reply(reply, reply_body) => {
                if let Err(e) = self.send_ping_direct(from, &reply, &reply_body, &link).await {
                    debug!(%from, error = %e, "failed to send ping reply");
                }
            }
            PingOutcome::Flood { header, body, exclude_label } => {
                self.flood_ping(&header, &body, exclude_label).await;
            }
        }
    }

    async fn handle_traffic_frame(self: &Arc<Self>, mut frame: Frame) {
        let from = frame.src();
        let to = frame.dst();
        let session = self.session_for(from).await;

        let plaintext = match session.unseal_inbound(&mut frame, MessageClass::Encrypted) {
            Ok(p) => p,
            Err(_) => {
                if let Ok((header, body)) = ErrorPingHandler::build_no_encryption_keys() {
                    if let Some(record) = self.peers.read().await.get(&from) {
                        let _ = self.send_ping_direct(from, &header, &body, &record.link).await;
                    }
                }
                return;
            }
        };

        let (seq, ack) = frame.sequence_numbers();
        if let Err(e) = session.check_incoming_sequence(SequenceClass::Bulk, seq as u64) {
            debug!(%from, error = %e, "traffic frame failed replay check");
            return;
        }
        let _ = ack;

        if plaintext.len() < 40 {
            debug!(%from, "traffic frame payload too short to be an ipv6 packet");
            return;
        }
        let pkt_src = Ipv6Addr::from(<[u8; 16]>::try_from(&plaintext[8..24]).expect("checked length"));
        let pkt_dst = Ipv6Addr::from(<[u8; 16]>::try_from(&plaintext[24..40]).expect("checked length"));
        if pkt_src != from || pkt_dst != to {
            debug!(%from, %to, "inner packet addresses do not match frame addresses");
            return;
        }

        let protocol = plaintext[6];
        let (local_port, remote_port) = ports(&plaintext, protocol);
        let tuple = FiveTuple { local: to, remote: from, protocol, local_port, remote_port };
        let entry = self.connections.open(tuple, ConnectionDirection::Inbound).await;
        if matches!(entry.status().await, ConnectionStatus::Denied | ConnectionStatus::Rejected | ConnectionStatus::Prohibited) {
            return;
        }
        if !self.config.inbound_policy.allow(to, from, protocol, local_port, remote_port) {
            entry.set_status(ConnectionStatus::Denied).await;
            self.send_policy_error(from, ErrorCode::Rejected, to, protocol, remote_port).await;
            return;
        }
        entry.set_status(ConnectionStatus::Allowed).await;

        if !self.traffic_enabled.load(Ordering::Acquire) {
            return;
        }
        if let Err(e) = timeout(TUN_SEND_TIMEOUT, self.tun.send(&plaintext)).await {
            debug!(%from, error = %e, "timed out delivering inbound traffic to tun");
        }
    }

    // ---- background workers -----------------------------------------------

    /// Spawns every periodic worker (tun pump, announce, keepalive,
    /// table cleaners) under this router's scheduler.
    pub fn spawn_workers(self: &Arc<Self>) {
        let tun_router = self.clone();
        self.scheduler.delay(Duration::from_millis(0), move || {
            let router = tun_router.clone();
            async move { router.run_tun_pump().await }
        });

        let announce_router = self.clone();
        self.scheduler.delay(ANNOUNCE_INITIAL_DELAY, move || {
            let router = announce_router.clone();
            async move { router.send_self_announce().await }
        });
        let announce_router = self.clone();
        self.scheduler.repeat(ANNOUNCE_PERIOD, move || {
            let router = announce_router.clone();
            async move { router.send_self_announce().await }
        });

        let keepalive_router = self.clone();
        self.scheduler.repeat(KEEPALIVE_PERIOD, move || {
            let router = keepalive_router.clone();
            async move { router.run_keepalive().await }
        });

        let route_sweep_router = self.clone();
        self.scheduler.repeat(ROUTE_SWEEP_PERIOD, move || {
            let router = route_sweep_router.clone();
            async move {
                router.routing.sweep_expired().await;
                router.router_info.sweep_expired().await;
            }
        });

        let conn_sweep_router = self.clone();
        self.scheduler.repeat(CONNECTION_SWEEP_PERIOD, move || {
            let router = conn_sweep_router.clone();
            async move { router.connections.sweep_expired().await }
        });
    }

    async fn run_tun_pump(self: Arc<Self>) {
        while let Some(packet) = self.tun.recv().await {
            self.ingress_from_tun(&packet).await;
        }
    }

    /// Sends a fresh self-announce to every direct peer individually
    /// rather than via `flood_ping`: each peer needs its own body, since
    /// `return_label` names the label this router's switch assigned to
    /// *that* peer's link specifically.
    async fn send_self_announce(self: Arc<Self>) {
        let expires_at_ms = crate::time::now_ms().saturating_add(ping::announce::ANNOUNCE_EXPIRY_SECS * 1000);
        let broadcast = config::broadcast_address(self.config.overlay_prefix);
        for (label, link) in self.switch.all_links().await {
            let (header, body) = match AnnounceHandler::build_self_announce(&self.config.identity, label, expires_at_ms) {
                Ok(hb) => hb,
                Err(e) => {
                    warn!(error = %e, "failed to build self announce");
                    continue;
                }
            };
            let payload = match header.encode_body(&body) {
                Ok(p) => p,
                Err(e) => {
                    warn!(error = %e, "failed to encode self announce");
                    continue;
                }
            };
            let mut frame = match Frame::build(&self.pool, self.self_address(), broadcast, MessageType::RouterHopPing, &[], &payload, &[]) {
                Ok(f) => f,
                Err(e) => {
                    warn!(error = %e, "failed to build self announce frame");
                    continue;
                }
            };
            if let Err(e) = sign_with_clock(&mut frame, &self.config.identity.signing_key, &self.clock) {
                warn!(error = %e, "failed to sign self announce frame");
                continue;
            }
            if let Err(e) = link.send_priority(frame).await {
                debug!(label, error = %e, "failed to send self announce to peer");
            }
        }
    }

    /// Pings every non-closing peer once per tick. A tick that arrives
    /// much later than `KEEPALIVE_PERIOD` means the process (or its
    /// host) was asleep; every peer then gets a single fast liveness
    /// check instead of patiently accumulating the usual failure count,
    /// since a peer that is actually still there will typically answer
    /// the very first ping after waking up.
    async fn run_keepalive(self: Arc<Self>) {
        let now = Instant::now();
        let fast_check = {
            let mut last_tick = self.last_keepalive_tick.lock().await;
            let gap = now.duration_since(*last_tick);
            *last_tick = now;
            gap > CLOCK_JUMP_THRESHOLD
        };
        let max_failures = if fast_check { KEEPALIVE_MAX_FAILURES_FAST_CHECK } else { KEEPALIVE_MAX_FAILURES };

        let peers: Vec<Ipv6Addr> = self.peers.read().await.keys().copied().collect();
        for addr in peers {
            let link = match self.peers.read().await.get(&addr).map(|r| r.link.clone()) {
                Some(link) if !link.is_closing() => link,
                _ => continue,
            };
            let session = self.session_for(addr).await;
            if !session.has_encryption() {
                continue;
            }

            let request = match self.pingpong.send(addr, None).await {
                Ok(r) => r,
                Err(e) => {
                    debug!(peer = %addr, error = %e, "failed to build keepalive request");
                    continue;
                }
            };
            let notified = request.notify.notified();
            tokio::pin!(notified);
            let sent = self.send_ping_direct(addr, &request.header, &request.body, &link).await.is_ok();
            let acked = sent && timeout(KEEPALIVE_WAIT, notified).await.is_ok();

            if acked {
                if let Some(record) = self.peers.read().await.get(&addr) {
                    record.keepalive_failures.store(0, Ordering::Relaxed);
                }
                continue;
            }

            self.pingpong.cancel(addr, request.ping_id).await;
            let failures = match self.peers.read().await.get(&addr) {
                Some(record) => record.keepalive_failures.fetch_add(1, Ordering::Relaxed) + 1,
                None => continue,
            };
            self.alerts
                .raise(Severity::Warning, format!("keepalive to {addr} failed ({failures}/{max_failures})"))
                .await;
            if failures >= max_failures {
                info!(peer = %addr, failures, "closing peer after repeated missed keepalives");
                self.deregister_peer(addr).await;
            }
        }
    }

    /// Clears the traffic-handling flag, notifies every direct peer, and
    /// gives in-flight sends a moment to drain before the process exits
    ///.
    pub async fn shutdown(self: &Arc<Self>) {
        self.traffic_enabled.store(false, Ordering::Release);
        let Ok((header, body)) = DisconnectHandler::build(DisconnectReason::GoingDown) else {
            self.scheduler.shutdown();
            return;
        };
        let peers: Vec<(Ipv6Addr, Arc<dyn PeerLink>)> = self
            .peers
            .read()
            .await
            .iter()
            .map(|(addr, rec)| (*addr, rec.link.clone()))
            .collect();
        for (addr, link) in peers {
            let _ = self.send_ping_direct(addr, &header, &body, &link).await;
        }
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        self.scheduler.shutdown();
    }
}

/// Extracts `(local_port, remote_port)` from a TCP/UDP header immediately
/// following a 40-byte IPv6 header with no extension headers; `0` for
/// other protocols (ICMPv6 and anything this router does not special-case
/// flow lookups for).
fn ports(packet: &[u8], protocol: u8) -> (u16, u16) {
    const TCP: u8 = 6;
    const UDP: u8 = 17;
    if !matches!(protocol, TCP | UDP) || packet.len() < 44 {
        return (0, 0);
    }
    let src_port = u16::from_be_bytes([packet[40], packet[41]]);
    let dst_port = u16::from_be_bytes([packet[42], packet[43]]);
    (src_port, dst_port)
}

/// One's-complement checksum over `data`, folded to 16 bits (RFC 1071).
fn checksum16(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut iter = data.chunks_exact(2);
    for chunk in &mut iter {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }
    if let [last] = iter.remainder() {
        sum += (*last as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// Builds a complete IPv6 packet carrying an ICMPv6 message, computing
/// the ICMPv6 checksum over the RFC 8200 pseudo-header plus body.
fn build_icmpv6_packet(src: Ipv6Addr, dst: Ipv6Addr, icmp_body: &[u8]) -> Vec<u8> {
    const ICMPV6_NEXT_HEADER: u8 = 58;
    const DEFAULT_HOP_LIMIT: u8 = 64;

    let mut body = icmp_body.to_vec();
    let mut pseudo = Vec::with_capacity(40 + body.len());
    pseudo.extend_from_slice(&src.octets());
    pseudo.extend_from_slice(&dst.octets());
    pseudo.extend_from_slice(&(body.len() as u32).to_be_bytes());
    pseudo.extend_from_slice(&[0, 0, 0, ICMPV6_NEXT_HEADER]);
    pseudo.extend_from_slice(&body);
    let checksum = checksum16(&pseudo);
    body[2] = (checksum >> 8) as u8;
    body[3] = (checksum & 0xff) as u8;

    let mut packet = Vec::with_capacity(40 + body.len());
    packet.push(0x60); // version 6, traffic class high nibble
    packet.extend_from_slice(&[0, 0, 0]); // traffic class low nibble + flow label
    packet.extend_from_slice(&(body.len() as u16).to_be_bytes());
    packet.push(ICMPV6_NEXT_HEADER);
    packet.push(DEFAULT_HOP_LIMIT);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend_from_slice(&body);
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icmpv6_packet_has_valid_ipv6_header() {
        let src = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1);
        let dst = Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2);
        let body = icmpv6::destination_unreachable(IcmpUnreachableCode::NoRoute, &[1, 2, 3]);
        let packet = build_icmpv6_packet(src, dst, &body);
        assert_eq!(packet[0] >> 4, 6);
        assert_eq!(packet[6], 58);
        assert_eq!(&packet[8..24], &src.octets());
        assert_eq!(&packet[24..40], &dst.octets());
    }

    #[test]
    fn ports_are_zero_for_non_tcp_udp() {
        let mut packet = vec![0u8; 44];
        packet[6] = 58; // icmpv6
        assert_eq!(ports(&packet, 58), (0, 0));
    }
}
