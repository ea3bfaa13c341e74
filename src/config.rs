//! Injected configuration snapshot. Loading this
//! from disk/CLI is out of scope for the core router; this module only
//! defines the shape the rest of the crate consumes.

use std::collections::HashSet;
use std::net::Ipv6Addr;
use std::sync::Arc;

use ed25519_dalek::SigningKey;

use crate::address::{PublicAddress, PREFIX_BYTES};

/// A predicate deciding whether an inbound connection tuple should be
/// allowed. Returning `true` means "allow"; policy refinement (prohibited
/// vs. rejected vs. unreachable) happens in `routing::policy`.
pub trait InboundPolicy: Send + Sync {
    fn allow(&self, local: Ipv6Addr, remote: Ipv6Addr, protocol: u8, local_port: u16, remote_port: u16) -> bool;
}

/// Default policy: allow everything. Real deployments inject a stricter
/// policy derived from their own configuration surface.
pub struct AllowAll;

impl InboundPolicy for AllowAll {
    fn allow(&self, _local: Ipv6Addr, _remote: Ipv6Addr, _protocol: u8, _local_port: u16, _remote_port: u16) -> bool {
        true
    }
}

/// The router's local identity: private signing key plus the derived
/// overlay address.
#[derive(Clone)]
pub struct Identity {
    pub signing_key: Arc<SigningKey>,
    pub address: PublicAddress,
}

impl Identity {
    pub fn new(signing_key: SigningKey, prefix: [u8; PREFIX_BYTES]) -> Self {
        let address = PublicAddress::derive(
            crate::address::SigningKeyType::Ed25519,
            signing_key.verifying_key(),
            prefix,
        );
        Self {
            signing_key: Arc::new(signing_key),
            address,
        }
    }
}

/// Injected configuration snapshot. No process-wide mutable state exists
/// beyond this struct and the tables the router owns.
#[derive(Clone)]
pub struct RouterConfig {
    pub identity: Identity,
    pub overlay_prefix: [u8; PREFIX_BYTES],
    /// Routers this node always accepts announcements/traffic from,
    /// regardless of general inbound policy.
    pub friends: HashSet<Ipv6Addr>,
    /// Isolated nodes only talk to friends; used for private deployments.
    pub isolate: bool,
    /// Stub routers never forward announces/traffic on behalf of others.
    pub stub: bool,
    pub tunnel_mtu: u16,
    pub inbound_policy: Arc<dyn InboundPolicy>,
}

impl RouterConfig {
    pub fn new(identity: Identity, overlay_prefix: [u8; PREFIX_BYTES]) -> Self {
        Self {
            identity,
            overlay_prefix,
            friends: HashSet::new(),
            isolate: false,
            stub: false,
            tunnel_mtu: 1400,
            inbound_policy: Arc::new(AllowAll),
        }
    }

    pub fn is_friend(&self, ip: &Ipv6Addr) -> bool {
        self.friends.contains(ip)
    }
}

/// The well-known broadcast router address: "send to every link".
pub fn is_broadcast(addr: &Ipv6Addr) -> bool {
    addr.octets()[2..] == [0u8; 14]
}

/// Constructs the broadcast address for `prefix`: the prefix bytes
/// followed by all zeroes.
pub fn broadcast_address(prefix: [u8; PREFIX_BYTES]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[..PREFIX_BYTES].copy_from_slice(&prefix);
    Ipv6Addr::from(octets)
}

/// The well-known local API address: traffic from the tun device
/// addressed here is handed to the embedded net-stack rather than
/// forwarded through the overlay. Reserved as the first
/// address after the broadcast address within the configured prefix.
pub fn local_api_address(prefix: [u8; PREFIX_BYTES]) -> Ipv6Addr {
    let mut octets = [0u8; 16];
    octets[..PREFIX_BYTES].copy_from_slice(&prefix);
    octets[15] = 1;
    Ipv6Addr::from(octets)
}
