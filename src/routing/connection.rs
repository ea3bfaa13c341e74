//! Per-flow connection state tracking.
//!
//! One entry exists per five-tuple flow seen on the local tun
//! interface, recording the policy verdict so a hot-path packet doesn't
//! need to re-run inbound/outbound policy on every send, and so a
//! verdict that flips (a typed error ping arrives, a policy predicate
//! changes) can wake anyone blocked waiting on it.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FiveTuple {
    pub local: Ipv6Addr,
    pub remote: Ipv6Addr,
    pub protocol: u8,
    pub local_port: u16,
    pub remote_port: u16,
}

impl FiveTuple {
    /// ICMP and ICMPv6 flows are short-lived: expired after 10s of
    /// inactivity rather than the usual 10 minutes.
    pub fn is_short_lived(&self) -> bool {
        const ICMPV6: u8 = 58;
        const ICMP: u8 = 1;
        matches!(self.protocol, ICMP | ICMPV6)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    Inbound,
    Outbound,
}

/// The policy verdict recorded for a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    /// No verdict reached yet (flow just opened).
    Unknown,
    Allowed,
    Unreachable,
    Prohibited,
    Denied,
    Rejected,
}

impl ConnectionStatus {
    /// Whether traffic on this flow is currently let through.
    pub fn is_allowed(self) -> bool {
        matches!(self, ConnectionStatus::Allowed)
    }
}

const SHORT_LIVED_TTL: Duration = Duration::from_secs(10);
const NORMAL_TTL: Duration = Duration::from_secs(600);

pub struct ConnectionState {
    pub direction: ConnectionDirection,
    pub short_lived: bool,
    pub first_seen: Instant,
    last_seen: std::sync::Mutex<Instant>,
    status: RwLock<ConnectionStatus>,
    pub bytes_sent: AtomicU64,
    pub bytes_recv: AtomicU64,
    /// Fired every time `status` changes, so a hot-path sender blocked
    /// on "is this flow allowed yet" wakes as soon as a verdict lands.
    pub status_changed: Notify,
}

impl ConnectionState {
    fn new(direction: ConnectionDirection, short_lived: bool) -> Self {
        let now = Instant::now();
        Self {
            direction,
            short_lived,
            first_seen: now,
            last_seen: std::sync::Mutex::new(now),
            status: RwLock::new(ConnectionStatus::Unknown),
            bytes_sent: AtomicU64::new(0),
            bytes_recv: AtomicU64::new(0),
            status_changed: Notify::new(),
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        *self.status.read().await
    }

    pub async fn set_status(&self, status: ConnectionStatus) {
        let mut guard = self.status.write().await;
        if *guard != status {
            *guard = status;
            self.status_changed.notify_waiters();
        }
    }

    pub fn touch(&self) {
        *self.last_seen.lock().expect("connection state mutex poisoned") = Instant::now();
    }

    fn is_expired(&self, now: Instant) -> bool {
        let last_seen = *self.last_seen.lock().expect("connection state mutex poisoned");
        let ttl = if self.short_lived { SHORT_LIVED_TTL } else { NORMAL_TTL };
        now.duration_since(last_seen) > ttl
    }
}

/// Tracks one entry per five-tuple flow. Resolving a tuple always
/// returns the same `Arc<ConnectionState>` for the lifetime of that
/// entry, so two callers racing to open the same flow converge on one
/// object rather than aliasing separate state.
pub struct ConnectionStateTable {
    flows: RwLock<HashMap<FiveTuple, Arc<ConnectionState>>>,
}

impl ConnectionStateTable {
    pub fn new() -> Self {
        Self {
            flows: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the existing entry for `tuple`, or opens a fresh one with
    /// status `Unknown`.
    pub async fn open(&self, tuple: FiveTuple, direction: ConnectionDirection) -> Arc<ConnectionState> {
        if let Some(existing) = self.flows.read().await.get(&tuple) {
            existing.touch();
            return existing.clone();
        }
        let mut flows = self.flows.write().await;
        flows
            .entry(tuple)
            .or_insert_with(|| Arc::new(ConnectionState::new(direction, tuple.is_short_lived())))
            .clone()
    }

    pub async fn get(&self, tuple: &FiveTuple) -> Option<Arc<ConnectionState>> {
        let entry = self.flows.read().await.get(tuple).cloned();
        if let Some(state) = &entry {
            state.touch();
        }
        entry
    }

    pub async fn remove(&self, tuple: &FiveTuple) {
        self.flows.write().await.remove(tuple);
    }

    /// Drops every flow idle longer than its TTL (10s for ICMP/ICMPv6,
    /// 10 minutes otherwise); intended to run every 10s from the task
    /// scheduler.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        self.flows.write().await.retain(|_, state| !state.is_expired(now));
    }

    pub async fn len(&self) -> usize {
        self.flows.read().await.len()
    }
}

impl Default for ConnectionStateTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuple() -> FiveTuple {
        FiveTuple {
            local: Ipv6Addr::LOCALHOST,
            remote: Ipv6Addr::LOCALHOST,
            protocol: 6,
            local_port: 1234,
            remote_port: 80,
        }
    }

    #[tokio::test]
    async fn resolving_twice_returns_the_same_object() {
        let table = ConnectionStateTable::new();
        let a = table.open(tuple(), ConnectionDirection::Outbound).await;
        let b = table.open(tuple(), ConnectionDirection::Outbound).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn status_change_notifies_waiters() {
        let table = ConnectionStateTable::new();
        let state = table.open(tuple(), ConnectionDirection::Outbound).await;
        assert_eq!(state.status().await, ConnectionStatus::Unknown);
        let notified = state.status_changed.notified();
        tokio::pin!(notified);
        state.set_status(ConnectionStatus::Allowed).await;
        notified.await;
        assert!(state.status().await.is_allowed());
    }

    #[tokio::test]
    async fn icmpv6_flows_are_short_lived() {
        let mut t = tuple();
        t.protocol = 58;
        assert!(t.is_short_lived());
        assert!(!tuple().is_short_lived());
    }
}
