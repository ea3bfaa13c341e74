//! Destination routing table.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

/// Where a route entry came from, used to break ties when two
/// announcements describe the same destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteSource {
    /// Learned from an announce ping's hop chain.
    Announce,
    /// The destination is a directly-connected peer.
    DirectPeer,
}

#[derive(Debug, Clone)]
pub struct Route {
    /// The switch-block label sequence to reach this destination.
    pub switch_path: Vec<u16>,
    pub source: RouteSource,
    pub hop_count: u8,
    /// Summed link delay (milliseconds) along `switch_path`, as reported
    /// hop-by-hop in an announce's signed chain. Secondary tie-breaker
    /// behind `hop_count` when comparing two routes to the same
    /// destination.
    pub delay: u16,
    expires_at: Instant,
}

impl Route {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Maps destination addresses to the best known route, refreshed by
/// announce gossip and expired if not refreshed within `ttl`.
pub struct RoutingTable {
    routes: RwLock<HashMap<Ipv6Addr, Route>>,
    ttl: Duration,
}

impl RoutingTable {
    pub fn new(ttl: Duration) -> Self {
        Self {
            routes: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Inserts or replaces a route if it is an improvement: direct-peer
    /// routes always win over announce-derived ones for the same
    /// destination; otherwise a candidate replaces the existing route
    /// only when it is strictly better by `(hop_count, delay, expiry)` in
    /// that order — fewer hops wins outright, a tie falls to lower
    /// summed delay, and a tie on both falls to whichever expires later
    /// (in practice always the candidate, since it is evaluated now).
    /// Returns whether the route was actually installed, so callers like
    /// the announce handler can skip re-flooding a chain that did not
    /// improve on what is already known.
    pub async fn add_route(&self, dst: Ipv6Addr, switch_path: Vec<u16>, source: RouteSource, hop_count: u8, delay: u16) -> bool {
        let mut routes = self.routes.write().await;
        let candidate_expires_at = Instant::now() + self.ttl;
        let entry = routes.get(&dst);
        let should_replace = match entry {
            None => true,
            Some(existing) => match (existing.source, source) {
                (RouteSource::DirectPeer, RouteSource::Announce) => false,
                (RouteSource::Announce, RouteSource::DirectPeer) => true,
                _ => {
                    let candidate_key = (hop_count, delay, std::cmp::Reverse(candidate_expires_at));
                    let existing_key = (existing.hop_count, existing.delay, std::cmp::Reverse(existing.expires_at));
                    candidate_key < existing_key
                }
            },
        };
        if should_replace {
            routes.insert(
                dst,
                Route {
                    switch_path,
                    source,
                    hop_count,
                    delay,
                    expires_at: candidate_expires_at,
                },
            );
        }
        should_replace
    }

    pub async fn lookup_nearest(&self, dst: &Ipv6Addr) -> Option<Route> {
        let routes = self.routes.read().await;
        routes.get(dst).filter(|r| !r.is_expired(Instant::now())).cloned()
    }

    /// Drops the route to `router`, if any. `via` is accepted for the
    /// shape spec.md §4.5 describes ("optionally restricted to those
    /// received via a specific peer") but this table indexes routes by
    /// destination only, not by the chain of routers a route's path
    /// passes through, so it cannot in general tell whether some other
    /// destination's route happens to traverse `router` partway along.
    /// Narrowing that down would need the switch layer's label-to-peer
    /// map threaded in here; see `DESIGN.md`. Returns how many entries
    /// were removed (0 or 1 with the current exact-destination model).
    pub async fn remove_disconnected(&self, router: &Ipv6Addr, via: Option<Ipv6Addr>) -> usize {
        let mut routes = self.routes.write().await;
        if let Some(existing) = routes.get(router) {
            if let Some(via) = via {
                // A route this table itself learned directly from `via`
                // is only removed when `via` is the very router going
                // away; gossip-learned routes are removed unconditionally
                // since their announcing peer is not necessarily the
                // router the route is *for*.
                if existing.source == RouteSource::DirectPeer && via != *router {
                    return 0;
                }
            }
            routes.remove(router);
            1
        } else {
            0
        }
    }

    /// Drops every entry older than `ttl`; intended to run periodically
    /// from the task scheduler.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        self.routes.write().await.retain(|_, r| !r.is_expired(now));
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }
}
