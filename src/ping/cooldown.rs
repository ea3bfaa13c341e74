//! Generic per-peer, per-key cooldown used to deduplicate noisy pings
//! (error reports, repeated disconnects) without tracking full history.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CooldownKey {
    peer: Ipv6Addr,
    tag: u32,
}

/// Tracks the last time each `(peer, tag)` pair fired, suppressing
/// repeats within `window`.
pub struct Cooldown {
    window: Duration,
    last_seen: Mutex<HashMap<CooldownKey, Instant>>,
}

impl Cooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this `(peer, tag)` pair should be acted on now
    /// (and records that it fired), `false` if it is still cooling down.
    pub async fn should_fire(&self, peer: Ipv6Addr, tag: u32) -> bool {
        let key = CooldownKey { peer, tag };
        let now = Instant::now();
        let mut map = self.last_seen.lock().await;
        match map.get(&key) {
            Some(last) if now.duration_since(*last) < self.window => false,
            _ => {
                map.insert(key, now);
                true
            }
        }
    }

    /// Forgets entries older than `window`; intended for periodic
    /// scheduling so the map does not grow unbounded.
    pub async fn sweep(&self) {
        let now = Instant::now();
        let window = self.window;
        self.last_seen.lock().await.retain(|_, last| now.duration_since(*last) < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv6Addr;

    #[tokio::test]
    async fn first_call_fires_second_is_suppressed() {
        let cooldown = Cooldown::new(Duration::from_secs(60));
        let peer = Ipv6Addr::LOCALHOST;
        assert!(cooldown.should_fire(peer, 1).await);
        assert!(!cooldown.should_fire(peer, 1).await);
    }

    #[tokio::test]
    async fn different_tags_are_independent() {
        let cooldown = Cooldown::new(Duration::from_secs(60));
        let peer = Ipv6Addr::LOCALHOST;
        assert!(cooldown.should_fire(peer, 1).await);
        assert!(cooldown.should_fire(peer, 2).await);
    }
}
