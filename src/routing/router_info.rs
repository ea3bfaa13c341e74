//! Router-info table: the identity and key material learned about other
//! routers via announce gossip (spec.md §4.8 step 3), keyed by overlay
//! address and expired the same way `RoutingTable` expires routes.

use std::collections::HashMap;
use std::net::Ipv6Addr;
use std::time::Instant;

use tokio::sync::RwLock;

use crate::address::PublicAddress;

#[derive(Debug, Clone)]
struct RouterInfoEntry {
    address: PublicAddress,
    expires_at: Instant,
}

/// Maps an overlay address to the verified `PublicAddress` last announced
/// for it. An announce's own stated expiry drives eviction here, not a
/// fixed table-wide TTL: a router that announces a long-lived expiry
/// stays known that long, a short one is forgotten sooner.
pub struct RouterInfoTable {
    entries: RwLock<HashMap<Ipv6Addr, RouterInfoEntry>>,
}

impl RouterInfoTable {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Records `address`'s router info, valid until `expires_at`. Always
    /// overwrites: gossip has no notion of an authoritative prior value,
    /// so the most recently verified announcement wins regardless of
    /// what was there before.
    pub async fn save(&self, address: PublicAddress, expires_at: Instant) {
        self.entries.write().await.insert(address.ip, RouterInfoEntry { address, expires_at });
    }

    pub async fn get(&self, addr: &Ipv6Addr) -> Option<PublicAddress> {
        let entries = self.entries.read().await;
        entries.get(addr).filter(|e| Instant::now() < e.expires_at).map(|e| e.address.clone())
    }

    /// Drops every entry whose announced expiry has passed; intended to
    /// run periodically from the task scheduler.
    pub async fn sweep_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, e| now < e.expires_at);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for RouterInfoTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::{PREFIX_BYTES, SigningKeyType};
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;
    use std::time::Duration;

    const PREFIX: [u8; PREFIX_BYTES] = [0xfd, 0x00];

    #[tokio::test]
    async fn saved_entry_is_retrievable_before_expiry() {
        let table = RouterInfoTable::new();
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        table.save(address.clone(), Instant::now() + Duration::from_secs(60)).await;
        let found = table.get(&address.ip).await.unwrap();
        assert_eq!(found.ip, address.ip);
    }

    #[tokio::test]
    async fn expired_entry_is_not_returned() {
        let table = RouterInfoTable::new();
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        table.save(address.clone(), Instant::now()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(table.get(&address.ip).await.is_none());
    }

    #[tokio::test]
    async fn sweep_removes_expired_entries() {
        let table = RouterInfoTable::new();
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = PublicAddress::derive(SigningKeyType::Ed25519, signing_key.verifying_key(), PREFIX);
        table.save(address.clone(), Instant::now()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        table.sweep_expired().await;
        assert_eq!(table.len().await, 0);
    }
}
