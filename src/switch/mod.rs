//! Label-based hop forwarding.
//!
//! Each frame's switch block is a ring of 16-bit labels chosen by the
//! originating router. A switch reads the label at the front, shifts
//! the rest left, and writes the label the recv-link knows this router
//! by into the vacated tail slot (`Frame::rotate_switch_ring`) — the
//! block's length never changes along the path, and by the time it
//! reaches the destination it has been rewritten, label by label, into
//! a path back to the origin.

pub mod link;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace};

pub use link::{LinkError, PeerLink};

use std::net::Ipv6Addr;

use crate::config::is_broadcast;
use crate::frame::Frame;

#[derive(Debug, Error)]
pub enum SwitchError {
    #[error("frame's TTL reached zero")]
    TtlExceeded,
    #[error("no link registered for switch label {0}")]
    UnknownLabel(u16),
    #[error("frame has no recv-link attached")]
    NoRecvLink,
    #[error("frame's source is this router (dropped to avoid a loop)")]
    SourceIsSelf,
    #[error(transparent)]
    Link(#[from] LinkError),
}

/// Outcome of handing a frame to the switch.
pub enum SwitchOutcome {
    /// The frame was forwarded to another link.
    Forwarded,
    /// This frame is addressed to us (or broadcast): hand back for local
    /// delivery.
    Delivered(Frame),
}

/// Assigns and resolves the local labels this router's links are known
/// by, and performs the rotate-and-forward step of the switch layer.
pub struct Switch {
    links: RwLock<HashMap<u16, Arc<dyn PeerLink>>>,
    next_label: AtomicU16,
    self_address: Ipv6Addr,
}

impl Switch {
    pub fn new(self_address: Ipv6Addr) -> Self {
        Self {
            links: RwLock::new(HashMap::new()),
            next_label: AtomicU16::new(1),
            self_address,
        }
    }

    /// Registers a link and returns the label peers should use to reach
    /// it through this switch. Label `0` is reserved and never handed
    /// out.
    pub async fn register_link(&self, link: Arc<dyn PeerLink>) -> u16 {
        let label = self.next_label.fetch_add(1, Ordering::Relaxed);
        self.links.write().await.insert(label, link);
        label
    }

    pub async fn deregister_label(&self, label: u16) {
        self.links.write().await.remove(&label);
    }

    pub async fn link_by_label(&self, label: u16) -> Option<Arc<dyn PeerLink>> {
        self.links.read().await.get(&label).cloned()
    }

    /// All currently-registered links, labeled. Used by announce gossip
    /// to flood to every peer except the one it arrived on.
    pub async fn all_links(&self) -> Vec<(u16, Arc<dyn PeerLink>)> {
        self.links.read().await.iter().map(|(l, link)| (*l, link.clone())).collect()
    }

    /// Rotates the frame's leading switch label in off the recv-link it
    /// arrived on and forwards it to the matching link. A frame addressed
    /// to this router's own address, or to the prefix's broadcast address,
    /// is handed back for local delivery untouched; a frame whose switch
    /// block has already run dry without reaching either is a routing
    /// error, not a delivery.
    pub async fn handle(&self, mut frame: Frame) -> Result<SwitchOutcome, SwitchError> {
        if frame.src() == self.self_address {
            return Err(SwitchError::SourceIsSelf);
        }
        let recv_link = frame.recv_link().cloned().ok_or(SwitchError::NoRecvLink)?;

        if frame.dst() == self.self_address || is_broadcast(&frame.dst()) {
            return Ok(SwitchOutcome::Delivered(frame));
        }

        let label = match frame.rotate_switch_ring(recv_link.label()) {
            Some(label) => label,
            None => return Err(SwitchError::UnknownLabel(0)),
        };

        let link = {
            let links = self.links.read().await;
            links.get(&label).cloned()
        }
        .ok_or(SwitchError::UnknownLabel(label))?;

        trace!(label, "forwarding frame by switch label");
        self.forward_by_peer(frame, &link).await
    }

    /// Looks up `label` and forwards the frame to it. The named entry
    /// point for a caller that has already resolved a next-hop label
    /// itself (routing-table lookups at the originating router), as
    /// opposed to one re-read off an inbound frame's switch block.
    pub async fn forward_by_label(&self, frame: Frame, label: u16) -> Result<SwitchOutcome, SwitchError> {
        let link = self.links.read().await.get(&label).cloned().ok_or(SwitchError::UnknownLabel(label))?;
        self.forward_by_peer(frame, &link).await
    }

    /// Sends a frame directly to a known link. Both this and
    /// `forward_by_label` are the switch's two forwarding entry points,
    /// so TTL and the overlay flow-control flag are enforced here rather
    /// than in `handle`, which a caller can bypass entirely when it has
    /// already resolved the next hop itself.
    pub async fn forward_by_peer(
        &self,
        mut frame: Frame,
        link: &Arc<dyn PeerLink>,
    ) -> Result<SwitchOutcome, SwitchError> {
        if link.is_closing() {
            return Err(SwitchError::Link(LinkError::Closing));
        }
        if frame.decrement_ttl() == 0 {
            return Err(SwitchError::TtlExceeded);
        }
        frame.set_flow_flags(if link.flow_control_active() { 1 } else { 0 });
        if frame.message_type().is_priority() {
            link.send_priority(frame).await?;
        } else {
            link.send_bulk(frame).await?;
        }
        debug!(label = link.label(), "frame handed to link");
        Ok(SwitchOutcome::Forwarded)
    }
}

/// Encodes a label path (as stored in the routing table) into the raw
/// switch-block bytes a frame carries: big-endian 16-bit labels, one per
/// remaining hop.
pub fn encode_switch_block(labels: &[u16]) -> Vec<u8> {
    let mut block = Vec::with_capacity(labels.len() * 2);
    for label in labels {
        block.extend_from_slice(&label.to_be_bytes());
    }
    block
}

#[cfg(test)]
mod path_tests {
    use super::*;

    #[test]
    fn encode_switch_block_is_big_endian_labels() {
        let block = encode_switch_block(&[1, 2]);
        assert_eq!(block, vec![0, 1, 0, 2]);
    }
}
