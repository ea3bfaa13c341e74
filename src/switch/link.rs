//! The `PeerLink` contract the switch forwards frames across.

use std::net::SocketAddr;

use async_trait::async_trait;

use crate::frame::Frame;

/// A transport-agnostic connection to one directly-reachable peer. The
/// switch and session layers only ever see this trait, never the
/// concrete transport.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Stable label identifying this link for switch-path encoding.
    fn label(&self) -> u16;

    /// Whether this side initiated the connection.
    fn is_originator(&self) -> bool;

    fn local_addr(&self) -> SocketAddr;

    fn remote_addr(&self) -> SocketAddr;

    /// Round-trip latency estimate, if one has been measured.
    fn latency(&self) -> Option<std::time::Duration>;

    /// Whether the remote peer has signaled it wants sending slowed down.
    fn flow_control_active(&self) -> bool;

    fn is_closing(&self) -> bool;

    /// Enqueues a frame on the priority (signed/control) send queue.
    async fn send_priority(&self, frame: Frame) -> Result<(), LinkError>;

    /// Enqueues a frame on the bulk (data) send queue.
    async fn send_bulk(&self, frame: Frame) -> Result<(), LinkError>;
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link is closing")]
    Closing,
    #[error("send queue full")]
    QueueFull,
    #[error("transport error: {0}")]
    Transport(String),
}
