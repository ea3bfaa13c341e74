//! The local collaborators the router façade drives but does not own:
//! the virtual network interface ("tun") and the embedded net-stack
//! endpoint that answers the well-known local API address.
//!
//! Neither trait has a provided implementation in this crate: wiring a
//! real tun device or HTTP/API stack is the job of the binary that
//! assembles a `Router`.

use async_trait::async_trait;

use crate::error::RouterError;

/// The local virtual network interface: the kernel-visible device that
/// carries IPv6 packets between this process and the local host's
/// network stack.
///
/// `send_raw_offset` mirrors the buffer pool's front margin
/// (`buffer::POOL_FRONT_MARGIN`): some platforms require OS framing
/// (e.g. a 4-byte address-family header) prepended before a packet can
/// be written to the device, and reserving that space up front avoids a
/// reallocation on every outbound packet.
#[async_trait]
pub trait TunDevice: Send + Sync {
    /// Blocks until the next raw IPv6 packet is available from the
    /// local host, or returns `None` once the device is closed.
    async fn recv(&self) -> Option<Vec<u8>>;

    /// Submits a packet to be delivered to the local host. Implementations
    /// must not block a caller indefinitely: use a bounded queue and fail
    /// fast rather than stall a worker.
    async fn send(&self, packet: &[u8]) -> Result<(), RouterError>;

    /// Number of bytes of OS framing this device needs prepended before
    /// the IPv6 header when writing a packet out.
    fn send_raw_offset(&self) -> usize {
        0
    }

    /// The configured tunnel MTU, mirrored here so the traffic pipeline
    /// does not need a separate lookup for locally-sourced decisions.
    fn mtu(&self) -> u16;
}

/// The embedded net-stack endpoint that answers packets addressed to
/// the well-known local API address.
/// Out of scope for this crate beyond the contract: a real deployment
/// backs this with an HTTP status surface or similar.
#[async_trait]
pub trait NetStackEndpoint: Send + Sync {
    /// Hands a raw IPv6 packet addressed to the local API address to the
    /// embedded stack; any reply is written back out `TunDevice::send`
    /// by the stack's own driver, not returned here.
    async fn handle_local_packet(&self, packet: &[u8]);
}

/// A `NetStackEndpoint` that drops every packet; useful for router
/// instances that do not expose a local API surface (and for tests).
pub struct NoLocalApi;

#[async_trait]
impl NetStackEndpoint for NoLocalApi {
    async fn handle_local_packet(&self, _packet: &[u8]) {}
}
