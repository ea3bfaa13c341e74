//! The `Frame` type: a parsed view over a pooled buffer.

use std::net::Ipv6Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use thiserror::Error;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::switch::link::PeerLink;

use super::layout::*;
use super::message_type::{MessageType, UnknownMessageType};

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame shorter than the minimum V1 length ({V1_MIN_FRAME} bytes)")]
    TooShort,
    #[error("unsupported wire version {0}")]
    UnsupportedVersion(u8),
    #[error("switch block length {0} exceeds the maximum of {MAX_SWITCH_BLOCK_LEN}")]
    SwitchBlockTooLong(usize),
    #[error("message length {0} exceeds the maximum of {MAX_MESSAGE_LEN}")]
    MessageTooLong(usize),
    #[error("declared lengths overrun the buffer")]
    Truncated,
    #[error(transparent)]
    UnknownMessageType(#[from] UnknownMessageType),
    #[error("frame buffer already returned to its pool")]
    AlreadyReturned,
    #[error("frame's auth trailer is already non-zero: sealing twice without an intervening unseal is rejected")]
    AlreadySealed,
    #[error("cryptographic verification failed")]
    Crypto,
}

/// A peer link a frame arrived on, kept so replies can be routed back
/// without a routing-table lookup.
pub type RecvLink = Arc<dyn PeerLink>;

/// A frame backed by a pooled buffer. Frames own their storage until
/// explicitly returned (or dropped, which returns it implicitly).
pub struct Frame {
    data: Option<PooledBuffer>,
    start: usize,
    len: usize,
    returned: AtomicBool,
    recv_link: Option<RecvLink>,
}

impl Frame {
    /// Wraps a pooled buffer as a frame spanning `[start, start+len)`.
    pub fn from_parts(data: PooledBuffer, start: usize, len: usize) -> Self {
        Self {
            data: Some(data),
            start,
            len,
            returned: AtomicBool::new(false),
            recv_link: None,
        }
    }

    /// Assembles a fresh V1 frame from a pooled buffer, rejecting any
    /// field that violates spec.md §4.1's limits. The auth trailer is
    /// left zeroed; sealing (`frame::seal`) fills it in afterwards.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        pool: &std::sync::Arc<BufferPool>,
        src: Ipv6Addr,
        dst: Ipv6Addr,
        message_type: MessageType,
        switch_block: &[u8],
        payload: &[u8],
        appendix: &[u8],
    ) -> Result<Self, FrameError> {
        if payload.is_empty() {
            return Err(FrameError::Truncated);
        }
        if payload.len() > MAX_MESSAGE_LEN {
            return Err(FrameError::MessageTooLong(payload.len()));
        }
        if switch_block.len() > MAX_SWITCH_BLOCK_LEN {
            return Err(FrameError::SwitchBlockTooLong(switch_block.len()));
        }
        if appendix.len() > MAX_APPENDIX_LEN {
            return Err(FrameError::Truncated);
        }

        let auth_len = match message_type.class() {
            super::message_type::MessageClass::Signed => SIGNATURE_LEN,
            _ => AEAD_TAG_LEN,
        };
        let total_len = HEADER_LEN
            + SWITCH_LEN_FIELD_SIZE
            + switch_block.len()
            + MESSAGE_LEN_FIELD_SIZE
            + payload.len()
            + auth_len
            + appendix.len();

        let start = crate::buffer::POOL_FRONT_MARGIN;
        let mut buf = pool.borrow();
        if start + total_len > buf.capacity() {
            return Err(FrameError::Truncated);
        }

        {
            let body = &mut buf.as_mut_slice()[start..start + total_len];
            body[OFF_VERSION] = VERSION;
            body[OFF_TTL] = DEFAULT_TTL;
            body[OFF_FLOW_FLAGS] = 0;
            body[OFF_RECV_RATE] = 0;
            body[OFF_MESSAGE_TYPE] = message_type.as_u8();
            rand::Rng::fill(&mut rand::thread_rng(), &mut body[OFF_NONCE_PREFIX..OFF_NONCE_PREFIX + 3]);
            body[OFF_SEQUENCE_BLOCK..OFF_SEQUENCE_BLOCK + 8].fill(0);
            body[OFF_SRC..OFF_SRC + 16].copy_from_slice(&src.octets());
            body[OFF_DST..OFF_DST + 16].copy_from_slice(&dst.octets());
            body[OFF_SWITCH_LEN] = switch_block.len() as u8;

            let switch_off = OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE;
            body[switch_off..switch_off + switch_block.len()].copy_from_slice(switch_block);

            let len_off = switch_off + switch_block.len();
            body[len_off..len_off + 2].copy_from_slice(&(payload.len() as u16).to_be_bytes());

            let payload_off = len_off + MESSAGE_LEN_FIELD_SIZE;
            body[payload_off..payload_off + payload.len()].copy_from_slice(payload);

            let auth_off = payload_off + payload.len();
            body[auth_off..auth_off + auth_len].fill(0);

            let appendix_off = auth_off + auth_len;
            body[appendix_off..appendix_off + appendix.len()].copy_from_slice(appendix);
        }

        Ok(Self::from_parts(buf, start, total_len))
    }

    /// Parses and validates a buffer already populated with wire bytes,
    /// checking every declared length against spec.md §3's limits.
    pub fn parse(data: PooledBuffer, start: usize, len: usize) -> Result<Self, FrameError> {
        if len < V1_MIN_FRAME {
            return Err(FrameError::TooShort);
        }
        let buf = data.as_slice();
        if start + len > buf.len() {
            return Err(FrameError::Truncated);
        }
        let body = &buf[start..start + len];

        let version = body[OFF_VERSION];
        if version != VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }

        MessageType::from_u8(body[OFF_MESSAGE_TYPE])?;

        let switch_len = body[OFF_SWITCH_LEN] as usize;
        if switch_len > MAX_SWITCH_BLOCK_LEN {
            return Err(FrameError::SwitchBlockTooLong(switch_len));
        }
        let msg_len_off = OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE + switch_len;
        if msg_len_off + MESSAGE_LEN_FIELD_SIZE > body.len() {
            return Err(FrameError::Truncated);
        }
        let message_len =
            u16::from_be_bytes([body[msg_len_off], body[msg_len_off + 1]]) as usize;
        if message_len > MAX_MESSAGE_LEN {
            return Err(FrameError::MessageTooLong(message_len));
        }
        let payload_off = msg_len_off + MESSAGE_LEN_FIELD_SIZE;
        if payload_off + message_len > body.len() {
            return Err(FrameError::Truncated);
        }

        Ok(Self::from_parts(data, start, len))
    }

    fn body(&self) -> &[u8] {
        let data = self.data.as_ref().expect("frame buffer already returned");
        &data.as_slice()[self.start..self.start + self.len]
    }

    fn body_mut(&mut self) -> &mut [u8] {
        let start = self.start;
        let len = self.len;
        let data = self.data.as_mut().expect("frame buffer already returned");
        &mut data.as_mut_slice()[start..start + len]
    }

    pub fn version(&self) -> u8 {
        self.body()[OFF_VERSION]
    }

    pub fn ttl(&self) -> u8 {
        self.body()[OFF_TTL]
    }

    pub fn set_ttl(&mut self, ttl: u8) {
        self.body_mut()[OFF_TTL] = ttl;
    }

    pub fn decrement_ttl(&mut self) -> u8 {
        let new_ttl = self.ttl().saturating_sub(1);
        self.set_ttl(new_ttl);
        new_ttl
    }

    pub fn flow_flags(&self) -> u8 {
        self.body()[OFF_FLOW_FLAGS]
    }

    pub fn set_flow_flags(&mut self, flags: u8) {
        self.body_mut()[OFF_FLOW_FLAGS] = flags;
    }

    pub fn recv_rate(&self) -> u8 {
        self.body()[OFF_RECV_RATE]
    }

    pub fn set_recv_rate(&mut self, rate: u8) {
        self.body_mut()[OFF_RECV_RATE] = rate;
    }

    pub fn message_type(&self) -> MessageType {
        MessageType::from_u8(self.body()[OFF_MESSAGE_TYPE]).expect("validated on parse")
    }

    pub fn nonce_prefix(&self) -> [u8; 3] {
        let b = self.body();
        [b[OFF_NONCE_PREFIX], b[OFF_NONCE_PREFIX + 1], b[OFF_NONCE_PREFIX + 2]]
    }

    pub fn sequence_block(&self) -> [u8; 8] {
        let b = &self.body()[OFF_SEQUENCE_BLOCK..OFF_SEQUENCE_BLOCK + 8];
        b.try_into().expect("8-byte slice")
    }

    /// Decodes the sequence block as `(seqNum, ack)` for encrypted
    /// classes.
    pub fn sequence_numbers(&self) -> (u32, u32) {
        let b = self.sequence_block();
        (
            u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
        )
    }

    /// Decodes the sequence block as a millisecond timestamp for signed
    /// classes.
    pub fn signed_timestamp(&self) -> u64 {
        u64::from_be_bytes(self.sequence_block())
    }

    pub fn src(&self) -> Ipv6Addr {
        let b = &self.body()[OFF_SRC..OFF_SRC + 16];
        let octets: [u8; 16] = b.try_into().expect("16-byte slice");
        Ipv6Addr::from(octets)
    }

    pub fn dst(&self) -> Ipv6Addr {
        let b = &self.body()[OFF_DST..OFF_DST + 16];
        let octets: [u8; 16] = b.try_into().expect("16-byte slice");
        Ipv6Addr::from(octets)
    }

    fn switch_len(&self) -> usize {
        self.body()[OFF_SWITCH_LEN] as usize
    }

    pub fn switch_block(&self) -> &[u8] {
        let off = OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE;
        &self.body()[off..off + self.switch_len()]
    }

    fn message_len_offset(&self) -> usize {
        OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE + self.switch_len()
    }

    fn message_len(&self) -> usize {
        let off = self.message_len_offset();
        let b = self.body();
        u16::from_be_bytes([b[off], b[off + 1]]) as usize
    }

    fn payload_offset(&self) -> usize {
        self.message_len_offset() + MESSAGE_LEN_FIELD_SIZE
    }

    /// Everything from the header through the message-length field;
    /// stable across hops except for `ttl`/`flow_flags`, which the caller
    /// zeroes before using this as signed/AEAD associated data.
    pub fn prefix_through_message_len(&self) -> &[u8] {
        let end = self.payload_offset();
        &self.body()[..end]
    }

    pub fn message_payload(&self) -> &[u8] {
        let off = self.payload_offset();
        &self.body()[off..off + self.message_len()]
    }

    pub fn message_payload_mut(&mut self) -> &mut [u8] {
        let off = self.payload_offset();
        let len = self.message_len();
        self.body_mut()[off..off + len].as_mut()
    }

    pub fn set_sequence_block(&mut self, bytes: [u8; 8]) {
        self.body_mut()[OFF_SEQUENCE_BLOCK..OFF_SEQUENCE_BLOCK + 8].copy_from_slice(&bytes);
    }

    fn auth_offset(&self) -> usize {
        self.payload_offset() + self.message_len()
    }

    fn auth_len(&self) -> usize {
        match self.message_type().class() {
            super::message_type::MessageClass::Signed => SIGNATURE_LEN,
            _ => AEAD_TAG_LEN,
        }
    }

    pub fn auth_trailer(&self) -> &[u8] {
        let off = self.auth_offset();
        &self.body()[off..off + self.auth_len()]
    }

    /// Bytes after the auth trailer to the end of the frame, if any.
    /// Not length-prefixed: the appendix is everything remaining.
    pub fn appendix(&self) -> &[u8] {
        let off = self.auth_offset() + self.auth_len();
        let body = self.body();
        if off >= body.len() {
            &[]
        } else {
            &body[off..]
        }
    }

    pub fn recv_link(&self) -> Option<&RecvLink> {
        self.recv_link.as_ref()
    }

    pub fn set_recv_link(&mut self, link: RecvLink) {
        self.recv_link = Some(link);
    }

    /// Rotates the switch block by one label: the leading label (the next
    /// hop) is read off, every label behind it shifts left, and
    /// `incoming_label` (the label the previous hop should use to reach
    /// back through this router) is written into the slot the rotation
    /// vacates at the tail. The block's length is unchanged — this is a
    /// ring, not a stack — so the return path accumulates implicitly as
    /// the frame travels forward. Returns `None` once the block is
    /// shorter than one label, meaning this frame has reached its final
    /// hop.
    pub fn rotate_switch_ring(&mut self, incoming_label: u16) -> Option<u16> {
        let switch_len = self.switch_len();
        if switch_len < SWITCH_LABEL_LEN {
            return None;
        }
        let off = OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE;
        let tail = off + switch_len;
        let body = self.body_mut();
        let label = u16::from_be_bytes(
            body[off..off + SWITCH_LABEL_LEN].try_into().expect("checked length"),
        );
        body.copy_within(off + SWITCH_LABEL_LEN..tail, off);
        body[tail - SWITCH_LABEL_LEN..tail].copy_from_slice(&incoming_label.to_be_bytes());
        Some(label)
    }

    pub fn auth_trailer_mut(&mut self) -> &mut [u8] {
        let off = self.auth_offset();
        let len = self.auth_len();
        let start = self.start;
        let data = self.data.as_mut().expect("frame buffer already returned");
        &mut data.as_mut_slice()[start + off..start + off + len]
    }

    /// Overwrites the appendix in place. Fitting within the pooled
    /// buffer's remaining capacity may shrink or grow the frame; writing
    /// an empty slice removes the appendix entirely.
    pub fn set_appendix(&mut self, new: &[u8]) -> Result<(), FrameError> {
        if new.len() > MAX_APPENDIX_LEN {
            return Err(FrameError::Truncated);
        }
        let appendix_off = self.auth_offset() + self.auth_len();
        let new_total_len = appendix_off + new.len();
        let start = self.start;
        let capacity = self.data.as_ref().expect("frame buffer already returned").capacity();
        if start + new_total_len > capacity {
            return Err(FrameError::Truncated);
        }
        {
            let data = self.data.as_mut().expect("frame buffer already returned");
            let body = &mut data.as_mut_slice()[start..];
            body[appendix_off..appendix_off + new.len()].copy_from_slice(new);
        }
        self.len = new_total_len;
        Ok(())
    }

    /// Produces an independent copy of this frame backed by a freshly
    /// borrowed buffer from `pool`. The clone has no recv-link attached
    ///: it is treated as locally originated.
    pub fn clone_with(&self, pool: &std::sync::Arc<BufferPool>) -> Self {
        let start = crate::buffer::POOL_FRONT_MARGIN;
        let mut buf = pool.borrow();
        let body = self.body();
        buf.as_mut_slice()[start..start + body.len()].copy_from_slice(body);
        Self {
            data: Some(buf),
            start,
            len: self.len,
            returned: AtomicBool::new(false),
            recv_link: None,
        }
    }

    /// Re-initializes this frame as a reply: swaps source/destination,
    /// keeps the message type, replaces the switch block with `labels`
    /// and the payload with `data`, and sets a fresh appendix. The frame is rebuilt from a freshly borrowed
    /// buffer from `pool` so the original's storage is left untouched.
    pub fn reply(
        &self,
        pool: &std::sync::Arc<BufferPool>,
        labels: &[u8],
        data: &[u8],
        appendix: &[u8],
    ) -> Result<Self, FrameError> {
        Self::build(pool, self.dst(), self.src(), self.message_type(), labels, data, appendix)
    }

    /// Returns the backing buffer to its pool. Calling this twice panics:
    /// it indicates a use-after-return programming error.
    pub fn return_to_pool(&mut self) {
        if self.returned.swap(true, Ordering::AcqRel) {
            panic!("frame buffer returned to pool twice");
        }
        self.data = None;
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        // Dropping the Option<PooledBuffer> itself returns storage to the
        // pool; `returned` only guards against a caller double-calling
        // `return_to_pool` explicitly.
        self.data.take();
    }
}
