//! The V1 wire frame: layout constants, message types and the
//! seal/unseal primitives built on top of them.

pub mod frame;
pub mod layout;
pub mod message_type;
pub mod seal;

pub use frame::{Frame, FrameError, RecvLink};
pub use message_type::{MessageClass, MessageType, UnknownMessageType};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use layout::*;

    fn build_signed_frame(message_type: MessageType, payload: &[u8]) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + 1 + 2 + payload.len() + SIGNATURE_LEN];
        buf[OFF_VERSION] = VERSION;
        buf[OFF_TTL] = DEFAULT_TTL;
        buf[OFF_MESSAGE_TYPE] = message_type.as_u8();
        buf[OFF_SWITCH_LEN] = 0;
        let len_off = OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE;
        buf[len_off..len_off + 2].copy_from_slice(&(payload.len() as u16).to_be_bytes());
        let payload_off = len_off + 2;
        buf[payload_off..payload_off + payload.len()].copy_from_slice(payload);
        buf
    }

    #[test]
    fn parse_rejects_frames_shorter_than_minimum() {
        let pool = BufferPool::with_default_size();
        let mut buf = pool.borrow();
        buf.as_mut_slice()[..10].copy_from_slice(&[0u8; 10]);
        assert!(matches!(Frame::parse(buf, 0, 10), Err(FrameError::TooShort)));
    }

    #[test]
    fn parse_rejects_unsupported_version() {
        let pool = BufferPool::with_default_size();
        let mut raw = build_signed_frame(MessageType::RouterPing, b"hi");
        raw[OFF_VERSION] = 99;
        let mut buf = pool.borrow();
        buf.as_mut_slice()[..raw.len()].copy_from_slice(&raw);
        assert!(matches!(Frame::parse(buf, 0, raw.len()), Err(FrameError::UnsupportedVersion(99))));
    }

    #[test]
    fn parse_accepts_well_formed_frame_and_exposes_fields() {
        let pool = BufferPool::with_default_size();
        let raw = build_signed_frame(MessageType::RouterPing, b"hello");
        let mut buf = pool.borrow();
        buf.as_mut_slice()[..raw.len()].copy_from_slice(&raw);
        let frame = Frame::parse(buf, 0, raw.len()).unwrap();
        assert_eq!(frame.version(), VERSION);
        assert_eq!(frame.message_type(), MessageType::RouterPing);
        assert_eq!(frame.message_payload(), b"hello");
        assert_eq!(frame.switch_block(), &[] as &[u8]);
    }

    #[test]
    fn rotate_switch_ring_shifts_and_writes_incoming_label() {
        let pool = BufferPool::with_default_size();
        let mut raw = vec![0u8; HEADER_LEN + 1 + 4 + 2 + SIGNATURE_LEN];
        raw[OFF_VERSION] = VERSION;
        raw[OFF_MESSAGE_TYPE] = MessageType::RouterHopPing.as_u8();
        raw[OFF_SWITCH_LEN] = 4;
        let switch_off = OFF_SWITCH_LEN + SWITCH_LEN_FIELD_SIZE;
        raw[switch_off..switch_off + 2].copy_from_slice(&1u16.to_be_bytes());
        raw[switch_off + 2..switch_off + 4].copy_from_slice(&2u16.to_be_bytes());
        let len_off = switch_off + 4;
        raw[len_off..len_off + 2].copy_from_slice(&0u16.to_be_bytes());

        let mut buf = pool.borrow();
        buf.as_mut_slice()[..raw.len()].copy_from_slice(&raw);
        let mut frame = Frame::parse(buf, 0, raw.len()).unwrap();

        // Ring is [1, 2]; rotating in 9 reads off 1 and leaves [2, 9].
        let first = frame.rotate_switch_ring(9).unwrap();
        assert_eq!(first, 1);
        assert_eq!(frame.switch_block().len(), 4);
        assert_eq!(frame.switch_block(), &[0, 2, 0, 9]);

        // Rotating again reads off 2 and leaves [9, 7]; length never shrinks.
        let second = frame.rotate_switch_ring(7).unwrap();
        assert_eq!(second, 2);
        assert_eq!(frame.switch_block(), &[0, 9, 0, 7]);
    }

    #[test]
    fn rotate_switch_ring_is_none_once_block_is_too_short() {
        let pool = BufferPool::with_default_size();
        let raw = build_signed_frame(MessageType::RouterPing, b"hi");
        let mut buf = pool.borrow();
        buf.as_mut_slice()[..raw.len()].copy_from_slice(&raw);
        let mut frame = Frame::parse(buf, 0, raw.len()).unwrap();
        assert!(frame.rotate_switch_ring(1).is_none());
    }
}
