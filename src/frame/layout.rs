//! V1 wire layout constants.

pub const VERSION: u8 = 1;

/// Offsets into the fixed 48-byte header.
pub const OFF_VERSION: usize = 0;
pub const OFF_TTL: usize = 1;
pub const OFF_FLOW_FLAGS: usize = 2;
pub const OFF_RECV_RATE: usize = 3;
pub const OFF_MESSAGE_TYPE: usize = 4;
pub const OFF_NONCE_PREFIX: usize = 5; // 3 bytes
pub const OFF_SEQUENCE_BLOCK: usize = 8; // 8 bytes
pub const OFF_SRC: usize = 16; // 16 bytes
pub const OFF_DST: usize = 32; // 16 bytes

/// Size of the fixed header (version .. end of destination address).
pub const HEADER_LEN: usize = 48;

/// Switch-block length prefix, immediately after the fixed header.
pub const OFF_SWITCH_LEN: usize = HEADER_LEN;
pub const SWITCH_LEN_FIELD_SIZE: usize = 1;
pub const MAX_SWITCH_BLOCK_LEN: usize = 255;

/// Width of one hop label within the switch block. Labels are 16-bit:
/// the switch block is a ring, rotated one label per hop rather than
/// popped and shrunk, so its length never changes along the path.
pub const SWITCH_LABEL_LEN: usize = 2;

/// Size of the message-length field (u16, big-endian).
pub const MESSAGE_LEN_FIELD_SIZE: usize = 2;
pub const MAX_MESSAGE_LEN: usize = 10_000;

/// Auth trailer sizes per message class.
pub const SIGNATURE_LEN: usize = 64;
pub const AEAD_TAG_LEN: usize = 16;

/// AEAD nonce length: the 3-byte nonce prefix plus the 8-byte sequence
/// block.
pub const AEAD_NONCE_LEN: usize = 12;

pub const MAX_APPENDIX_LEN: usize = 10_000;

/// Minimum possible V1 frame length; anything shorter is rejected outright
/// on parse regardless of field consistency.
pub const V1_MIN_FRAME: usize = 60;

/// Default TTL assigned to freshly built frames.
pub const DEFAULT_TTL: u8 = 32;
