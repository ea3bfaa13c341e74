//! Per-peer cryptographic session state.
//!
//! A session is created lazily the first time two routers need to
//! exchange encrypted traffic and is torn down (or simply left unset)
//! whenever the key-exchange state no longer holds — there is no
//! explicit session-close message on the wire, only a "not set up" state
//! that makes the next send trigger a fresh hello.

use std::sync::RwLock;

use ed25519_dalek::VerifyingKey;
use thiserror::Error;
use tokio::sync::Notify;

use crate::crypto::{AeadState, NumericSequenceFilter, SequenceClass, TimeSequenceFilter};
use crate::frame::{seal, Frame, MessageClass};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is not set up")]
    NotSetUp,
    #[error("signature verification failed")]
    BadSignature,
    #[error("AEAD operation failed")]
    BadAead,
    #[error(transparent)]
    Sequence(#[from] crate::crypto::SequenceError),
    #[error(transparent)]
    Signing(#[from] crate::crypto::SigningError),
}

/// Signing-side state: the remote's public key plus a replay filter over
/// the timestamps it has sent us.
pub struct SigningState {
    pub remote_key: VerifyingKey,
    pub replay: TimeSequenceFilter,
}

impl SigningState {
    pub fn new(remote_key: VerifyingKey) -> Self {
        Self {
            remote_key,
            replay: TimeSequenceFilter::with_default_precision(),
        }
    }
}

/// Encryption-side state: one AEAD key and independent sequence spaces
/// for priority (control) and bulk (data) traffic.
pub struct EncryptionState {
    pub aead: AeadState,
    pub priority_in: NumericSequenceFilter,
    pub bulk_in: NumericSequenceFilter,
}

impl EncryptionState {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            aead: AeadState::new(&key),
            priority_in: NumericSequenceFilter::new(),
            bulk_in: NumericSequenceFilter::new(),
        }
    }

    pub fn check_inbound(&self, class: SequenceClass, seq: u64) -> Result<(), crate::crypto::SequenceError> {
        match class {
            SequenceClass::Priority => self.priority_in.check(seq),
            SequenceClass::Bulk => self.bulk_in.check(seq),
        }
    }
}

/// All state mycoria keeps about one remote peer's session. `signing`
/// exists as soon as the peer's address/public key is known; `encryption`
/// only once a key exchange has completed.
pub struct Session {
    tunnel_mtu: RwLock<u16>,
    signing: RwLock<Option<SigningState>>,
    encryption: RwLock<Option<EncryptionState>>,
    /// Fired whenever `encryption` is installed, so a hot-path sender
    /// blocked on "is the handshake done yet" wakes as soon as it lands
    ///.
    pub encryption_ready: Notify,
}

impl Session {
    pub fn new(tunnel_mtu: u16) -> Self {
        Self {
            tunnel_mtu: RwLock::new(tunnel_mtu),
            signing: RwLock::new(None),
            encryption: RwLock::new(None),
            encryption_ready: Notify::new(),
        }
    }

    pub fn tunnel_mtu(&self) -> u16 {
        *self.tunnel_mtu.read().expect("session mutex poisoned")
    }

    pub fn set_tunnel_mtu(&self, mtu: u16) {
        *self.tunnel_mtu.write().expect("session mutex poisoned") = mtu;
    }

    pub fn install_signing(&self, remote_key: VerifyingKey) {
        *self.signing.write().expect("session mutex poisoned") = Some(SigningState::new(remote_key));
    }

    pub fn install_encryption(&self, key: [u8; 32]) {
        *self.encryption.write().expect("session mutex poisoned") = Some(EncryptionState::new(key));
        self.encryption_ready.notify_waiters();
    }

    /// Drops the encryption state, forcing the next send to renegotiate.
    /// Signing state (the remote's identity key) survives: it does not
    /// depend on key exchange.
    pub fn reset_encryption(&self) {
        *self.encryption.write().expect("session mutex poisoned") = None;
    }

    pub fn has_encryption(&self) -> bool {
        self.encryption.read().expect("session mutex poisoned").is_some()
    }

    pub fn check_incoming_timestamp(&self, t: u64) -> Result<(), SessionError> {
        let guard = self.signing.read().expect("session mutex poisoned");
        let state = guard.as_ref().ok_or(SessionError::NotSetUp)?;
        state.replay.check(t).map_err(SessionError::from)
    }

    pub fn remote_signing_key(&self) -> Result<VerifyingKey, SessionError> {
        let guard = self.signing.read().expect("session mutex poisoned");
        guard.as_ref().map(|s| s.remote_key).ok_or(SessionError::NotSetUp)
    }

    pub fn check_incoming_sequence(&self, class: SequenceClass, seq: u64) -> Result<(), SessionError> {
        let guard = self.encryption.read().expect("session mutex poisoned");
        let state = guard.as_ref().ok_or(SessionError::NotSetUp)?;
        state.check_inbound(class, seq).map_err(SessionError::from)
    }

    pub fn next_outbound_sequence(&self) -> Result<u64, SessionError> {
        let guard = self.encryption.read().expect("session mutex poisoned");
        let state = guard.as_ref().ok_or(SessionError::NotSetUp)?;
        Ok(state.aead.next_sequence())
    }

    /// Seals `frame` in place with this session's AEAD key, stamping
    /// `seq_num`/`ack`/`recv_rate` into the header.
    pub fn seal_outbound(
        &self,
        frame: &mut Frame,
        class: MessageClass,
        seq_num: u32,
        ack: u32,
        recv_rate: u8,
    ) -> Result<(), SessionError> {
        let guard = self.encryption.read().expect("session mutex poisoned");
        let state = guard.as_ref().ok_or(SessionError::NotSetUp)?;
        seal::seal_encrypted(frame, class, &state.aead, seq_num, ack, recv_rate)
            .map_err(|_| SessionError::BadAead)
    }

    /// Unseals `frame` in place with this session's AEAD key, returning
    /// the plaintext payload.
    pub fn unseal_inbound(&self, frame: &mut Frame, class: MessageClass) -> Result<Vec<u8>, SessionError> {
        let guard = self.encryption.read().expect("session mutex poisoned");
        let state = guard.as_ref().ok_or(SessionError::NotSetUp)?;
        seal::unseal_encrypted(frame, class, &state.aead).map_err(|_| SessionError::BadAead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn fresh_session_has_no_encryption() {
        let session = Session::new(1400);
        assert!(!session.has_encryption());
        assert!(matches!(session.next_outbound_sequence(), Err(SessionError::NotSetUp)));
    }

    #[test]
    fn installing_then_resetting_encryption_round_trips() {
        let session = Session::new(1400);
        session.install_encryption([1u8; 32]);
        assert!(session.has_encryption());
        assert_eq!(session.next_outbound_sequence().unwrap(), 0);
        assert_eq!(session.next_outbound_sequence().unwrap(), 1);
        session.reset_encryption();
        assert!(!session.has_encryption());
    }

    #[test]
    fn signing_state_survives_encryption_reset() {
        let session = Session::new(1400);
        let key = SigningKey::generate(&mut OsRng);
        session.install_signing(key.verifying_key());
        session.install_encryption([2u8; 32]);
        session.reset_encryption();
        assert!(session.remote_signing_key().is_ok());
    }
}
