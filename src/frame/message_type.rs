//! Message type byte and the class it maps to.

use thiserror::Error;

#[derive(Debug, Error)]
#[error("unknown message type byte {0}")]
pub struct UnknownMessageType(pub u8);

/// One byte identifying the kind of payload a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Hello, disconnect, error and ping-pong control pings.
    RouterPing = 0,
    /// Announce pings, forwarded hop-by-hop with a signed hop chain.
    RouterHopPing = 1,
    /// Preserved for backward compatibility; handled identically to
    /// `RouterHopPing`.
    RouterHopPingDeprecated = 2,
    /// User IPv6 traffic carried through the overlay.
    NetworkTraffic = 3,
    /// Reserved for a future encrypted control channel.
    SessionCtrl = 4,
    /// Reserved for a future encrypted data channel alongside
    /// `NetworkTraffic` (same open-question treatment).
    SessionData = 5,
}

/// The cryptographic treatment a `MessageType` receives when sealed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageClass {
    /// Ed25519-signed; used for router/hop pings.
    Signed,
    /// AEAD-sealed over the priority sequence space; control traffic.
    PriorityEncrypted,
    /// AEAD-sealed over the bulk sequence space; data traffic.
    Encrypted,
}

impl MessageType {
    pub fn from_u8(v: u8) -> Result<Self, UnknownMessageType> {
        match v {
            0 => Ok(MessageType::RouterPing),
            1 => Ok(MessageType::RouterHopPing),
            2 => Ok(MessageType::RouterHopPingDeprecated),
            3 => Ok(MessageType::NetworkTraffic),
            4 => Ok(MessageType::SessionCtrl),
            5 => Ok(MessageType::SessionData),
            other => Err(UnknownMessageType(other)),
        }
    }

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn class(self) -> MessageClass {
        match self {
            MessageType::RouterPing
            | MessageType::RouterHopPing
            | MessageType::RouterHopPingDeprecated => MessageClass::Signed,
            MessageType::SessionCtrl => MessageClass::PriorityEncrypted,
            MessageType::NetworkTraffic | MessageType::SessionData => MessageClass::Encrypted,
        }
    }

    /// Hop pings tolerate `immediate duplicate frame` during unseal because
    /// the same announcement may arrive via multiple peers.
    pub fn is_hop_ping(self) -> bool {
        matches!(self, MessageType::RouterHopPing | MessageType::RouterHopPingDeprecated)
    }

    /// Whether this type's traffic belongs on a link's priority send queue.
    pub fn is_priority(self) -> bool {
        match self.class() {
            MessageClass::Signed | MessageClass::PriorityEncrypted => true,
            MessageClass::Encrypted => false,
        }
    }

    /// Whether this type is encrypted (AEAD) rather than signed.
    pub fn is_encrypted(self) -> bool {
        matches!(self.class(), MessageClass::PriorityEncrypted | MessageClass::Encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_matches_spec() {
        assert_eq!(MessageType::RouterPing.class(), MessageClass::Signed);
        assert_eq!(MessageType::RouterHopPing.class(), MessageClass::Signed);
        assert_eq!(MessageType::RouterHopPingDeprecated.class(), MessageClass::Signed);
        assert_eq!(MessageType::SessionCtrl.class(), MessageClass::PriorityEncrypted);
        assert_eq!(MessageType::NetworkTraffic.class(), MessageClass::Encrypted);
        assert!(MessageType::RouterHopPing.is_hop_ping());
        assert!(MessageType::RouterHopPingDeprecated.is_hop_ping());
        assert!(!MessageType::RouterPing.is_hop_ping());
        assert!(MessageType::NetworkTraffic.is_priority() == false);
        assert!(MessageType::SessionCtrl.is_priority());
        assert!(MessageType::RouterPing.is_priority());
    }

    #[test]
    fn unknown_byte_is_rejected() {
        assert!(MessageType::from_u8(200).is_err());
    }
}
