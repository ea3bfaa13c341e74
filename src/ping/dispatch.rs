//! Glue between the frame codec and ping headers: extracting a
//! `(PingHeader, payload)` pair from a `RouterPing`/`RouterHopPing`
//! frame's message payload, and the reverse for building one to send.

use crate::frame::{MessageType, UnknownMessageType};

use super::header::PingHeader;
use super::PingError;

pub fn parse_ping(message_type: MessageType, payload: &[u8]) -> Result<(PingHeader, Vec<u8>), PingError> {
    match message_type {
        MessageType::RouterPing | MessageType::RouterHopPing | MessageType::RouterHopPingDeprecated => {
            let (header, body) = PingHeader::decode_body(payload)?;
            Ok((header, body.to_vec()))
        }
        other => Err(PingError::WrongMessageType(other)),
    }
}

pub fn encode_ping(header: &PingHeader, body: &[u8]) -> Result<Vec<u8>, PingError> {
    Ok(header.encode_body(body)?)
}

impl From<UnknownMessageType> for PingError {
    fn from(e: UnknownMessageType) -> Self {
        PingError::Protocol(e.to_string())
    }
}
