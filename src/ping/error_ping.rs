//! The `error` ping: a typed, cooldown-limited report that something
//! the sender requested failed.

use std::net::Ipv6Addr;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::routing::{ConnectionDirection, ConnectionStatus, FiveTuple};

use super::cooldown::Cooldown;
use super::header::{random_nonzero_ping_id, PingHeader, PingHeaderError};
use super::registry::{PingContext, PingHandler, PingOutcome};
use super::PingError;

pub const PING_TYPE: &str = "error";

/// Error reports and their receipt are both cooled down per (peer, code)
/// for 10s, so a persistently failing remote does not flood either side
///.
const ERROR_COOLDOWN: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u16)]
pub enum ErrorCode {
    Generic = 0,
    Unreachable = 1,
    NoEncryptionKeys = 2,
    AccessDenied = 3,
    Rejected = 4,
}

impl ErrorCode {
    fn from_u16(v: u16) -> Self {
        match v {
            1 => ErrorCode::Unreachable,
            2 => ErrorCode::NoEncryptionKeys,
            3 => ErrorCode::AccessDenied,
            4 => ErrorCode::Rejected,
            _ => ErrorCode::Generic,
        }
    }
}

/// The body shape varies by code: a bare string for
/// `Generic`, `{u}` for `Unreachable`, `{d,t,p}` for
/// `AccessDenied`/`Rejected`. Modeled as one optional-field struct rather
/// than an externally-tagged enum so unknown/absent fields decode
/// leniently, matching the ping header's own "absent fields default"
/// rule.
#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(rename = "u", default)]
    unreachable: Option<[u8; 16]>,
    #[serde(rename = "d", default)]
    dst: Option<[u8; 16]>,
    #[serde(rename = "t", default)]
    protocol: Option<u8>,
    #[serde(rename = "p", default)]
    port: Option<u16>,
}

pub struct ErrorPingHandler {
    send_cooldown: Cooldown,
    recv_cooldown: Cooldown,
}

impl ErrorPingHandler {
    pub fn new() -> Self {
        Self {
            send_cooldown: Cooldown::new(ERROR_COOLDOWN),
            recv_cooldown: Cooldown::new(ERROR_COOLDOWN),
        }
    }

    /// Whether a fresh error of `code` may be sent to `peer` right now;
    /// records the attempt if so.
    pub async fn may_send(&self, peer: Ipv6Addr, code: ErrorCode) -> bool {
        self.send_cooldown.should_fire(peer, code as u32).await
    }

    pub fn build_generic(message: impl Into<String>) -> Result<(PingHeader, Vec<u8>), PingError> {
        let body = ErrorBody {
            code: ErrorCode::Generic as u16,
            message: message.into(),
            unreachable: None,
            dst: None,
            protocol: None,
            port: None,
        };
        Self::encode(body)
    }

    pub fn build_unreachable(dst: Ipv6Addr) -> Result<(PingHeader, Vec<u8>), PingError> {
        let body = ErrorBody {
            code: ErrorCode::Unreachable as u16,
            message: String::new(),
            unreachable: Some(dst.octets()),
            dst: None,
            protocol: None,
            port: None,
        };
        Self::encode(body)
    }

    pub fn build_no_encryption_keys() -> Result<(PingHeader, Vec<u8>), PingError> {
        let body = ErrorBody {
            code: ErrorCode::NoEncryptionKeys as u16,
            message: String::new(),
            unreachable: None,
            dst: None,
            protocol: None,
            port: None,
        };
        Self::encode(body)
    }

    pub fn build_policy(code: ErrorCode, dst: Ipv6Addr, protocol: u8, port: u16) -> Result<(PingHeader, Vec<u8>), PingError> {
        debug_assert!(matches!(code, ErrorCode::AccessDenied | ErrorCode::Rejected));
        let body = ErrorBody {
            code: code as u16,
            message: String::new(),
            unreachable: None,
            dst: Some(dst.octets()),
            protocol: Some(protocol),
            port: Some(port),
        };
        Self::encode(body)
    }

    fn encode(body: ErrorBody) -> Result<(PingHeader, Vec<u8>), PingError> {
        let header = PingHeader::new(random_nonzero_ping_id(), PING_TYPE)?;
        let payload = serde_cbor::to_vec(&body).expect("serializable");
        Ok((header, payload))
    }
}

impl Default for ErrorPingHandler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PingHandler for ErrorPingHandler {
    async fn handle(&self, _header: &PingHeader, body: &[u8], ctx: &PingContext<'_>) -> Result<PingOutcome, PingError> {
        let body: ErrorBody = serde_cbor::from_slice(body).map_err(PingHeaderError::from)?;
        let code = ErrorCode::from_u16(body.code);

        if !self.recv_cooldown.should_fire(ctx.from, code as u32).await {
            return Ok(PingOutcome::None);
        }
        warn!(peer = %ctx.from, code = ?code, "peer reported an error");

        // Mark the affected local connection-state entry so the next
        // outbound attempt on that flow fails fast instead of repeating
        // the send that just failed.
        let status = match code {
            ErrorCode::Unreachable => Some(ConnectionStatus::Unreachable),
            ErrorCode::AccessDenied => Some(ConnectionStatus::Denied),
            ErrorCode::Rejected => Some(ConnectionStatus::Rejected),
            ErrorCode::NoEncryptionKeys | ErrorCode::Generic => None,
        };
        if let (Some(status), Some(dst_bytes)) = (status, body.dst.or(body.unreachable)) {
            let dst = Ipv6Addr::from(dst_bytes);
            let tuple = FiveTuple {
                local: dst,
                remote: ctx.from,
                protocol: body.protocol.unwrap_or(0),
                local_port: 0,
                remote_port: body.port.unwrap_or(0),
            };
            let entry = ctx.connections.open(tuple, ConnectionDirection::Outbound).await;
            entry.set_status(status).await;
        }
        Ok(PingOutcome::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips_through_u16() {
        assert_eq!(ErrorCode::from_u16(1), ErrorCode::Unreachable);
        assert_eq!(ErrorCode::from_u16(99), ErrorCode::Generic);
    }
}
