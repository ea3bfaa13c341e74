//! Control-plane pings: hello (key exchange), announce (route gossip),
//! disconnect, typed errors, and the pingpong keepalive.

pub mod announce;
pub mod cooldown;
pub mod disconnect;
pub mod dispatch;
pub mod error_ping;
pub mod header;
pub mod hello;
pub mod pingpong;
pub mod registry;

use thiserror::Error;

use crate::frame::MessageType;

pub use dispatch::{encode_ping, parse_ping};
pub use header::{validate_ping_type, PingHeader, PingHeaderError};
pub use registry::{HandlerRegistry, PingContext, PingHandler, PingOutcome};

#[derive(Debug, Error)]
pub enum PingError {
    #[error(transparent)]
    Header(#[from] PingHeaderError),
    #[error("unknown ping type {0:?}")]
    UnknownPingType(String),
    #[error("message type {0:?} does not carry a ping")]
    WrongMessageType(MessageType),
    #[error("protocol violation: {0}")]
    Protocol(String),
}
