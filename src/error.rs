//! Top-level error aliasing. Each component defines its own `thiserror`
//! enum (`frame::FrameError`, `session::SessionError`, ...); `RouterError`
//! is the façade-level union the router dispatch loop deals in.

use thiserror::Error;

use crate::frame::FrameError;
use crate::ping::PingError;
use crate::routing::RoutingError;
use crate::session::SessionError;
use crate::switch::SwitchError;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),

    #[error("switch error: {0}")]
    Switch(#[from] SwitchError),

    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("ping error: {0}")]
    Ping(#[from] PingError),

    #[error("{0} is not yet supported")]
    NotYetSupported(&'static str),

    #[error("policy denied the packet")]
    PolicyDenied,
}
