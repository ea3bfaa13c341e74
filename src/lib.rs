//! Mycoria core router.
//!
//! Turns raw IPv6 packets from a local virtual interface into authenticated
//! and encrypted overlay frames, forwards those frames across peers, and
//! maintains the state required to do so safely. See `SPEC_FULL.md` for the
//! full component breakdown.

pub mod address;
pub mod buffer;
pub mod config;
pub mod crypto;
pub mod error;
pub mod frame;
pub mod net_iface;
pub mod ping;
pub mod router;
pub mod routing;
pub mod session;
pub mod switch;
pub mod task;
pub mod time;

pub use address::{PublicAddress, SigningKeyType};
pub use config::RouterConfig;
pub use error::RouterError;
pub use frame::{Frame, MessageType};
pub use router::Router;
