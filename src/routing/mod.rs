//! Destination routing, per-flow connection state, and ICMPv6 error
//! synthesis.

pub mod connection;
pub mod icmpv6;
pub mod router_info;
pub mod table;

pub use connection::{ConnectionDirection, ConnectionState, ConnectionStateTable, ConnectionStatus, FiveTuple};
pub use icmpv6::IcmpReply;
pub use router_info::RouterInfoTable;
pub use table::{Route, RouteSource, RoutingTable};

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no route to destination")]
    NoRoute,
    #[error("destination is unreachable: address failed verification")]
    AddressUnreachable,
}
