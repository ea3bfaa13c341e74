//! Synthesizing ICMPv6 error replies for dropped traffic.

use std::net::Ipv6Addr;

/// ICMPv6 type 1 (Destination Unreachable) codes used by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IcmpUnreachableCode {
    /// No route to the destination exists.
    NoRoute = 0,
    /// Inbound policy denied the packet.
    AdminProhibited = 1,
    /// The destination address failed verification.
    AddressUnreachable = 3,
}

const ICMPV6_TYPE_DEST_UNREACHABLE: u8 = 1;
const ICMPV6_TYPE_PACKET_TOO_BIG: u8 = 2;
const ICMPV6_TYPE_TIME_EXCEEDED: u8 = 3;

/// How many bytes of the original packet ICMPv6 error messages carry.
const ORIGINAL_PACKET_ECHO_LEN: usize = 48;

fn echo(original: &[u8]) -> &[u8] {
    &original[..original.len().min(ORIGINAL_PACKET_ECHO_LEN)]
}

/// Builds an ICMPv6 Destination Unreachable message body (type 1), with
/// the unused 4-byte field zeroed and the offending packet's first bytes
/// echoed back, per RFC 4443 §3.1.
pub fn destination_unreachable(code: IcmpUnreachableCode, original: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + ORIGINAL_PACKET_ECHO_LEN);
    body.push(ICMPV6_TYPE_DEST_UNREACHABLE);
    body.push(code as u8);
    body.extend_from_slice(&[0u8; 2]); // checksum filled in by the tun layer
    body.extend_from_slice(&[0u8; 4]); // unused
    body.extend_from_slice(echo(original));
    body
}

/// Builds an ICMPv6 Time Exceeded message body (type 3, code 0: hop
/// limit exceeded), used when a frame's TTL reaches zero mid-switch.
pub fn time_exceeded(original: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + ORIGINAL_PACKET_ECHO_LEN);
    body.push(ICMPV6_TYPE_TIME_EXCEEDED);
    body.push(0);
    body.extend_from_slice(&[0u8; 2]);
    body.extend_from_slice(&[0u8; 4]);
    body.extend_from_slice(echo(original));
    body
}

/// Builds an ICMPv6 Packet Too Big message body (type 2), reporting
/// `mtu` as the largest packet the overlay's tunnel will carry.
pub fn packet_too_big(mtu: u32, original: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(8 + ORIGINAL_PACKET_ECHO_LEN);
    body.push(ICMPV6_TYPE_PACKET_TOO_BIG);
    body.push(0);
    body.extend_from_slice(&[0u8; 2]);
    body.extend_from_slice(&mtu.to_be_bytes());
    body.extend_from_slice(echo(original));
    body
}

/// A fully-addressed ICMPv6 reply ready to be written back out the tun
/// interface towards `src` (the original packet's sender).
pub struct IcmpReply {
    pub dst: Ipv6Addr,
    pub body: Vec<u8>,
}

pub fn reply_unreachable(src: Ipv6Addr, code: IcmpUnreachableCode, original: &[u8]) -> IcmpReply {
    IcmpReply {
        dst: src,
        body: destination_unreachable(code, original),
    }
}

pub fn reply_time_exceeded(src: Ipv6Addr, original: &[u8]) -> IcmpReply {
    IcmpReply {
        dst: src,
        body: time_exceeded(original),
    }
}

pub fn reply_packet_too_big(src: Ipv6Addr, mtu: u32, original: &[u8]) -> IcmpReply {
    IcmpReply {
        dst: src,
        body: packet_too_big(mtu, original),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_unreachable_echoes_truncated_original() {
        let original = vec![0xab; 100];
        let body = destination_unreachable(IcmpUnreachableCode::AdminProhibited, &original);
        assert_eq!(body[0], ICMPV6_TYPE_DEST_UNREACHABLE);
        assert_eq!(body[1], IcmpUnreachableCode::AdminProhibited as u8);
        assert_eq!(body.len(), 8 + ORIGINAL_PACKET_ECHO_LEN);
    }

    #[test]
    fn packet_too_big_reports_mtu() {
        let original = vec![1, 2, 3];
        let body = packet_too_big(1400, &original);
        assert_eq!(u32::from_be_bytes([body[4], body[5], body[6], body[7]]), 1400);
    }
}
