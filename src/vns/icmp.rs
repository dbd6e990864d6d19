//! ICMP handling, per spec.md section 4.3: "ICMP is logged and dropped; the
//! sandbox never originates an ICMP reply." This is a policy decision, not
//! a protocol limitation — answering pings would require tracking sequence
//! numbers and identifiers per peer for a feature nothing in the Non-goals
//! asked for.

use smoltcp::wire::{Icmpv4Packet, Icmpv4Repr, Icmpv6Packet, Icmpv6Repr};
use tracing::debug;

pub fn observe_v4(packet: &[u8]) {
    match Icmpv4Packet::new_checked(packet).and_then(|p| Icmpv4Repr::parse(&p, &Default::default())) {
        Ok(repr) => debug!(?repr, "dropping icmpv4 packet"),
        Err(_) => debug!("dropping unparseable icmpv4 packet"),
    }
}

pub fn observe_v6(packet: &[u8]) {
    match Icmpv6Packet::new_checked(packet).and_then(|p| Icmpv6Repr::parse(
        &smoltcp::wire::IpAddress::Ipv6(smoltcp::wire::Ipv6Address::UNSPECIFIED),
        &smoltcp::wire::IpAddress::Ipv6(smoltcp::wire::Ipv6Address::UNSPECIFIED),
        &p,
        &Default::default(),
    )) {
        Ok(repr) => debug!(?repr, "dropping icmpv6 packet"),
        Err(_) => debug!("dropping unparseable icmpv6 packet"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malformed_packet_does_not_panic() {
        observe_v4(&[0u8; 2]);
        observe_v6(&[0u8; 2]);
    }
}
