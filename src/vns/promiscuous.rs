//! Inspects raw IP frames arriving on the TUN-side stack's device before
//! `smoltcp` gets a chance to drop them as "addressed to no socket we own",
//! per spec.md section 4.2: "on SYN: synthesize an accepted endpoint with
//! the SYN's 5-tuple intact" and "on first datagram from a new 5-tuple:
//! create an endpoint". `smoltcp` sockets are bound to a fixed local
//! endpoint, so there is no single "accept anything" listener for arbitrary
//! destinations — instead a fresh socket is bound to each newly observed
//! destination exactly once a SYN or first datagram for it is seen here.

use std::net::{IpAddr, SocketAddr};

use smoltcp::wire::{IpProtocol, Ipv4Packet, Ipv6Packet, TcpPacket, UdpPacket};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedFlow {
    /// A TCP segment; `syn` distinguishes a connection attempt from
    /// traffic for a flow this stack should already have a socket for.
    Tcp {
        source: SocketAddr,
        destination: SocketAddr,
        syn: bool,
    },
    Udp {
        source: SocketAddr,
        destination: SocketAddr,
    },
    Icmp,
    /// Anything this stack has no forwarding story for (truncated packet,
    /// unsupported next-header, non-IP frame).
    Unhandled,
}

/// Parses a raw IP frame far enough to classify it, without touching
/// `smoltcp`'s socket layer. Returns `None` only for frames too short or
/// malformed to contain even an IP version nibble.
pub fn inspect(frame: &[u8]) -> Option<ObservedFlow> {
    let version = frame.first()? >> 4;
    match version {
        4 => inspect_v4(frame),
        6 => inspect_v6(frame),
        _ => Some(ObservedFlow::Unhandled),
    }
}

fn inspect_v4(frame: &[u8]) -> Option<ObservedFlow> {
    let packet = Ipv4Packet::new_checked(frame).ok()?;
    let src = IpAddr::V4(packet.src_addr().into());
    let dst = IpAddr::V4(packet.dst_addr().into());
    Some(classify(packet.next_header(), src, dst, packet.payload()))
}

fn inspect_v6(frame: &[u8]) -> Option<ObservedFlow> {
    let packet = Ipv6Packet::new_checked(frame).ok()?;
    let src = IpAddr::V6(packet.src_addr().into());
    let dst = IpAddr::V6(packet.dst_addr().into());
    Some(classify(packet.next_header(), src, dst, packet.payload()))
}

fn classify(protocol: IpProtocol, src: IpAddr, dst: IpAddr, payload: &[u8]) -> ObservedFlow {
    match protocol {
        IpProtocol::Tcp => match TcpPacket::new_checked(payload) {
            Ok(tcp) => ObservedFlow::Tcp {
                source: SocketAddr::new(src, tcp.src_port()),
                destination: SocketAddr::new(dst, tcp.dst_port()),
                syn: tcp.syn() && !tcp.ack(),
            },
            Err(_) => ObservedFlow::Unhandled,
        },
        IpProtocol::Udp => match UdpPacket::new_checked(payload) {
            Ok(udp) => ObservedFlow::Udp {
                source: SocketAddr::new(src, udp.src_port()),
                destination: SocketAddr::new(dst, udp.dst_port()),
            },
            Err(_) => ObservedFlow::Unhandled,
        },
        IpProtocol::Icmp | IpProtocol::Icmpv6 => ObservedFlow::Icmp,
        _ => ObservedFlow::Unhandled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smoltcp::wire::{
        Ipv4Address, Ipv4Packet, Ipv4Repr, TcpControl, TcpPacket, TcpRepr, TcpSeqNumber,
    };

    fn build_tcp_syn(src_port: u16, dst_port: u16) -> Vec<u8> {
        let tcp_repr = TcpRepr {
            src_port,
            dst_port,
            control: TcpControl::Syn,
            seq_number: TcpSeqNumber(0),
            ack_number: None,
            window_len: 1024,
            window_scale: None,
            max_seg_size: None,
            sack_permitted: false,
            sack_ranges: [None, None, None],
            payload: &[],
        };
        let ip_repr = Ipv4Repr {
            src_addr: Ipv4Address::new(10, 1, 2, 100),
            dst_addr: Ipv4Address::new(93, 184, 216, 34),
            next_header: IpProtocol::Tcp,
            payload_len: tcp_repr.buffer_len(),
            hop_limit: 64,
        };
        let mut buf = vec![0u8; ip_repr.buffer_len() + tcp_repr.buffer_len()];
        let mut ip_packet = Ipv4Packet::new_unchecked(&mut buf);
        ip_repr.emit(&mut ip_packet, &Default::default());
        let mut tcp_packet = TcpPacket::new_unchecked(ip_packet.payload_mut());
        tcp_repr.emit(
            &mut tcp_packet,
            &ip_repr.src_addr.into(),
            &ip_repr.dst_addr.into(),
            &Default::default(),
        );
        buf
    }

    #[test]
    fn recognizes_a_tcp_syn() {
        let frame = build_tcp_syn(9000, 443);
        match inspect(&frame) {
            Some(ObservedFlow::Tcp {
                source,
                destination,
                syn,
            }) => {
                assert_eq!(source.port(), 9000);
                assert_eq!(destination.port(), 443);
                assert!(syn);
            }
            other => panic!("expected a tcp syn, got {other:?}"),
        }
    }

    #[test]
    fn truncated_frame_is_not_a_panic() {
        assert_eq!(inspect(&[0x45, 0x00]), None::<ObservedFlow>);
    }

    #[test]
    fn empty_frame_returns_none() {
        assert_eq!(inspect(&[]), None);
    }
}
