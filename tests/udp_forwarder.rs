//! Fan-out coverage for `vns::udp_forwarder`: several concurrent flows from
//! the same source to different destinations, and from different sources to
//! the same destination, must stay independently routed.
use smoltcp::iface::SocketSet;
use smoltcp::socket::udp::{PacketBuffer, PacketMetadata, Socket};
use wirecage::vns::udp_forwarder::{RouteDecision, UdpForwarder};

fn new_handle(set: &mut SocketSet<'static>) -> smoltcp::iface::SocketHandle {
    let rx = PacketBuffer::new(vec![PacketMetadata::EMPTY; 4], vec![0u8; 256]);
    let tx = PacketBuffer::new(vec![PacketMetadata::EMPTY; 4], vec![0u8; 256]);
    set.add(Socket::new(rx, tx))
}

#[test]
fn many_destinations_from_one_source_stay_distinct() {
    let mut sockets = SocketSet::new(Vec::new());
    let mut forwarder = UdpForwarder::new();
    let source = "10.1.2.100:9000".parse().unwrap();

    let destinations: Vec<std::net::SocketAddr> = (0..16)
        .map(|i| format!("8.8.{i}.{i}:53").parse().unwrap())
        .collect();

    for dst in &destinations {
        assert!(matches!(forwarder.route(source, *dst), RouteDecision::New));
        forwarder.register(source, *dst, new_handle(&mut sockets));
    }

    assert_eq!(forwarder.active_flow_count(), destinations.len());

    for dst in &destinations {
        assert!(matches!(
            forwarder.route(source, *dst),
            RouteDecision::Existing(_)
        ));
    }
}

#[test]
fn same_destination_from_different_sources_stay_distinct() {
    let mut sockets = SocketSet::new(Vec::new());
    let mut forwarder = UdpForwarder::new();
    let destination = "1.1.1.1:53".parse().unwrap();

    let a = "10.1.2.100:9000".parse().unwrap();
    let b = "10.1.2.101:9000".parse().unwrap();

    forwarder.register(a, destination, new_handle(&mut sockets));
    assert!(matches!(
        forwarder.route(b, destination),
        RouteDecision::New
    ));
    forwarder.register(b, destination, new_handle(&mut sockets));

    assert_eq!(forwarder.active_flow_count(), 2);
    forwarder.remove(a, destination);
    assert_eq!(forwarder.active_flow_count(), 1);
    assert!(matches!(
        forwarder.route(b, destination),
        RouteDecision::Existing(_)
    ));
}
