//! UDP forwarding, per spec.md section 4.3: "the first datagram to a new
//! destination creates a flow entry and a paired socket on the WG-side
//! stack; subsequent datagrams from the same source are routed to the
//! existing flow, not re-created." Must handle more than one subsequent
//! datagram correctly — an off-by-one here silently drops the second packet
//! of every UDP flow, which is easy to miss if only ever tested with one.

use std::collections::HashMap;
use std::net::SocketAddr;

use smoltcp::iface::SocketHandle;

use crate::proxy::{FlowId, FlowKind};

/// Tracks which WG-side UDP socket handle backs each active flow.
#[derive(Default)]
pub struct UdpForwarder {
    flows: HashMap<FlowId, SocketHandle>,
}

pub enum RouteDecision {
    /// The datagram belongs to a flow that already has a socket.
    Existing(SocketHandle),
    /// The datagram is the first for this tuple; the caller must allocate a
    /// socket and register it via `register`.
    New,
}

impl UdpForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(&self, source: SocketAddr, destination: SocketAddr) -> RouteDecision {
        let id = FlowId::new(FlowKind::Udp, source, destination);
        match self.flows.get(&id) {
            Some(handle) => RouteDecision::Existing(*handle),
            None => RouteDecision::New,
        }
    }

    pub fn register(&mut self, source: SocketAddr, destination: SocketAddr, handle: SocketHandle) {
        let id = FlowId::new(FlowKind::Udp, source, destination);
        self.flows.insert(id, handle);
    }

    pub fn remove(&mut self, source: SocketAddr, destination: SocketAddr) -> Option<SocketHandle> {
        let id = FlowId::new(FlowKind::Udp, source, destination);
        self.flows.remove(&id)
    }

    pub fn active_flow_count(&self) -> usize {
        self.flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for(n: usize) -> SocketHandle {
        // SocketHandle has no public constructor; round-trip one through a
        // real SocketSet so tests don't depend on its internal layout.
        let mut set = smoltcp::iface::SocketSet::new(Vec::new());
        let mut last = None;
        for _ in 0..=n {
            let rx = smoltcp::socket::udp::PacketBuffer::new(
                vec![smoltcp::socket::udp::PacketMetadata::EMPTY; 1],
                vec![0u8; 64],
            );
            let tx = smoltcp::socket::udp::PacketBuffer::new(
                vec![smoltcp::socket::udp::PacketMetadata::EMPTY; 1],
                vec![0u8; 64],
            );
            last = Some(set.add(smoltcp::socket::udp::Socket::new(rx, tx)));
        }
        last.unwrap()
    }

    #[test]
    fn first_datagram_is_a_new_flow() {
        let forwarder = UdpForwarder::new();
        let src: SocketAddr = "10.1.2.100:9000".parse().unwrap();
        let dst: SocketAddr = "8.8.8.8:53".parse().unwrap();
        assert!(matches!(forwarder.route(src, dst), RouteDecision::New));
    }

    #[test]
    fn subsequent_datagrams_route_to_existing_socket() {
        let mut forwarder = UdpForwarder::new();
        let src: SocketAddr = "10.1.2.100:9000".parse().unwrap();
        let dst: SocketAddr = "8.8.8.8:53".parse().unwrap();
        let handle = handle_for(0);
        forwarder.register(src, dst, handle);

        for _ in 0..5 {
            match forwarder.route(src, dst) {
                RouteDecision::Existing(h) => assert_eq!(h, handle),
                RouteDecision::New => panic!("expected an existing flow"),
            }
        }
    }

    #[test]
    fn different_destinations_are_distinct_flows() {
        let mut forwarder = UdpForwarder::new();
        let src: SocketAddr = "10.1.2.100:9000".parse().unwrap();
        let dst_a: SocketAddr = "8.8.8.8:53".parse().unwrap();
        let dst_b: SocketAddr = "1.1.1.1:53".parse().unwrap();
        forwarder.register(src, dst_a, handle_for(0));

        assert!(matches!(forwarder.route(src, dst_b), RouteDecision::New));
        assert_eq!(forwarder.active_flow_count(), 1);
    }
}
