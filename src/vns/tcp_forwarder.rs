//! TCP forwarding, per spec.md section 4.3: "at most 100 in-flight
//! connections; a retransmitted SYN for a flow already being dialed must
//! not start a second dial."

use std::collections::HashMap;
use std::net::SocketAddr;

use smoltcp::iface::SocketHandle;

use crate::proxy::{FlowId, FlowKind};

pub const MAX_IN_FLIGHT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectState {
    Dialing,
    Established,
}

pub struct TcpForwarder {
    flows: HashMap<FlowId, (SocketHandle, ConnectState)>,
}

impl Default for TcpForwarder {
    fn default() -> Self {
        TcpForwarder {
            flows: HashMap::new(),
        }
    }
}

pub enum AdmitDecision {
    /// A new flow, and there is capacity to dial it.
    Admit,
    /// A SYN retransmit for a dial already in progress; the caller must not
    /// start a second dial.
    AlreadyDialing,
    /// The in-flight limit is reached; the SYN should be ignored so the
    /// peer retries once capacity frees up.
    OverCapacity,
}

impl TcpForwarder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn admit(&self, source: SocketAddr, destination: SocketAddr) -> AdmitDecision {
        let id = FlowId::new(FlowKind::Tcp, source, destination);
        if self.flows.contains_key(&id) {
            return AdmitDecision::AlreadyDialing;
        }
        if self.flows.len() >= MAX_IN_FLIGHT {
            return AdmitDecision::OverCapacity;
        }
        AdmitDecision::Admit
    }

    pub fn begin_dial(&mut self, source: SocketAddr, destination: SocketAddr, handle: SocketHandle) {
        let id = FlowId::new(FlowKind::Tcp, source, destination);
        self.flows.insert(id, (handle, ConnectState::Dialing));
    }

    pub fn mark_established(&mut self, source: SocketAddr, destination: SocketAddr) {
        let id = FlowId::new(FlowKind::Tcp, source, destination);
        if let Some(entry) = self.flows.get_mut(&id) {
            entry.1 = ConnectState::Established;
        }
    }

    pub fn remove(&mut self, source: SocketAddr, destination: SocketAddr) -> Option<SocketHandle> {
        let id = FlowId::new(FlowKind::Tcp, source, destination);
        self.flows.remove(&id).map(|(handle, _)| handle)
    }

    pub fn in_flight_count(&self) -> usize {
        self.flows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle_for() -> SocketHandle {
        let mut set = smoltcp::iface::SocketSet::new(Vec::new());
        let rx = smoltcp::socket::tcp::SocketBuffer::new(vec![0u8; 64]);
        let tx = smoltcp::socket::tcp::SocketBuffer::new(vec![0u8; 64]);
        set.add(smoltcp::socket::tcp::Socket::new(rx, tx))
    }

    #[test]
    fn retransmitted_syn_does_not_start_a_second_dial() {
        let mut forwarder = TcpForwarder::new();
        let src: SocketAddr = "10.1.2.100:9000".parse().unwrap();
        let dst: SocketAddr = "93.184.216.34:443".parse().unwrap();

        assert!(matches!(forwarder.admit(src, dst), AdmitDecision::Admit));
        forwarder.begin_dial(src, dst, handle_for());
        assert!(matches!(
            forwarder.admit(src, dst),
            AdmitDecision::AlreadyDialing
        ));
    }

    #[test]
    fn over_capacity_flows_are_rejected() {
        let mut forwarder = TcpForwarder::new();
        for i in 0..MAX_IN_FLIGHT {
            let src: SocketAddr = format!("10.1.2.100:{}", 10000 + i).parse().unwrap();
            let dst: SocketAddr = "93.184.216.34:443".parse().unwrap();
            forwarder.begin_dial(src, dst, handle_for());
        }
        let overflow_src: SocketAddr = "10.1.2.100:20000".parse().unwrap();
        let dst: SocketAddr = "93.184.216.34:443".parse().unwrap();
        assert!(matches!(
            forwarder.admit(overflow_src, dst),
            AdmitDecision::OverCapacity
        ));
    }

    #[test]
    fn removing_a_flow_frees_capacity() {
        let mut forwarder = TcpForwarder::new();
        let src: SocketAddr = "10.1.2.100:9000".parse().unwrap();
        let dst: SocketAddr = "93.184.216.34:443".parse().unwrap();
        forwarder.begin_dial(src, dst, handle_for());
        forwarder.remove(src, dst);
        assert!(matches!(forwarder.admit(src, dst), AdmitDecision::Admit));
    }
}
