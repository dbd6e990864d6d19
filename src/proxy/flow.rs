//! Flow identity, per spec.md section 4.5: "a flow is identified by
//! (protocol, source, destination); TCP flows additionally carry half-close
//! state, UDP flows are demultiplexed purely on this tuple."

use std::fmt;
use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowId {
    pub kind: FlowKindRepr,
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

/// `FlowKind` isn't itself hashable without deriving `Hash` on an enum with
/// no payload, but we keep the richer `FlowKind` as the public-facing type
/// and store this as the hashable representation so `FlowId` can key a
/// `HashMap` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowKindRepr {
    Tcp,
    Udp,
}

impl From<FlowKind> for FlowKindRepr {
    fn from(k: FlowKind) -> Self {
        match k {
            FlowKind::Tcp => FlowKindRepr::Tcp,
            FlowKind::Udp => FlowKindRepr::Udp,
        }
    }
}

impl FlowId {
    pub fn new(kind: FlowKind, source: SocketAddr, destination: SocketAddr) -> Self {
        FlowId {
            kind: kind.into(),
            source,
            destination,
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let proto = match self.kind {
            FlowKindRepr::Tcp => "tcp",
            FlowKindRepr::Udp => "udp",
        };
        write!(f, "{proto}:{}->{}", self.source, self.destination)
    }
}

/// Half-close tracking for a TCP flow: each direction closes independently,
/// and the flow is only torn down once both have.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HalfCloseState {
    pub tun_to_wg_closed: bool,
    pub wg_to_tun_closed: bool,
}

impl HalfCloseState {
    pub fn is_fully_closed(&self) -> bool {
        self.tun_to_wg_closed && self.wg_to_tun_closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flow_id_display_matches_direction() {
        let id = FlowId::new(
            FlowKind::Tcp,
            "10.1.2.100:9001".parse().unwrap(),
            "93.184.216.34:443".parse().unwrap(),
        );
        assert_eq!(id.to_string(), "tcp:10.1.2.100:9001->93.184.216.34:443");
    }

    #[test]
    fn half_close_requires_both_directions() {
        let mut state = HalfCloseState::default();
        assert!(!state.is_fully_closed());
        state.tun_to_wg_closed = true;
        assert!(!state.is_fully_closed());
        state.wg_to_tun_closed = true;
        assert!(state.is_fully_closed());
    }
}
