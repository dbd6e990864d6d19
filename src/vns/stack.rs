//! The virtual network stack itself: a `smoltcp::iface::Interface` plus
//! socket set, configured for the promiscuous/spoofing behavior spec.md
//! section 4.3 requires and that `smoltcp` has no native switch for — every
//! packet smoltcp would otherwise drop as "not addressed to us" is instead
//! accepted, since the whole point of this interface is to intercept
//! traffic bound for addresses it doesn't itself own.

use std::net::IpAddr;

use smoltcp::iface::{Config, Interface, SocketSet};
use smoltcp::socket::{tcp, udp};
use smoltcp::time::Instant as SmolInstant;
use smoltcp::wire::{HardwareAddress, IpCidr};

use super::link::{FdLink, MemoryLink};

/// Wraps a `smoltcp` interface and its socket set with the accept-everything
/// posture the sandbox needs: the stack terminates connections addressed to
/// arbitrary remote IPs, not just its own configured address.
pub struct VirtualNetworkStack<D: smoltcp::phy::Device> {
    pub interface: Interface,
    pub device: D,
    pub sockets: SocketSet<'static>,
}

impl<D: smoltcp::phy::Device> VirtualNetworkStack<D> {
    pub fn new(mut device: D, address: IpAddr, now: SmolInstant) -> Self {
        let config = Config::new(HardwareAddress::Ip);
        let mut interface = Interface::new(config, &mut device, now);
        interface.update_ip_addrs(|addrs| {
            let prefix = if address.is_ipv4() { 32 } else { 128 };
            addrs
                .push(IpCidr::new(address.into(), prefix))
                .expect("interface address list has room for one address");
        });
        // Accept frames regardless of destination: the whole point of this
        // stack is to terminate traffic that is not actually addressed to
        // us, since the real destination lives on the other side of the
        // proxy mux.
        interface.set_any_ip(true);

        VirtualNetworkStack {
            interface,
            device,
            sockets: SocketSet::new(Vec::new()),
        }
    }

    pub fn poll(&mut self, now: SmolInstant) -> bool {
        self.interface
            .poll(now, &mut self.device, &mut self.sockets)
    }

    pub fn add_tcp_socket(&mut self, rx_buf: usize, tx_buf: usize) -> smoltcp::iface::SocketHandle {
        let rx_buffer = tcp::SocketBuffer::new(vec![0u8; rx_buf]);
        let tx_buffer = tcp::SocketBuffer::new(vec![0u8; tx_buf]);
        let socket = tcp::Socket::new(rx_buffer, tx_buffer);
        self.sockets.add(socket)
    }

    pub fn add_udp_socket(
        &mut self,
        rx_meta: usize,
        rx_payload: usize,
        tx_meta: usize,
        tx_payload: usize,
    ) -> smoltcp::iface::SocketHandle {
        let rx_buffer = udp::PacketBuffer::new(
            vec![udp::PacketMetadata::EMPTY; rx_meta],
            vec![0u8; rx_payload],
        );
        let tx_buffer = udp::PacketBuffer::new(
            vec![udp::PacketMetadata::EMPTY; tx_meta],
            vec![0u8; tx_payload],
        );
        let socket = udp::Socket::new(rx_buffer, tx_buffer);
        self.sockets.add(socket)
    }
}

pub type TunStack = VirtualNetworkStack<FdLink>;
pub type WgStack = VirtualNetworkStack<MemoryLink>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vns::link::FdLink;

    #[test]
    fn new_stack_carries_the_configured_address() {
        let (device, _pump) = FdLink::new(1500);
        let now = SmolInstant::from_millis(0);
        let stack = VirtualNetworkStack::new(device, "10.1.2.100".parse().unwrap(), now);
        assert!(stack
            .interface
            .ip_addrs()
            .iter()
            .any(|cidr| cidr.address() == smoltcp::wire::IpAddress::v4(10, 1, 2, 100)));
    }
}
