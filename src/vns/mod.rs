//! Userspace dual-stack virtual network stack built on `smoltcp`, per
//! spec.md section 4.3. Two instances run side by side: one terminates
//! traffic arriving on the real TUN device, one terminates traffic destined
//! for the WireGuard tunnel; the proxy mux in `crate::proxy` couples them.

pub mod icmp;
pub mod link;
pub mod promiscuous;
pub mod stack;
pub mod tcp_forwarder;
pub mod udp_forwarder;

pub use promiscuous::{inspect, ObservedFlow};
pub use stack::{TunStack, VirtualNetworkStack, WgStack};
