//! Per-flow proxy mux gluing the TUN-side virtual network stack to the
//! WireGuard-side virtual network stack, per spec.md section 4.5.

pub mod bridge;
pub mod flow;
pub mod mux;

pub use flow::{FlowId, FlowKind};
pub use mux::copy_bidirectional;
