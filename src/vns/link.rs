//! The two `smoltcp::phy::Device` implementations the virtual network stack
//! runs over, per spec.md section 4.3: one backed by the real TUN file
//! descriptor, one an in-memory queue pair coupling the TUN-side stack to
//! the WireGuard-side stack without a real interface in between.
//!
//! Both are `medium: Ip` devices — the TUN interface carries no L2 framing,
//! so there is no Ethernet header to parse or synthesize, matching
//! `oniux`'s use of `smoltcp::phy::Medium::Ip` for the same reason.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use smoltcp::phy::{Device, DeviceCapabilities, Medium, RxToken, TxToken};
use smoltcp::time::Instant as SmolInstant;

const DEFAULT_MTU: usize = 1420;

/// An in-memory, lock-protected frame queue shared between a `MemoryLink`'s
/// two endpoints: what one side transmits, the other receives.
#[derive(Default)]
struct QueuePair {
    to_a: VecDeque<Vec<u8>>,
    to_b: VecDeque<Vec<u8>>,
}

/// One end of a coupled pair of virtual interfaces, used to hand packets
/// from the TUN-side stack to the WireGuard-side stack (and back) entirely
/// in userspace, with no socket or file descriptor involved.
pub struct MemoryLink {
    shared: Arc<Mutex<QueuePair>>,
    is_a: bool,
    mtu: usize,
}

impl MemoryLink {
    pub fn pair(mtu: usize) -> (MemoryLink, MemoryLink) {
        let shared = Arc::new(Mutex::new(QueuePair::default()));
        (
            MemoryLink {
                shared: shared.clone(),
                is_a: true,
                mtu,
            },
            MemoryLink {
                shared,
                is_a: false,
                mtu,
            },
        )
    }

    fn inbound(&self) -> Option<Vec<u8>> {
        let mut q = self.shared.lock().expect("queue pair mutex poisoned");
        if self.is_a {
            q.to_a.pop_front()
        } else {
            q.to_b.pop_front()
        }
    }

    fn outbound(&self, frame: Vec<u8>) {
        let mut q = self.shared.lock().expect("queue pair mutex poisoned");
        if self.is_a {
            q.to_b.push_back(frame);
        } else {
            q.to_a.push_back(frame);
        }
    }
}

impl Device for MemoryLink {
    type RxToken<'a> = MemoryRxToken;
    type TxToken<'a> = MemoryTxToken;

    fn receive(&mut self, _timestamp: SmolInstant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        self.inbound().map(|frame| {
            (
                MemoryRxToken { frame },
                MemoryTxToken {
                    shared: self.shared.clone(),
                    is_a: self.is_a,
                },
            )
        })
    }

    fn transmit(&mut self, _timestamp: SmolInstant) -> Option<Self::TxToken<'_>> {
        Some(MemoryTxToken {
            shared: self.shared.clone(),
            is_a: self.is_a,
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ip;
        caps.max_transmission_unit = self.mtu;
        caps
    }
}

pub struct MemoryRxToken {
    frame: Vec<u8>,
}

impl RxToken for MemoryRxToken {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.frame)
    }
}

pub struct MemoryTxToken {
    shared: Arc<Mutex<QueuePair>>,
    is_a: bool,
}

impl TxToken for MemoryTxToken {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = vec![0u8; len];
        let result = f(&mut frame);
        let mut q = self.shared.lock().expect("queue pair mutex poisoned");
        if self.is_a {
            q.to_b.push_back(frame);
        } else {
            q.to_a.push_back(frame);
        }
        result
    }
}

/// Device backed by a real TUN file descriptor's raw frame queues. The
/// actual `read(2)`/`write(2)` calls happen on a blocking pump task that
/// feeds/drains these queues; this type only implements the `smoltcp`
/// side of that boundary.
pub struct FdLink {
    rx: Arc<Mutex<VecDeque<Vec<u8>>>>,
    tx: Arc<Mutex<VecDeque<Vec<u8>>>>,
    mtu: usize,
}

impl FdLink {
    pub fn new(mtu: usize) -> (FdLink, FdLinkPump) {
        let rx = Arc::new(Mutex::new(VecDeque::new()));
        let tx = Arc::new(Mutex::new(VecDeque::new()));
        (
            FdLink {
                rx: rx.clone(),
                tx: tx.clone(),
                mtu: if mtu == 0 { DEFAULT_MTU } else { mtu },
            },
            FdLinkPump { rx, tx },
        )
    }
}

/// Handle used by the task that actually talks to the kernel TUN fd: pushes
/// received frames in, pops frames to write out. Cheaply `Clone`, since both
/// fields are reference-counted queues shared with the `FdLink` device.
#[derive(Clone)]
pub struct FdLinkPump {
    rx: Arc<Mutex<VecDeque<Vec<u8>>>>,
    tx: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl FdLinkPump {
    pub fn push_received(&self, frame: Vec<u8>) {
        self.rx.lock().expect("fdlink rx mutex poisoned").push_back(frame);
    }

    pub fn pop_to_send(&self) -> Option<Vec<u8>> {
        self.tx.lock().expect("fdlink tx mutex poisoned").pop_front()
    }
}

impl Device for FdLink {
    type RxToken<'a> = MemoryRxTokenOwned;
    type TxToken<'a> = FdTxToken;

    fn receive(&mut self, _timestamp: SmolInstant) -> Option<(Self::RxToken<'_>, Self::TxToken<'_>)> {
        let frame = self.rx.lock().expect("fdlink rx mutex poisoned").pop_front()?;
        Some((
            MemoryRxTokenOwned { frame },
            FdTxToken {
                tx: self.tx.clone(),
            },
        ))
    }

    fn transmit(&mut self, _timestamp: SmolInstant) -> Option<Self::TxToken<'_>> {
        Some(FdTxToken {
            tx: self.tx.clone(),
        })
    }

    fn capabilities(&self) -> DeviceCapabilities {
        let mut caps = DeviceCapabilities::default();
        caps.medium = Medium::Ip;
        caps.max_transmission_unit = self.mtu;
        caps
    }
}

pub struct MemoryRxTokenOwned {
    frame: Vec<u8>,
}

impl RxToken for MemoryRxTokenOwned {
    fn consume<R, F>(mut self, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        f(&mut self.frame)
    }
}

pub struct FdTxToken {
    tx: Arc<Mutex<VecDeque<Vec<u8>>>>,
}

impl TxToken for FdTxToken {
    fn consume<R, F>(self, len: usize, f: F) -> R
    where
        F: FnOnce(&mut [u8]) -> R,
    {
        let mut frame = vec![0u8; len];
        let result = f(&mut frame);
        self.tx.lock().expect("fdlink tx mutex poisoned").push_back(frame);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_link_delivers_frames_in_fifo_order() {
        let (mut a, mut b) = MemoryLink::pair(1500);
        let now = SmolInstant::from_millis(0);

        let tx = a.transmit(now).unwrap();
        tx.consume(3, |buf| buf.copy_from_slice(b"one"));
        let tx = a.transmit(now).unwrap();
        tx.consume(3, |buf| buf.copy_from_slice(b"two"));

        let (rx, _) = b.receive(now).unwrap();
        let first = rx.consume(|buf| buf.to_vec());
        let (rx, _) = b.receive(now).unwrap();
        let second = rx.consume(|buf| buf.to_vec());

        assert_eq!(first, b"one");
        assert_eq!(second, b"two");
    }

    #[test]
    fn fdlink_pump_round_trips_a_frame() {
        let (mut link, pump) = FdLink::new(1500);
        pump.push_received(b"frame".to_vec());

        let now = SmolInstant::from_millis(0);
        let (rx, _) = link.receive(now).unwrap();
        assert_eq!(rx.consume(|b| b.to_vec()), b"frame");

        let tx = link.transmit(now).unwrap();
        tx.consume(5, |buf| buf.copy_from_slice(b"reply"));
        assert_eq!(pump.pop_to_send(), Some(b"reply".to_vec()));
    }
}
