//! The live data plane stage2 drives once the WireGuard handshake completes
//! (spec.md sections 4.2/4.3): two `vns::VirtualNetworkStack`s, one
//! terminating guest traffic on the real TUN device and one re-dialing each
//! flow's destination over the tunnel, coupled through `wg::peer::Peer` on
//! the WireGuard side and `proxy::mux::copy_bidirectional` on the TCP side.
//!
//! Everything here runs on stage2's single current-thread runtime: the two
//! `SocketSet`s, the flow tables, and the `Peer` are all owned directly by
//! `DataPlane`, never shared behind a mutex. The only concurrency this
//! introduces is the per-TCP-flow copy task `run` spawns, and each of those
//! only ever touches the channel pair `proxy::bridge::flow_endpoint` gave it
//! — never a socket.
//!
//! UDP flows deliberately bypass `copy_bidirectional`: treating a datagram
//! stream as an `AsyncRead`/`AsyncWrite` byte stream would coalesce or split
//! datagram boundaries, which a correct proxy can't do. Each UDP flow's
//! datagrams are shuttled directly between the two stacks' sockets inside
//! `service_udp_flows`, preserving `recv_slice`/`send_slice` framing.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use smoltcp::iface::SocketHandle;
use smoltcp::phy::{Device, RxToken, TxToken};
use smoltcp::socket::{tcp, udp};
use smoltcp::time::Instant as SmolInstant;
use smoltcp::wire::{IpAddress, IpEndpoint, IpListenEndpoint, Ipv4Packet, Ipv6Packet};
use tokio::io::AsyncReadExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::proxy::flow::HalfCloseState;
use crate::proxy::{self, FlowId, FlowKind};
use crate::sys::tun;
use crate::vns::icmp;
use crate::vns::link::{FdLink, FdLinkPump, MemoryLink};
use crate::vns::tcp_forwarder::{AdmitDecision, TcpForwarder};
use crate::vns::udp_forwarder::{RouteDecision, UdpForwarder};
use crate::vns::{ObservedFlow, TunStack, WgStack};
use crate::wg::peer::Peer;

/// How often the loop polls both stacks even without a fresh frame or
/// datagram, so `smoltcp`'s own retransmission/keepalive timers still fire.
const TICK_INTERVAL: Duration = Duration::from_millis(20);

const TCP_RX_BUF: usize = 64 * 1024;
const TCP_TX_BUF: usize = 64 * 1024;
const UDP_RX_META: usize = 32;
const UDP_RX_PAYLOAD: usize = 64 * 1024;
const UDP_TX_META: usize = 32;
const UDP_TX_PAYLOAD: usize = 64 * 1024;
const FIRST_EPHEMERAL_PORT: u16 = 49152;

/// Converts a fixed start point into the `smoltcp::time::Instant` the
/// virtual stacks poll with. `wg::peer::Peer`'s own clock stays
/// `std::time::Instant` throughout — the two never need to agree, since
/// nothing compares a `Peer` timestamp against a `smoltcp` one directly.
struct Clock {
    start: std::time::Instant,
}

impl Clock {
    fn new() -> Self {
        Clock { start: std::time::Instant::now() }
    }

    fn now(&self) -> SmolInstant {
        SmolInstant::from_millis(self.start.elapsed().as_millis() as i64)
    }
}

struct EphemeralPorts {
    next: u16,
}

impl EphemeralPorts {
    fn new() -> Self {
        EphemeralPorts { next: FIRST_EPHEMERAL_PORT }
    }

    fn next(&mut self) -> u16 {
        let port = self.next;
        self.next = if self.next == u16::MAX { FIRST_EPHEMERAL_PORT } else { self.next + 1 };
        port
    }
}

/// The channel pair feeding/draining one TCP flow's spawned
/// `copy_bidirectional` task. `None` once that direction's socket has
/// reported `!may_recv()`, which is how the copy task learns of a half-close.
struct TcpFlowBridge {
    guest_to_copy: Option<mpsc::UnboundedSender<Vec<u8>>>,
    copy_to_guest: mpsc::UnboundedReceiver<Vec<u8>>,
    pending_to_guest: Vec<u8>,
    remote_to_copy: Option<mpsc::UnboundedSender<Vec<u8>>>,
    copy_to_remote: mpsc::UnboundedReceiver<Vec<u8>>,
    pending_to_remote: Vec<u8>,
}

struct TcpFlowState {
    tun_handle: SocketHandle,
    wg_handle: SocketHandle,
    source: SocketAddr,
    destination: SocketAddr,
    established: bool,
    bridge: Option<TcpFlowBridge>,
    half_close: HalfCloseState,
}

struct UdpFlowState {
    tun_handle: SocketHandle,
    wg_handle: SocketHandle,
    source: SocketAddr,
    destination: SocketAddr,
}

pub struct DataPlane {
    tun_stack: TunStack,
    wg_stack: WgStack,
    wg_link_b: MemoryLink,
    peer: Peer,
    udp: UdpSocket,
    clock: Clock,
    tcp_forwarder: TcpForwarder,
    udp_forwarder: UdpForwarder,
    tcp_flows: HashMap<FlowId, TcpFlowState>,
    udp_flows: HashMap<FlowId, UdpFlowState>,
    ephemeral_ports: EphemeralPorts,
    cancel: CancelToken,
}

impl DataPlane {
    /// Builds both virtual network stacks and returns the `FdLinkPump` the
    /// caller drives against the real TUN device's reader/writer halves.
    pub fn new(mtu: usize, address: IpAddr, peer: Peer, udp: UdpSocket, cancel: CancelToken) -> (Self, FdLinkPump) {
        let clock = Clock::new();
        let now = clock.now();

        let (tun_link, tun_pump) = FdLink::new(mtu);
        let (wg_link_a, wg_link_b) = MemoryLink::pair(mtu);

        let tun_stack = TunStack::new(tun_link, address, now);
        let wg_stack = WgStack::new(wg_link_a, address, now);

        let dataplane = DataPlane {
            tun_stack,
            wg_stack,
            wg_link_b,
            peer,
            udp,
            clock,
            tcp_forwarder: TcpForwarder::new(),
            udp_forwarder: UdpForwarder::new(),
            tcp_flows: HashMap::new(),
            udp_flows: HashMap::new(),
            ephemeral_ports: EphemeralPorts::new(),
            cancel,
        };
        (dataplane, tun_pump)
    }

    /// Runs until cancelled or a TUN/transport I/O error occurs. Consumes
    /// `self` because nothing outside this loop ever needs the stacks again.
    pub async fn run(mut self, mut tun_reader: tun::TunReader, tun_pump: FdLinkPump, mut tun_writer: tun::TunWriter) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut tun_buf = vec![0u8; 65536];
        let mut wg_buf = vec![0u8; 65536];

        loop {
            let mut cancel = self.cancel.clone();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tick.tick() => {}
                read = tun_reader.file.read(&mut tun_buf) => {
                    let n = read.context("reading tun device")?;
                    if n > 0 {
                        self.handle_tun_frame(&tun_buf[..n], &tun_pump);
                    }
                }
                received = self.udp.recv(&mut wg_buf) => {
                    let n = received.context("receiving wireguard transport packet")?;
                    self.handle_wg_datagram(&wg_buf[..n]);
                }
            }

            self.service().await;

            while let Some(frame) = tun_pump.pop_to_send() {
                tun_writer.file.write_all(&frame).await.context("writing tun device")?;
            }
        }
    }

    /// Polls both stacks, drains traffic the WireGuard side wants to send,
    /// and pumps every open flow's channels against its sockets. Runs twice
    /// per tick so bytes a flow just pushed into a socket go out the same
    /// tick instead of waiting for the next external event.
    async fn service(&mut self) {
        for _ in 0..2 {
            let now = self.clock.now();
            self.tun_stack.poll(now);
            self.wg_stack.poll(now);
            self.drain_wg_outbound(now).await;
            self.service_tcp_flows();
            self.service_udp_flows();
        }
    }

    fn handle_tun_frame(&mut self, frame: &[u8], tun_pump: &FdLinkPump) {
        match crate::vns::inspect(frame) {
            Some(ObservedFlow::Icmp) => {
                match frame.first().map(|b| b >> 4) {
                    Some(6) => {
                        if let Ok(packet) = Ipv6Packet::new_checked(frame) {
                            icmp::observe_v6(packet.payload());
                        }
                    }
                    _ => {
                        if let Ok(packet) = Ipv4Packet::new_checked(frame) {
                            icmp::observe_v4(packet.payload());
                        }
                    }
                }
                return;
            }
            Some(ObservedFlow::Tcp { source, destination, syn }) if syn => {
                self.admit_tcp_flow(source, destination);
            }
            Some(ObservedFlow::Udp { source, destination }) => {
                self.admit_udp_flow(source, destination);
            }
            _ => {}
        }
        tun_pump.push_received(frame.to_vec());
    }

    fn handle_wg_datagram(&mut self, buf: &[u8]) {
        let now = std::time::Instant::now();
        match self.peer.decapsulate(buf, now) {
            Ok(plaintext) => {
                let now_smol = self.clock.now();
                if let Some(tx) = self.wg_link_b.transmit(now_smol) {
                    let len = plaintext.len();
                    let _ = tx.consume(len, |dst| dst.copy_from_slice(&plaintext));
                }
            }
            Err(e) => warn!(error = %e, "dropping undecryptable transport packet"),
        }
    }

    /// Drains frames the WireGuard-side stack queued for transmission,
    /// seals each one, and sends it to the real peer endpoint.
    async fn drain_wg_outbound(&mut self, now_smol: SmolInstant) {
        while let Some((rx, _tx)) = self.wg_link_b.receive(now_smol) {
            let plaintext = rx.consume(|buf| buf.to_vec());
            let now = std::time::Instant::now();
            match self.peer.encapsulate(&plaintext, now) {
                Ok(sealed) => {
                    if let Err(e) = self.udp.send(&sealed).await {
                        warn!(error = %e, "sending wireguard transport packet failed");
                    }
                }
                Err(e) => warn!(error = %e, "encapsulating outbound packet failed"),
            }
        }
    }

    fn admit_tcp_flow(&mut self, source: SocketAddr, destination: SocketAddr) {
        match self.tcp_forwarder.admit(source, destination) {
            AdmitDecision::Admit => {}
            AdmitDecision::AlreadyDialing => return,
            AdmitDecision::OverCapacity => {
                warn!(%source, %destination, "tcp flow rejected, at capacity");
                return;
            }
        }

        let tun_handle = self.tun_stack.add_tcp_socket(TCP_RX_BUF, TCP_TX_BUF);
        let listened = self
            .tun_stack
            .sockets
            .get_mut::<tcp::Socket>(tun_handle)
            .listen(listen_endpoint(destination))
            .is_ok();
        if !listened {
            self.tun_stack.sockets.remove(tun_handle);
            return;
        }

        let wg_handle = self.wg_stack.add_tcp_socket(TCP_RX_BUF, TCP_TX_BUF);
        let local_port = self.ephemeral_ports.next();
        let connected = {
            let cx = self.wg_stack.interface.context();
            self.wg_stack
                .sockets
                .get_mut::<tcp::Socket>(wg_handle)
                .connect(cx, endpoint(destination), local_port)
                .is_ok()
        };
        if !connected {
            self.tun_stack.sockets.remove(tun_handle);
            self.wg_stack.sockets.remove(wg_handle);
            return;
        }

        self.tcp_forwarder.begin_dial(source, destination, wg_handle);
        let flow = FlowId::new(FlowKind::Tcp, source, destination);
        self.tcp_flows.insert(
            flow,
            TcpFlowState {
                tun_handle,
                wg_handle,
                source,
                destination,
                established: false,
                bridge: None,
                half_close: HalfCloseState::default(),
            },
        );
        info!(%flow, "tcp flow admitted, dialing remote");
    }

    fn admit_udp_flow(&mut self, source: SocketAddr, destination: SocketAddr) {
        if let RouteDecision::Existing(_) = self.udp_forwarder.route(source, destination) {
            return;
        }

        let tun_handle = self
            .tun_stack
            .add_udp_socket(UDP_RX_META, UDP_RX_PAYLOAD, UDP_TX_META, UDP_TX_PAYLOAD);
        let bound = self
            .tun_stack
            .sockets
            .get_mut::<udp::Socket>(tun_handle)
            .bind(listen_endpoint(destination))
            .is_ok();
        if !bound {
            self.tun_stack.sockets.remove(tun_handle);
            return;
        }

        let wg_handle = self
            .wg_stack
            .add_udp_socket(UDP_RX_META, UDP_RX_PAYLOAD, UDP_TX_META, UDP_TX_PAYLOAD);
        let local_port = self.ephemeral_ports.next();
        let bound = self
            .wg_stack
            .sockets
            .get_mut::<udp::Socket>(wg_handle)
            .bind(local_port)
            .is_ok();
        if !bound {
            self.tun_stack.sockets.remove(tun_handle);
            self.wg_stack.sockets.remove(wg_handle);
            return;
        }

        self.udp_forwarder.register(source, destination, wg_handle);
        let flow = FlowId::new(FlowKind::Udp, source, destination);
        self.udp_flows.insert(
            flow,
            UdpFlowState {
                tun_handle,
                wg_handle,
                source,
                destination,
            },
        );
        info!(%flow, "udp flow created");
    }

    fn service_tcp_flows(&mut self) {
        let mut closed = Vec::new();

        for (flow, state) in self.tcp_flows.iter_mut() {
            if !state.established {
                let wg_socket = self.wg_stack.sockets.get_mut::<tcp::Socket>(state.wg_handle);
                if wg_socket.may_send() {
                    state.established = true;
                    self.tcp_forwarder.mark_established(state.source, state.destination);

                    let (tun_far, guest_to_copy, copy_to_guest) = proxy::bridge::flow_endpoint();
                    let (wg_far, remote_to_copy, copy_to_remote) = proxy::bridge::flow_endpoint();
                    state.bridge = Some(TcpFlowBridge {
                        guest_to_copy: Some(guest_to_copy),
                        copy_to_guest,
                        pending_to_guest: Vec::new(),
                        remote_to_copy: Some(remote_to_copy),
                        copy_to_remote,
                        pending_to_remote: Vec::new(),
                    });
                    tokio::spawn(proxy::mux::copy_bidirectional(*flow, tun_far, wg_far, self.cancel.clone()));
                    info!(%flow, "tcp flow established, proxying");
                } else if wg_socket.state() == tcp::State::Closed {
                    closed.push(*flow);
                    continue;
                } else {
                    continue;
                }
            }

            let Some(bridge) = state.bridge.as_mut() else { continue };

            {
                let tun_socket = self.tun_stack.sockets.get_mut::<tcp::Socket>(state.tun_handle);
                while tun_socket.can_recv() {
                    let _ = tun_socket.recv(|data| {
                        if !data.is_empty() {
                            if let Some(tx) = &bridge.guest_to_copy {
                                let _ = tx.send(data.to_vec());
                            }
                        }
                        (data.len(), ())
                    });
                }
                if !tun_socket.may_recv() {
                    bridge.guest_to_copy = None;
                    state.half_close.tun_to_wg_closed = true;
                }
            }
            {
                let wg_socket = self.wg_stack.sockets.get_mut::<tcp::Socket>(state.wg_handle);
                pump_tx(wg_socket, &mut bridge.pending_to_remote, &mut bridge.copy_to_remote);
            }
            {
                let wg_socket = self.wg_stack.sockets.get_mut::<tcp::Socket>(state.wg_handle);
                while wg_socket.can_recv() {
                    let _ = wg_socket.recv(|data| {
                        if !data.is_empty() {
                            if let Some(tx) = &bridge.remote_to_copy {
                                let _ = tx.send(data.to_vec());
                            }
                        }
                        (data.len(), ())
                    });
                }
                if !wg_socket.may_recv() {
                    bridge.remote_to_copy = None;
                    state.half_close.wg_to_tun_closed = true;
                }
            }
            {
                let tun_socket = self.tun_stack.sockets.get_mut::<tcp::Socket>(state.tun_handle);
                pump_tx(tun_socket, &mut bridge.pending_to_guest, &mut bridge.copy_to_guest);
            }

            if state.half_close.is_fully_closed() {
                closed.push(*flow);
            }
        }

        for flow in closed {
            if let Some(state) = self.tcp_flows.remove(&flow) {
                self.tun_stack.sockets.remove(state.tun_handle);
                self.wg_stack.sockets.remove(state.wg_handle);
                self.tcp_forwarder.remove(state.source, state.destination);
                info!(%flow, "tcp flow closed");
            }
        }
    }

    fn service_udp_flows(&mut self) {
        let mut buf = [0u8; 65536];

        for state in self.udp_flows.values() {
            {
                let tun_socket = self.tun_stack.sockets.get_mut::<udp::Socket>(state.tun_handle);
                while tun_socket.can_recv() {
                    match tun_socket.recv_slice(&mut buf) {
                        Ok((n, _meta)) => {
                            let remote = endpoint(state.destination);
                            let wg_socket = self.wg_stack.sockets.get_mut::<udp::Socket>(state.wg_handle);
                            let _ = wg_socket.send_slice(&buf[..n], remote);
                        }
                        Err(_) => break,
                    }
                }
            }
            {
                let wg_socket = self.wg_stack.sockets.get_mut::<udp::Socket>(state.wg_handle);
                while wg_socket.can_recv() {
                    match wg_socket.recv_slice(&mut buf) {
                        Ok((n, _meta)) => {
                            let reply_to = endpoint(state.source);
                            let tun_socket = self.tun_stack.sockets.get_mut::<udp::Socket>(state.tun_handle);
                            let _ = tun_socket.send_slice(&buf[..n], reply_to);
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    }
}

/// Drains `pending` into `socket`, refilling it from `source` one channel
/// message at a time, preserving byte order across ticks when the socket's
/// send buffer can't take a whole message at once.
fn pump_tx(socket: &mut tcp::Socket, pending: &mut Vec<u8>, source: &mut mpsc::UnboundedReceiver<Vec<u8>>) {
    loop {
        if !pending.is_empty() {
            if !socket.can_send() {
                return;
            }
            match socket.send_slice(pending) {
                Ok(0) => return,
                Ok(sent) => {
                    pending.drain(..sent);
                    if !pending.is_empty() {
                        return;
                    }
                }
                Err(_) => return,
            }
        }

        match source.try_recv() {
            Ok(data) => *pending = data,
            Err(_) => return,
        }
    }
}

fn endpoint(addr: SocketAddr) -> IpEndpoint {
    IpEndpoint {
        addr: IpAddress::from(addr.ip()),
        port: addr.port(),
    }
}

fn listen_endpoint(addr: SocketAddr) -> IpListenEndpoint {
    IpListenEndpoint {
        addr: Some(IpAddress::from(addr.ip())),
        port: addr.port(),
    }
}
