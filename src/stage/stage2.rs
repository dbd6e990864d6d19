//! Stage 2: runs inside the fresh user namespace stage1 created. Unshares
//! network and mount namespaces, brings up the TUN device, wires the two
//! virtual network stacks together through the WireGuard peer, and finally
//! re-execs into stage3 to drop privileges and run the target command.
//!
//! Per spec.md section 5, every namespace-affecting syscall below runs
//! synchronously on the thread that calls `stage::stage2::run`, before any
//! `tokio` runtime exists; the runtime is only built once namespace setup is
//! complete, and is pinned to a single worker thread so the socket created
//! for WireGuard traffic and the namespace it was opened in never drift
//! apart underneath an unrelated task.

use std::ffi::OsString;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tracing::{info, instrument, warn, Level};

use crate::cancel::cancel_pair;
use crate::config::{hex_decode, hex_encode, Stage2Args};
use crate::overlay;
use crate::sys::{
    namespace::{assert_single_threaded_for_stage2, NamespaceKind, UnshareEnvironmentBuilder},
    netctl, reexec, tun,
};
use crate::wg::keys::{PresharedKey, PrivateKey};
use crate::wg::peer::Peer;

use super::dataplane::DataPlane;

/// `REKEY_TIMEOUT` retries before giving up on the initial handshake and
/// failing stage2 outright, per spec.md section 4.4.
const MAX_HANDSHAKE_ATTEMPTS: u32 = 18;

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn run(args: Stage2Args) -> Result<i32> {
    assert_single_threaded_for_stage2();

    // The WireGuard transport socket is bound before the network namespace
    // is unshared so it inherits the host's route to `args.wg_endpoint`;
    // a socket created after `unshare(CLONE_NEWNET)` would be stranded in a
    // namespace with no interfaces but loopback.
    let std_socket = std::net::UdpSocket::bind("0.0.0.0:0").context("binding wg transport socket")?;
    std_socket
        .set_nonblocking(true)
        .context("setting wg transport socket non-blocking")?;

    let mut builder = UnshareEnvironmentBuilder::default();
    builder
        .namespace(NamespaceKind::Network)
        .namespace(NamespaceKind::Mount);
    builder.enter().context("unsharing network and mount namespaces")?;

    let tun_device = tun::create(&args.tun).context("creating tun device")?;
    info!(tun = %args.tun, mtu = tun_device.mtu, "tun device created");
    netctl::configure_tun(&args.tun, &args.subnet).context("configuring tun device")?;

    let overlay_handle = if !args.no_overlay {
        let gateway = args.gateway.unwrap_or(args.subnet.address);
        let entries = [("resolv.conf", netctl::resolv_conf_contents(gateway))];
        Some(overlay::shadow("/etc", &entries).context("overlaying /etc/resolv.conf")?)
    } else {
        None
    };

    let private_key_hex =
        std::fs::read_to_string(&args.wg_private_key_file).context("reading wg private key file")?;
    let private_key_bytes =
        hex_decode(private_key_hex.trim()).context("decoding wg private key as hex")?;
    let private_key = PrivateKey::from_bytes(private_key_bytes);
    let remote_public = crate::wg::keys::PublicKeyBytes(args.wg_public_key()?);

    info!(
        local_public = %hex_encode(&private_key.public_key().0),
        remote_public = %hex_encode(&remote_public.0),
        endpoint = %args.wg_endpoint,
        "wireguard peer configured"
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building stage2 runtime")?;

    let exit_code = runtime.block_on(async move {
        run_data_plane(args, tun_device, std_socket, private_key, remote_public).await
    })?;

    drop(overlay_handle);
    Ok(exit_code)
}

/// Establishes the handshake, then races the data plane against stage3's
/// blocking wait: whichever finishes first decides the outcome. stage3
/// exiting is the expected end of a run, so that arm's result becomes
/// stage2's own exit code; the data plane ending first means a TUN or
/// transport I/O error occurred underneath the sandboxed command, which is
/// always a failure.
async fn run_data_plane(
    args: Stage2Args,
    tun_device: tun::TunDevice,
    std_socket: std::net::UdpSocket,
    private_key: PrivateKey,
    remote_public: crate::wg::keys::PublicKeyBytes,
) -> Result<i32> {
    let udp = UdpSocket::from_std(std_socket).context("adopting wg transport socket into tokio")?;
    udp.connect(args.wg_endpoint)
        .await
        .with_context(|| format!("connecting wg transport socket to {}", args.wg_endpoint))?;

    let mut peer = Peer::new(private_key, remote_public, PresharedKey::zero(), args.wg_endpoint);

    establish_handshake(&mut peer, &udp)
        .await
        .context("establishing wireguard handshake")?;
    info!("wireguard handshake established");

    let mtu = tun_device.mtu;
    let (tun_reader, tun_writer) = tun_device.split().context("splitting tun device")?;

    let (cancel_guard, cancel) = cancel_pair();
    let (dataplane, tun_pump) = DataPlane::new(mtu, args.subnet.address, peer, udp, cancel);

    let stage3_args = args.clone();
    let stage3_task = tokio::task::spawn_blocking(move || spawn_stage3_and_wait(&stage3_args));

    let exit_code = tokio::select! {
        result = stage3_task => {
            cancel_guard.cancel();
            result.context("stage3 task panicked")?.context("running stage3")?
        }
        result = dataplane.run(tun_reader, tun_pump, tun_writer) => {
            result.context("data plane loop failed")?;
            anyhow::bail!("data plane loop exited before stage3 completed");
        }
    };

    Ok(exit_code)
}

/// Sends handshake initiations at `REKEY_TIMEOUT` intervals until a response
/// arrives or `MAX_HANDSHAKE_ATTEMPTS` is exceeded, per spec.md section 4.4.
async fn establish_handshake(peer: &mut Peer, udp: &UdpSocket) -> Result<()> {
    use crate::wg::messages::HANDSHAKE_RESPONSE_LEN;

    for attempt in 1..=MAX_HANDSHAKE_ATTEMPTS {
        let now = Instant::now();
        let initiation = peer.initiate_handshake(now);
        udp.send(&initiation).await.context("sending handshake initiation")?;

        let mut buf = [0u8; HANDSHAKE_RESPONSE_LEN];
        let recv = tokio::time::timeout(crate::wg::timers::REKEY_TIMEOUT, udp.recv(&mut buf)).await;
        match recv {
            Ok(Ok(n)) if n == HANDSHAKE_RESPONSE_LEN => {
                if peer.process_handshake_response(&buf, Instant::now()).is_ok() {
                    return Ok(());
                }
                warn!(attempt, "handshake response did not validate, retrying");
            }
            Ok(Ok(_)) => warn!(attempt, "unexpected response length, retrying"),
            Ok(Err(e)) => warn!(attempt, error = %e, "handshake recv failed, retrying"),
            Err(_) => warn!(attempt, "handshake attempt timed out, retrying"),
        }
    }

    anyhow::bail!(
        "handshake with {} did not complete after {} attempts",
        peer.endpoint,
        MAX_HANDSHAKE_ATTEMPTS
    )
}

/// Blocks the calling (blocking-pool) thread on `waitpid`; the caller runs
/// this via `tokio::task::spawn_blocking` so the data plane keeps servicing
/// traffic while the sandboxed command runs.
fn spawn_stage3_and_wait(args: &Stage2Args) -> Result<i32> {
    let stage3_args = stage3_argv(args);
    let uid_map = crate::sys::namespace::IdRangeMap::new(0, args.uid, 1);
    let gid_map = crate::sys::namespace::IdRangeMap::new(0, args.gid, 1);
    let child = reexec::reexec_self(stage3_args, uid_map, gid_map).context("spawning stage3")?;
    reexec::wait_for_exit_code(child)
}

fn stage3_argv(args: &Stage2Args) -> Vec<OsString> {
    let mut argv: Vec<OsString> = vec![
        crate::sys::reexec::STAGE3_SENTINEL.into(),
        "--uid".into(),
        args.uid.to_string().into(),
        "--gid".into(),
        args.gid.to_string().into(),
        "--".into(),
    ];
    argv.extend(args.command.iter().map(OsString::from));
    argv
}
