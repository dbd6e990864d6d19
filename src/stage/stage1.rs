//! Stage 1: unprivileged, host namespaces. Resolves the target uid/gid
//! while the host user database is still reachable, then re-execs into
//! stage2 inside a fresh user namespace. Per spec.md section 4.1: "Any
//! other failure is fatal."

use std::ffi::OsString;

use anyhow::{Context, Result};
use tracing::{info, instrument, Level};

use crate::{
    config::{hex_encode, AppConfig},
    sys::{
        ids,
        namespace::IdRangeMap,
        reexec::{self, STAGE2_SENTINEL},
    },
};

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn run(config: AppConfig, user: Option<&str>, uid: Option<u32>, gid: Option<u32>) -> Result<i32> {
    let ids = ids::resolve(user, uid, gid).context("resolving target uid/gid")?;
    info!("resolved target uid={} gid={}", ids.uid, ids.gid);

    let args = stage2_args(&config, ids.uid, ids.gid);
    let uid_map = IdRangeMap::new(0, nix::unistd::getuid().as_raw(), 1);
    let gid_map = IdRangeMap::new(0, nix::unistd::getgid().as_raw(), 1);

    let child = reexec::reexec_self(args, uid_map, gid_map).context("spawning stage2")?;
    reexec::wait_for_exit_code(child).context("waiting for stage2")
}

fn stage2_args(config: &AppConfig, uid: u32, gid: u32) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        STAGE2_SENTINEL.into(),
        "--tun".into(),
        config.tun.clone().into(),
        "--subnet".into(),
        config.subnet.to_string().into(),
        "--uid".into(),
        uid.to_string().into(),
        "--gid".into(),
        gid.to_string().into(),
        "--wg-public-key-hex".into(),
        hex_encode(&config.wg_public_key).into(),
        "--wg-private-key-file".into(),
        config.wg_private_key_file.clone().into(),
        "--wg-endpoint".into(),
        config.wg_endpoint.to_string().into(),
        "--wg-address".into(),
        config.wg_address.to_string().into(),
    ];
    if let Some(gateway) = config.gateway {
        args.push("--gateway".into());
        args.push(gateway.to_string().into());
    }
    if !config.overlay_enabled {
        args.push("--no-overlay".into());
    }
    args.push("--".into());
    args.extend(config.command.iter().map(OsString::from));
    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_encode_round_trips_length() {
        let key = [0xabu8; 32];
        let encoded = hex_encode(&key);
        assert_eq!(encoded.len(), 64);
        assert!(encoded.starts_with("abab"));
    }
}
