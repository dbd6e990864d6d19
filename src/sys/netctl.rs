//! Interface/route configuration, generalized from
//! `containix::command_wrappers::Interface`: shell out to `ip -json ...`
//! and deserialize the result with `serde`, rather than talking netlink
//! directly. Used for the address/route/link-up steps of spec.md section
//! 4.1 stage2 step 5.

use std::{net::IpAddr, path::Path, process::Command};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{instrument, trace, Level};

use crate::config::Subnet;

fn run(mut command: Command) -> Result<std::process::Output> {
    let output = command.output().context("running ip(8)")?;
    if !output.status.success() {
        anyhow::bail!(
            "{:?} failed: {}",
            command,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(output)
}

#[derive(Debug, Deserialize)]
pub struct Interface {
    #[serde(rename = "ifname")]
    pub name: String,
}

impl Interface {
    #[instrument(level = "trace", err(level = Level::TRACE))]
    pub fn by_name(name: &str) -> Result<Option<Interface>> {
        let mut command = Command::new("ip");
        command.arg("-json").arg("link").arg("show").arg(name);
        let output = command.output().context("running ip link show")?;
        if !output.status.success() {
            return Ok(None);
        }
        let mut interfaces: Vec<Interface> =
            serde_json::from_slice(&output.stdout).context("parsing ip link output")?;
        Ok(interfaces.pop())
    }
}

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn set_link_up(name: &str) -> Result<()> {
    trace!("bringing {name} up");
    let mut command = Command::new("ip");
    command.arg("link").arg("set").arg(name).arg("up");
    run(command)?;
    Ok(())
}

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn assign_subnet(name: &str, subnet: &Subnet) -> Result<()> {
    let mut command = Command::new("ip");
    command
        .arg("addr")
        .arg("add")
        .arg(subnet.to_string())
        .arg("dev")
        .arg(name);
    run(command)?;
    Ok(())
}

/// Adds `0.0.0.0/0` or `::/0` via `name`, depending on `gateway`'s family.
/// IPv6 failures are logged and swallowed per spec.md's open question:
/// "the design logs and continues [without a synthetic IPv6 fallback]".
#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn add_default_route(name: &str, family: AddressFamily) -> Result<()> {
    let default = match family {
        AddressFamily::V4 => "0.0.0.0/0",
        AddressFamily::V6 => "::/0",
    };
    let mut command = Command::new("ip");
    if family == AddressFamily::V6 {
        command.arg("-6");
    }
    command
        .arg("route")
        .arg("add")
        .arg(default)
        .arg("dev")
        .arg(name);
    run(command)?;
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressFamily {
    V4,
    V6,
}

impl AddressFamily {
    pub fn of(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(_) => AddressFamily::V4,
            IpAddr::V6(_) => AddressFamily::V6,
        }
    }
}

/// Brings the in-namespace loopback interface up; spec.md section 9 leaves
/// this as an open question ("whether `lo` ... must be explicitly brought
/// up") and resolves it the same way the reference implementation does:
/// defensively, every time.
#[instrument(level = "trace", err(level = Level::TRACE))]
pub fn bring_up_loopback() -> Result<()> {
    set_link_up("lo")
}

/// Brings up TUN `name`, assigns `subnet` to it, and adds IPv4 (always) and
/// IPv6 (best-effort) default routes through it — the full stage2 step 5
/// sequence from spec.md section 4.1.
#[instrument(level = "trace", skip(subnet), err(level = Level::TRACE))]
pub fn configure_tun(name: &str, subnet: &Subnet) -> Result<()> {
    set_link_up(name)?;
    assign_subnet(name, subnet)?;
    add_default_route(name, AddressFamily::V4)?;
    if let Err(e) = add_default_route(name, AddressFamily::V6) {
        tracing::warn!("ipv6 default route via {name} failed, continuing without it: {e}");
    }
    bring_up_loopback()?;
    Ok(())
}

/// Writes `nameserver <gateway>\n` into a buffer suitable for the overlay
/// collaborator, per spec.md section 4.1 step 6.
pub fn resolv_conf_contents(gateway: IpAddr) -> Vec<u8> {
    format!("nameserver {gateway}\n").into_bytes()
}

pub fn etc_is_directory(root: impl AsRef<Path>) -> bool {
    root.as_ref().join("etc").is_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolv_conf_has_trailing_newline() {
        let bytes = resolv_conf_contents("10.1.2.100".parse().unwrap());
        assert_eq!(bytes, b"nameserver 10.1.2.100\n");
    }

    #[test]
    fn address_family_matches_ip_kind() {
        assert_eq!(AddressFamily::of("10.0.0.1".parse().unwrap()), AddressFamily::V4);
        assert_eq!(AddressFamily::of("::1".parse().unwrap()), AddressFamily::V6);
    }
}
