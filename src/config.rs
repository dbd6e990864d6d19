//! CLI surface and config validation — the "external collaborator" of
//! spec.md section 1, implemented the way `containix::main` defines its
//! `Cli`/`RunArgs` and the way `network_config.rs`/`ports.rs` define small
//! `FromStr` newtypes instead of reaching for a generic parser combinator.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    str::FromStr,
};

use anyhow::{bail, Context, Result};
use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Userspace WireGuard network sandbox", long_about = None)]
pub struct Cli {
    /// Name of the TUN device created inside the sandbox network namespace.
    #[arg(long = "tun", default_value = "wirecage")]
    pub tun: String,

    /// CIDR for the inside address of the TUN device.
    #[arg(long = "subnet", default_value = "10.1.2.100/24")]
    pub subnet: Subnet,

    /// IP written into the overlaid resolv.conf as the nameserver.
    #[arg(long = "gateway")]
    pub gateway: Option<IpAddr>,

    /// User to run the target command as, resolved via the user database.
    #[arg(long = "user")]
    pub user: Option<String>,

    /// Explicit uid of the target command, overrides --user's uid.
    #[arg(long = "uid")]
    pub uid: Option<u32>,

    /// Explicit gid of the target command, overrides --user's gid.
    #[arg(long = "gid")]
    pub gid: Option<u32>,

    /// Disable the /etc/resolv.conf overlay.
    #[arg(long = "no-overlay")]
    pub no_overlay: bool,

    /// Logging verbosity; also settable via WIRECAGE_LOG.
    #[arg(long = "log-level", default_value = "info")]
    pub log_level: LogLevel,

    /// Remote WireGuard responder's static public key, base64.
    #[arg(long = "wg-public-key")]
    pub wg_public_key: String,

    /// Path to a file holding our base64 WireGuard private key.
    #[arg(long = "wg-private-key-file")]
    pub wg_private_key_file: PathBuf,

    /// Remote WireGuard responder endpoint, ip:port.
    #[arg(long = "wg-endpoint")]
    pub wg_endpoint: SocketAddr,

    /// This peer's allowed-IP self-address on the tunnel.
    #[arg(long = "wg-address")]
    pub wg_address: IpAddr,

    /// Command to execute inside the sandbox.
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_tracing_level(self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

/// A CIDR in `<address>/<prefix>` form, mirroring `NetworkConfig`'s
/// hand-rolled `FromStr`/`Display` pair.
#[derive(Debug, Clone, Copy)]
pub struct Subnet {
    pub address: IpAddr,
    pub prefix_len: u8,
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for Subnet {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((address, prefix_len)) = s.split_once('/') else {
            bail!("subnet must be of the form <ADDRESS>/<PREFIX>, got: {s}");
        };
        let address = address
            .parse()
            .with_context(|| format!("parsing subnet address {address}"))?;
        let prefix_len = prefix_len
            .parse()
            .with_context(|| format!("parsing subnet prefix {prefix_len}"))?;
        Ok(Subnet {
            address,
            prefix_len,
        })
    }
}

/// Validated configuration handed to stage2, built from `Cli` once the
/// sentinel/stage dispatch in `main` has determined we're really stage1.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub tun: String,
    pub subnet: Subnet,
    pub gateway: Option<IpAddr>,
    pub overlay_enabled: bool,
    pub wg_public_key: [u8; 32],
    pub wg_private_key_file: PathBuf,
    pub wg_endpoint: SocketAddr,
    pub wg_address: IpAddr,
    pub command: Vec<String>,
}

impl TryFrom<Cli> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self> {
        let wg_public_key = decode_key(&cli.wg_public_key).context("parsing --wg-public-key")?;

        let command = if cli.command.is_empty() {
            vec!["/bin/sh".to_string()]
        } else {
            cli.command
        };

        let gateway = cli.gateway.or_else(|| {
            // Default gateway is the TUN-side address of the subnet itself,
            // matching the reference's "nameserver <gateway>" convention.
            Some(cli.subnet.address)
        });

        Ok(AppConfig {
            tun: cli.tun,
            subnet: cli.subnet,
            gateway,
            overlay_enabled: !cli.no_overlay,
            wg_public_key,
            wg_private_key_file: cli.wg_private_key_file,
            wg_endpoint: cli.wg_endpoint,
            wg_address: cli.wg_address,
            command,
        })
    }
}

/// argv shape for the re-exec'd stage2 process (spec.md section 6: "Stage 3
/// requires `--uid N --gid N --` before the user command"; stage2 has the
/// analogous shape carrying the full bootstrap configuration across the
/// re-exec boundary, since stage2 is a fresh process with no access to
/// stage1's in-memory state).
#[derive(Parser, Debug, Clone)]
pub struct Stage2Args {
    #[arg(long = "tun")]
    pub tun: String,
    #[arg(long = "subnet")]
    pub subnet: Subnet,
    #[arg(long = "gateway")]
    pub gateway: Option<IpAddr>,
    #[arg(long = "no-overlay")]
    pub no_overlay: bool,
    #[arg(long = "uid")]
    pub uid: u32,
    #[arg(long = "gid")]
    pub gid: u32,
    #[arg(long = "wg-public-key-hex")]
    pub wg_public_key_hex: String,
    #[arg(long = "wg-private-key-file")]
    pub wg_private_key_file: PathBuf,
    #[arg(long = "wg-endpoint")]
    pub wg_endpoint: SocketAddr,
    #[arg(long = "wg-address")]
    pub wg_address: IpAddr,
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl Stage2Args {
    pub fn wg_public_key(&self) -> Result<[u8; 32]> {
        hex_decode(&self.wg_public_key_hex)
    }
}

/// argv shape for the re-exec'd stage3 process, per spec.md section 6.
#[derive(Parser, Debug, Clone)]
pub struct Stage3Args {
    #[arg(long = "uid")]
    pub uid: u32,
    #[arg(long = "gid")]
    pub gid: u32,
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

pub(crate) fn hex_decode(s: &str) -> Result<[u8; 32]> {
    if s.len() != 64 {
        bail!("expected a 64-character hex string, got {} characters", s.len());
    }
    let mut out = [0u8; 32];
    for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
        let byte_str = std::str::from_utf8(chunk).context("hex string is not utf-8")?;
        out[i] = u8::from_str_radix(byte_str, 16).context("invalid hex digit")?;
    }
    Ok(out)
}

pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn decode_key(b64: &str) -> Result<[u8; 32]> {
    let bytes = base64_decode(b64).context("key is not valid base64")?;
    let array: [u8; 32] = bytes
        .try_into()
        .map_err(|v: Vec<u8>| anyhow::anyhow!("key must be 32 bytes, got {}", v.len()))?;
    Ok(array)
}

/// Minimal base64 decoder (standard alphabet, optional `=` padding) so we
/// don't pull in a whole crate for a handful of 32/44-byte keys.
fn base64_decode(input: &str) -> Result<Vec<u8>> {
    const ALPHABET: &[u8] =
        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
    let input = input.trim().trim_end_matches('=');
    let mut out = Vec::with_capacity(input.len() * 3 / 4 + 3);
    let mut buf: u32 = 0;
    let mut bits = 0;
    for c in input.bytes() {
        let val = ALPHABET
            .iter()
            .position(|&a| a == c)
            .with_context(|| format!("invalid base64 character: {}", c as char))?;
        buf = (buf << 6) | val as u32;
        bits += 6;
        if bits >= 8 {
            bits -= 8;
            out.push((buf >> bits) as u8);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_round_trip() {
        let key = [0xabu8; 32];
        let encoded: String = key.iter().map(|b| format!("{b:02x}")).collect();
        assert_eq!(hex_decode(&encoded).unwrap(), key);
    }

    #[test]
    fn hex_decode_rejects_wrong_length() {
        assert!(hex_decode("abcd").is_err());
    }

    #[test]
    fn subnet_parses() {
        let s: Subnet = "10.1.2.100/24".parse().unwrap();
        assert_eq!(s.address.to_string(), "10.1.2.100");
        assert_eq!(s.prefix_len, 24);
    }

    #[test]
    fn subnet_rejects_missing_prefix() {
        assert!("10.1.2.100".parse::<Subnet>().is_err());
    }

    #[test]
    fn base64_roundtrip_for_32_byte_key() {
        let key = [7u8; 32];
        let encoded = {
            const ALPHABET: &[u8] =
                b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";
            let mut s = String::new();
            for chunk in key.chunks(3) {
                let b = [
                    chunk[0],
                    *chunk.get(1).unwrap_or(&0),
                    *chunk.get(2).unwrap_or(&0),
                ];
                let n = ((b[0] as u32) << 16) | ((b[1] as u32) << 8) | b[2] as u32;
                s.push(ALPHABET[((n >> 18) & 0x3f) as usize] as char);
                s.push(ALPHABET[((n >> 12) & 0x3f) as usize] as char);
                s.push(if chunk.len() > 1 {
                    ALPHABET[((n >> 6) & 0x3f) as usize] as char
                } else {
                    '='
                });
                s.push(if chunk.len() > 2 {
                    ALPHABET[(n & 0x3f) as usize] as char
                } else {
                    '='
                });
            }
            s
        };
        assert_eq!(decode_key(&encoded).unwrap(), key);
    }
}
