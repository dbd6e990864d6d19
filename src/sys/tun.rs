//! TUN device creation, grounded in `containix::linux_net::set_ip_address`'s
//! approach of reaching for raw `ioctl`s via `libc` instead of a netlink
//! crate — the same style, generalized from "set an address on an existing
//! link" to "allocate a TUN link and read its kernel-assigned MTU".

use std::{
    fs::{File, OpenOptions},
    os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
    os::unix::fs::OpenOptionsExt,
};

use anyhow::{Context, Result};
use tracing::instrument;

use crate::sys::str_as_ifname;

const TUN_PATH: &str = "/dev/net/tun";

#[derive(Debug)]
pub struct TunDevice {
    fd: OwnedFd,
    pub name: String,
    pub mtu: usize,
}

#[instrument(level = "trace", err(level = "trace"))]
pub fn create(name: &str) -> Result<TunDevice> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(libc::O_CLOEXEC)
        .open(TUN_PATH)
        .with_context(|| format!("opening {TUN_PATH}"))?;
    let fd: OwnedFd = file.into();

    unsafe {
        let mut ifr: libc::ifreq = std::mem::zeroed();
        ifr.ifr_name = str_as_ifname(name);
        ifr.ifr_ifru.ifru_flags = (libc::IFF_TUN | libc::IFF_NO_PI) as i16;

        let ret = libc::ioctl(fd.as_raw_fd(), tunsetiff_request(), &ifr);
        if ret < 0 {
            anyhow::bail!("TUNSETIFF failed for {name}: {}", std::io::Error::last_os_error());
        }
    }

    let mtu = query_mtu(name)?;

    Ok(TunDevice {
        fd,
        name: name.to_string(),
        mtu,
    })
}

/// `TUNSETIFF` is `_IOW('T', 202, int)`; `libc` doesn't expose the constant
/// on every target, so it's computed the same way the kernel header does.
fn tunsetiff_request() -> libc::c_ulong {
    const IOC_WRITE: libc::c_ulong = 1;
    const IOC_NRBITS: u32 = 8;
    const IOC_TYPEBITS: u32 = 8;
    const IOC_SIZEBITS: u32 = 14;
    const IOC_NRSHIFT: u32 = 0;
    let ioc_typeshift = IOC_NRSHIFT + IOC_NRBITS;
    let ioc_sizeshift = ioc_typeshift + IOC_TYPEBITS;
    let ioc_dirshift = ioc_sizeshift + IOC_SIZEBITS;

    let nr: libc::c_ulong = 202;
    let typ: libc::c_ulong = b'T' as libc::c_ulong;
    let size: libc::c_ulong = std::mem::size_of::<libc::c_int>() as libc::c_ulong;

    (IOC_WRITE << ioc_dirshift) | (typ << ioc_typeshift) | (nr << IOC_NRSHIFT) | (size << ioc_sizeshift)
}

fn query_mtu(name: &str) -> Result<usize> {
    unsafe {
        let sock = libc::socket(libc::AF_INET, libc::SOCK_DGRAM, 0);
        if sock < 0 {
            anyhow::bail!("opening control socket for MTU query failed");
        }
        let _guard = FdGuard(sock);

        let mut ifr: libc::ifreq = std::mem::zeroed();
        ifr.ifr_name = str_as_ifname(name);
        if libc::ioctl(sock, libc::SIOCGIFMTU, &mut ifr) < 0 {
            anyhow::bail!("SIOCGIFMTU failed for {name}: {}", std::io::Error::last_os_error());
        }
        Ok(ifr.ifr_ifru.ifru_mtu as usize)
    }
}

struct FdGuard(RawFd);
impl Drop for FdGuard {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

impl TunDevice {
    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Splits into independently-owned read/write halves backed by `dup`'d
    /// descriptors of the same underlying TUN fd, per spec.md section 3
    /// ("read-half and write-half may be split for concurrent I/O but both
    /// refer to the same descriptor").
    pub fn split(self) -> Result<(TunReader, TunWriter)> {
        let dup_fd = nix::unistd::dup(self.fd.as_raw_fd()).context("dup'ing tun fd for split")?;
        let writer_file = unsafe { File::from_raw_fd(dup_fd) };
        let reader_file: File = self.fd.into();
        Ok((
            TunReader {
                file: tokio::fs::File::from_std(reader_file),
            },
            TunWriter {
                file: tokio::fs::File::from_std(writer_file),
            },
        ))
    }
}

pub struct TunReader {
    pub file: tokio::fs::File,
}

pub struct TunWriter {
    pub file: tokio::fs::File,
}

impl IntoRawFd for TunDevice {
    fn into_raw_fd(self) -> RawFd {
        self.fd.into_raw_fd()
    }
}
