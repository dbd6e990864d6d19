pub mod ids;
pub mod mount;
pub mod namespace;
pub mod netctl;
pub mod reexec;
pub mod tun;

/// Converts an interface name into the fixed-size `ifr_name` array used by
/// `ioctl(SIOC*)`/`ioctl(TUNSETIFF)` calls, the same shape as the missing
/// `str_as_array` helper `containix::linux_net` imports from its
/// `unix_helpers` module.
pub(crate) fn str_as_ifname(name: &str) -> [libc::c_char; libc::IFNAMSIZ] {
    let mut buf = [0 as libc::c_char; libc::IFNAMSIZ];
    for (dst, src) in buf.iter_mut().zip(name.as_bytes()) {
        *dst = *src as libc::c_char;
    }
    buf
}
