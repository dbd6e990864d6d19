//! Component-boundary error type.
//!
//! Stage and `sys` code uses `anyhow::Result` with `.context(...)`, the way
//! `containix` threads context through its unshare/mount/exec call graph.
//! `vns`, `wg` and `proxy` are library-shaped components with their own
//! internal error conditions (bad checksum, replay, dial failure); those
//! convert into `CageError` at the point they cross into stage2's
//! orchestration code, per spec.md's "library-level errors inside the VNS
//! and peer are converted to component-level errors at the boundary".

use std::net::SocketAddr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CageError {
    #[error("argument error: {0}")]
    Args(String),

    #[error("namespace setup failed: {0}")]
    Namespace(String),

    #[error("overlay failed: {0}")]
    Overlay(String),

    #[error("tun device error: {0}")]
    Tun(String),

    #[error("network configuration failed: {0}")]
    Netctl(String),

    #[error("handshake failed with {endpoint}: {reason}")]
    Handshake {
        endpoint: SocketAddr,
        reason: String,
    },

    #[error("dial to {dst} failed: {source}")]
    Dial {
        dst: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("packet decode error: {0}")]
    Decode(String),

    #[error("flow i/o error: {0}")]
    FlowIo(#[source] std::io::Error),

    #[error("exec failed: {0}")]
    Exec(#[source] nix::Error),

    #[error("child exited with code {0}")]
    ChildExit(i32),
}

pub type CageResult<T> = Result<T, CageError>;
