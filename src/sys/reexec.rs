//! Re-exec of `/proc/self/exe` with a stage sentinel, the mechanism behind
//! spec.md section 4.1's stage1->stage2 and stage2->stage3 transitions.
//!
//! Each hop is a plain `fork` + `execve` via `std::process::Command`, with
//! the user-namespace unshare done in the child's `pre_exec` hook (which
//! runs after `fork`, before `execve`, inside the child's own process
//! image) by reusing `sys::namespace::UnshareEnvironmentBuilder::enter`.
//! Because the child unshares *its own* (freshly forked) user namespace and
//! writes its own `/proc/self/{uid,gid}_map`, no parent-side map-writing
//! synchronization pipe is needed — the same shape
//! `containix::main::enter_root_ns` uses for its single-process case,
//! generalized to the fork boundary. Because this is a synchronous
//! `fork`+`execve` pair issued directly from the calling thread (never
//! routed through an async runtime), it cannot be preempted onto a
//! different OS thread mid-sequence, which is the property spec.md section
//! 5 requires of the stage3 re-exec in particular.

use std::{ffi::OsString, os::unix::process::CommandExt, process::Command};

use anyhow::{Context, Result};
use tracing::instrument;

use crate::sys::namespace::{IdRangeMap, NamespaceKind, UnshareEnvironmentBuilder};

pub const STAGE2_SENTINEL: &str = "stage2";
pub const STAGE3_SENTINEL: &str = "stage3";

/// Spawns `/proc/self/exe` with `argv[1..] = args`, unsharing a new user
/// namespace in the child and mapping `uid_map`/`gid_map` into it before
/// `execve` runs.
#[instrument(level = "trace", skip(args), err(level = "trace"))]
pub fn reexec_self(
    args: Vec<OsString>,
    uid_map: IdRangeMap,
    gid_map: IdRangeMap,
) -> Result<std::process::Child> {
    let mut command = Command::new("/proc/self/exe");
    command.args(&args);

    unsafe {
        command.pre_exec(move || {
            let mut builder = UnshareEnvironmentBuilder::default();
            builder
                .namespace(NamespaceKind::User)
                .uid_map(uid_map.clone())
                .gid_map(gid_map.clone());
            builder
                .enter()
                .map_err(|e| std::io::Error::other(e.to_string()))
        });
    }

    command
        .spawn()
        .with_context(|| format!("re-executing self with args {args:?}"))
}

/// Waits for `child`, propagating its exit status per spec.md section 6:
/// "if the target child exits non-zero, propagate that exact code verbatim".
/// Termination by signal is mapped to the conventional `128 + signum`.
#[instrument(level = "trace", skip(child), err(level = "trace"))]
pub fn wait_for_exit_code(mut child: std::process::Child) -> Result<i32> {
    let status = child.wait().context("waiting for re-exec'd child")?;
    Ok(exit_code_of(status))
}

fn exit_code_of(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .unwrap_or_else(|| 128 + status.signal().unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    #[test]
    fn exit_code_passthrough() {
        let status = StdCommand::new("sh")
            .arg("-c")
            .arg("exit 42")
            .status()
            .unwrap();
        assert_eq!(exit_code_of(status), 42);
    }
}
