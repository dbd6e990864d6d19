//! Stage 3: the last hop before the target command runs. Drops privileges
//! to the resolved target identity and `execve`s directly into the command,
//! per spec.md section 4.1: "stage3 never returns on success — it replaces
//! itself with the target command."

use std::os::unix::process::CommandExt;
use std::process::Command;

use anyhow::{Context, Result};
use tracing::{info, instrument, Level};

use crate::config::Stage3Args;
use crate::sys::ids::{self, TargetIds};

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn run(args: Stage3Args) -> Result<i32> {
    let ids = TargetIds {
        uid: args.uid,
        gid: args.gid,
    };
    ids::drop_to(ids).context("dropping privileges before exec")?;
    info!(uid = ids.uid, gid = ids.gid, command = ?args.command, "execing target command");

    let (program, rest) = args
        .command
        .split_first()
        .context("no command given to stage3")?;

    let err = Command::new(program)
        .args(rest)
        .env("WIRECAGE_SANDBOX", "1")
        .exec();

    // `exec` only returns on failure; a successful exec replaces this
    // process image entirely and never reaches here.
    Err(err).context(format!("executing {program}"))
}
