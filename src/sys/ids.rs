//! Target uid/gid resolution and privilege drop, per spec.md section 4.1:
//! resolution happens in stage1 before any namespace change (the user
//! database is unreachable once namespaced), and the drop order in stage3
//! is `setgid` then `setuid` ("setuid first would lose the ability to set
//! gid").

use anyhow::{Context, Result};
use tracing::instrument;

#[derive(Debug, Clone, Copy)]
pub struct TargetIds {
    pub uid: u32,
    pub gid: u32,
}

#[instrument(level = "trace", skip_all, err(level = "trace"))]
pub fn resolve(
    user: Option<&str>,
    uid: Option<u32>,
    gid: Option<u32>,
) -> Result<TargetIds> {
    if let (Some(uid), Some(gid)) = (uid, gid) {
        return Ok(TargetIds { uid, gid });
    }

    if let Some(name) = user {
        let user = nix::unistd::User::from_name(name)
            .with_context(|| format!("looking up user {name}"))?
            .with_context(|| format!("no such user: {name}"))?;
        return Ok(TargetIds {
            uid: uid.unwrap_or(user.uid.as_raw()),
            gid: gid.unwrap_or(user.gid.as_raw()),
        });
    }

    Ok(TargetIds {
        uid: uid.unwrap_or_else(|| nix::unistd::getuid().as_raw()),
        gid: gid.unwrap_or_else(|| nix::unistd::getgid().as_raw()),
    })
}

#[instrument(level = "trace", skip_all, err(level = "trace"))]
pub fn drop_to(ids: TargetIds) -> Result<()> {
    nix::unistd::setgid(nix::unistd::Gid::from_raw(ids.gid)).context("setgid")?;
    nix::unistd::setuid(nix::unistd::Uid::from_raw(ids.uid)).context("setuid")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_uid_gid_take_precedence() {
        let ids = resolve(Some("root"), Some(1000), Some(1000)).unwrap();
        assert_eq!(ids.uid, 1000);
        assert_eq!(ids.gid, 1000);
    }

    #[test]
    fn defaults_to_current_process_ids() {
        let ids = resolve(None, None, None).unwrap();
        assert_eq!(ids.uid, nix::unistd::getuid().as_raw());
        assert_eq!(ids.gid, nix::unistd::getgid().as_raw());
    }
}
