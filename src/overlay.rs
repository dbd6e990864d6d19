//! `/etc` overlay collaborator (spec.md section 4.5).
//!
//! Contract: given a host path `P` and a set of `(relative_name, bytes)`
//! entries, return a handle that makes the child see those file contents at
//! `P/relative_name` while every other entry of `P` is untouched. Dropping
//! the handle reverses the effect on every exit path.
//!
//! Shaped like `containix::mount::BindMount`/`MountGuard`: a builder that
//! produces a guard whose `Drop` impl unmounts and logs rather than panics
//! on cleanup failure. Per-file bind mounts (rather than a whole-directory
//! overlayfs, which is what `containix::overlayfs::OverlayFs` uses to
//! assemble a container root) are the right shape here because the contract
//! is "shadow these specific names", not "give me a writable view of the
//! whole tree".

use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::{Context, Result};
use tracing::{instrument, warn, Level};

use crate::sys::mount::{BindMount, MountGuard};

static OVERLAY_SEQ: AtomicU64 = AtomicU64::new(0);

/// A single shadowed file: its content lives in a private staging file,
/// bind-mounted read-only over the real path for the lifetime of the guard.
struct ShadowedFile {
    guard: MountGuard,
    staging: PathBuf,
}

pub struct OverlayHandle {
    files: Vec<ShadowedFile>,
}

#[instrument(level = "trace", skip(base, entries), err(level = Level::TRACE))]
pub fn shadow(base: impl AsRef<Path>, entries: &[(&str, Vec<u8>)]) -> Result<OverlayHandle> {
    let base = base.as_ref();
    if !base.is_dir() {
        anyhow::bail!("overlay base {} is not a directory", base.display());
    }

    let staging_root = std::env::temp_dir().join(format!(
        "wirecage-overlay-{}-{}",
        std::process::id(),
        OVERLAY_SEQ.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&staging_root)
        .with_context(|| format!("creating overlay staging dir {}", staging_root.display()))?;

    let mut files = Vec::with_capacity(entries.len());
    for (name, content) in entries {
        let staging = staging_root.join(name);
        std::fs::write(&staging, content)
            .with_context(|| format!("writing overlay staging file {}", staging.display()))?;

        let target = base.join(name);
        if !target.exists() {
            std::fs::write(&target, []).with_context(|| {
                format!("creating empty mount point for overlay target {}", target.display())
            })?;
        }

        let guard = BindMount::default()
            .src(staging.clone())
            .dest(target.clone())
            .read_only(true)
            .mount()
            .with_context(|| format!("bind-mounting overlay over {}", target.display()))?;

        files.push(ShadowedFile { guard, staging });
    }

    Ok(OverlayHandle { files })
}

impl Drop for OverlayHandle {
    fn drop(&mut self) {
        let staging_root = self.files.first().and_then(|f| f.staging.parent().map(PathBuf::from));
        for file in std::mem::take(&mut self.files) {
            // Dropping `guard` unmounts the target; failures are already
            // logged by `MountGuard`'s own `Drop` impl. Drop it explicitly
            // before removing the staging file so the unmount always runs
            // first.
            drop(file.guard);
            if let Err(e) = std::fs::remove_file(&file.staging) {
                warn!(
                    "failed to remove overlay staging file {}: {e}",
                    file.staging.display()
                );
            }
        }
        if let Some(parent) = staging_root {
            let _ = std::fs::remove_dir(&parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(not(target_os = "linux"), ignore = "bind mounts are a Linux feature")]
    fn shadow_and_restore_resolv_conf() -> Result<()> {
        let tmp = tempdir::TempDir::new("wirecage-overlay-test")?;
        let base = tmp.path();
        std::fs::write(base.join("resolv.conf"), "nameserver 8.8.8.8\n")?;
        std::fs::write(base.join("hostname"), "original\n")?;

        {
            let _handle = shadow(
                base,
                &[("resolv.conf", b"nameserver 10.1.2.100\n".to_vec())],
            )?;
            assert_eq!(
                std::fs::read_to_string(base.join("resolv.conf"))?,
                "nameserver 10.1.2.100\n"
            );
            assert_eq!(std::fs::read_to_string(base.join("hostname"))?, "original\n");
        }

        assert_eq!(
            std::fs::read_to_string(base.join("resolv.conf"))?,
            "nameserver 8.8.8.8\n"
        );
        Ok(())
    }
}
