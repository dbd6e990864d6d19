//! Bind mount with an unmount-on-`Drop` guard, adapted directly from
//! `containix::mount::{BindMount, MountGuard}`.

use anyhow::Result;
use derive_builder::Builder;
use std::path::{Path, PathBuf};
use tracing::{error, instrument, trace};

#[derive(Debug)]
pub struct MountGuard(Option<PathBuf>);

impl Drop for MountGuard {
    fn drop(&mut self) {
        let Some(path) = &self.0 else {
            return;
        };
        if let Err(err) = unmount(path) {
            error!("failed to unmount {}: {}", path.display(), err);
        }
    }
}

#[derive(Debug, Clone, Builder)]
#[builder(name = "BindMount", setter(into))]
#[builder(build_fn(vis = ""))]
pub struct BindMountOptions {
    src: PathBuf,
    dest: PathBuf,
    #[builder(default)]
    read_only: bool,
    #[builder(default = "true")]
    cleanup: bool,
}

impl BindMount {
    #[instrument(level = "trace", skip_all, err(level = "trace"))]
    pub fn mount(&mut self) -> Result<MountGuard> {
        let opts = self.build()?;
        trace!("mounting {opts:?}");
        use nix::mount::MsFlags;

        nix::mount::mount(
            Some(&opts.src),
            &opts.dest,
            Option::<&str>::None,
            MsFlags::MS_BIND,
            Option::<&str>::None,
        )?;
        if opts.read_only {
            // The kernel ignores MS_RDONLY passed alongside MS_BIND on the
            // initial mount(2) call; making a bind mount read-only needs a
            // second remount call.
            nix::mount::mount(
                Option::<&str>::None,
                &opts.dest,
                Option::<&str>::None,
                MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
                Option::<&str>::None,
            )?;
        }
        Ok(MountGuard(if opts.cleanup { Some(opts.dest) } else { None }))
    }
}

#[instrument(level = "trace", skip_all, fields(path = %path.as_ref().display()), err(level = "trace"))]
pub fn unmount(path: impl AsRef<Path>) -> Result<()> {
    nix::mount::umount(path.as_ref())?;
    Ok(())
}
