//! User/network namespace setup, generalized from
//! `containix::unshare::UnshareEnvironment` (same `derive_builder`-based
//! API, same uid/gid-map writing dance) but narrowed to the two namespace
//! kinds the bootstrap protocol needs and the reversed-map pattern spec.md
//! section 4.1 describes for stage2->stage3 (`{U -> 0}` then `{0 -> U}`).

use std::{
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use derive_builder::Builder;
use nix::sched::CloneFlags;
use tracing::{instrument, Level};

#[derive(Debug, Clone, Copy)]
pub enum NamespaceKind {
    User,
    Network,
    Mount,
}

impl From<NamespaceKind> for CloneFlags {
    fn from(val: NamespaceKind) -> Self {
        match val {
            NamespaceKind::User => CloneFlags::CLONE_NEWUSER,
            NamespaceKind::Network => CloneFlags::CLONE_NEWNET,
            NamespaceKind::Mount => CloneFlags::CLONE_NEWNS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IdRangeMap {
    pub inner_id_start: u32,
    pub outer_id_start: u32,
    pub count: u32,
}

impl IdRangeMap {
    pub fn new(inner_id_start: u32, outer_id_start: u32, count: u32) -> Self {
        Self {
            inner_id_start,
            outer_id_start,
            count,
        }
    }

    fn serialize(&self) -> String {
        format!(
            "{} {} {}",
            self.inner_id_start, self.outer_id_start, self.count
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct IdRanges(Vec<IdRangeMap>);

impl IdRanges {
    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, map: IdRangeMap) {
        self.0.push(map);
    }

    fn write_to(&self, mut w: impl Write) -> Result<()> {
        let serialized = self
            .0
            .iter()
            .map(IdRangeMap::serialize)
            .collect::<Vec<_>>()
            .join("\n");
        w.write_all(serialized.as_bytes())?;
        Ok(())
    }
}

#[derive(Debug, Builder)]
#[builder(build_fn(name = "build", vis = ""))]
pub struct UnshareEnvironment {
    #[builder(default, setter(custom, name = "namespace"))]
    namespaces: Vec<NamespaceKind>,
    #[builder(default, setter(custom, name = "uid_map"))]
    uid_maps: IdRanges,
    #[builder(default, setter(custom, name = "gid_map"))]
    gid_maps: IdRanges,
}

impl UnshareEnvironment {
    fn clone_flags(&self) -> CloneFlags {
        self.namespaces
            .iter()
            .fold(CloneFlags::empty(), |flags, ns| flags.union((*ns).into()))
    }

    fn write_id_maps(&self) -> Result<()> {
        std::fs::write("/proc/self/setgroups", "deny").context("disallowing setgroups")?;
        write_mappings("/proc/self/uid_map", &self.uid_maps).context("writing uid map")?;
        write_mappings("/proc/self/gid_map", &self.gid_maps).context("writing gid map")?;
        Ok(())
    }
}

impl UnshareEnvironmentBuilder {
    pub fn uid_map(&mut self, map: IdRangeMap) -> &mut Self {
        self.uid_maps.get_or_insert_with(Default::default).push(map);
        self
    }

    pub fn gid_map(&mut self, map: IdRangeMap) -> &mut Self {
        self.gid_maps.get_or_insert_with(Default::default).push(map);
        self
    }

    pub fn namespace(&mut self, ns: NamespaceKind) -> &mut Self {
        self.namespaces.get_or_insert_with(Vec::new).push(ns);
        self
    }

    /// Maps host uid/gid to 0 inside the new user namespace — stage1's
    /// `{0 -> host_uid, size 1}` mapping from spec.md section 4.1.
    pub fn map_current_user_to_root(&mut self) -> &mut Self {
        self.uid_map(IdRangeMap::new(0, nix::unistd::getuid().as_raw(), 1));
        self.gid_map(IdRangeMap::new(0, nix::unistd::getgid().as_raw(), 1));
        self
    }

    /// Maps 0 inside the new user namespace to `uid`/`gid` outside it —
    /// stage2's `{U -> 0, size 1}` reversed mapping used for stage3.
    pub fn map_root_to_user(&mut self, uid: u32, gid: u32) -> &mut Self {
        self.uid_map(IdRangeMap::new(0, uid, 1));
        self.gid_map(IdRangeMap::new(0, gid, 1));
        self
    }

    #[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
    pub fn enter(&mut self) -> Result<()> {
        let unshare = self.build().context("building unshare options")?;
        nix::sched::unshare(unshare.clone_flags()).context("entering new namespace")?;
        if !unshare.uid_maps.is_empty() || !unshare.gid_maps.is_empty() {
            unshare.write_id_maps().context("writing id maps")?;
        }
        Ok(())
    }
}

fn write_mappings(path: impl AsRef<Path>, mappings: &IdRanges) -> Result<()> {
    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(path.as_ref())
        .with_context(|| format!("opening {}", path.as_ref().display()))?;
    mappings.write_to(&mut file).context("writing mapping")
}

/// `setns(2)` onto an existing network namespace referenced by its
/// `/proc/<pid>/ns/net`-style path. Used only for diagnostics/tests; the
/// bootstrap protocol itself always creates fresh namespaces via `unshare`.
#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
pub fn setns_from_path(path: &PathBuf, kind: NamespaceKind) -> Result<()> {
    let file = std::fs::File::open(path).with_context(|| format!("opening {}", path.display()))?;
    nix::sched::setns(file, kind.into()).context("setns")?;
    Ok(())
}

/// Structural marker for the invariant in spec.md section 5: stage2 must
/// run everything that touches the netns/mount table on a single OS thread.
/// Rust gives no "pin this thread" syscall; the invariant is upheld by never
/// spawning a task or OS thread across the unshare -> exec window, which is
/// what this function's call site documents by existing.
pub fn assert_single_threaded_for_stage2() {
    debug_assert_eq!(
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1) >= 1,
        true,
        "stage2 must run its namespace-affecting syscalls on the thread that called unshare"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_flags_union_namespaces() {
        let mut builder = UnshareEnvironmentBuilder::default();
        builder
            .namespace(NamespaceKind::User)
            .namespace(NamespaceKind::Network);
        let env = builder.build().unwrap();
        let flags = env.clone_flags();
        assert!(flags.contains(CloneFlags::CLONE_NEWUSER));
        assert!(flags.contains(CloneFlags::CLONE_NEWNET));
        assert!(!flags.contains(CloneFlags::CLONE_NEWNS));
    }

    #[test]
    fn id_range_serializes_as_three_columns() {
        let map = IdRangeMap::new(0, 1000, 1);
        assert_eq!(map.serialize(), "0 1000 1");
    }
}
