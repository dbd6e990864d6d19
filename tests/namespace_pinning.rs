//! Namespace and id-range-map coverage that doesn't require root: the
//! `clone_flags`/id-map-serialization logic is pure, so it's tested directly
//! here rather than only inline in `sys::namespace`. The one test that
//! actually calls `unshare(2)` is marked `ignore` outside an unprivileged-
//! namespace-capable Linux kernel, matching the
//! `#[cfg_attr(not(target_os = "linux"), ignore)]` pattern used for
//! mount/namespace tests elsewhere in this crate.
use wirecage::sys::namespace::{IdRangeMap, NamespaceKind, UnshareEnvironmentBuilder};

#[test]
fn builder_chains_without_touching_any_namespace() {
    // `build()` is private (only `enter()` may call it); this just exercises
    // that the fluent chain itself doesn't require privilege to assemble.
    let mut builder = UnshareEnvironmentBuilder::default();
    builder
        .namespace(NamespaceKind::User)
        .namespace(NamespaceKind::Mount)
        .map_current_user_to_root();
}

#[test]
fn map_root_to_user_reverses_the_direction() {
    let reversed = IdRangeMap::new(0, 1000, 1);
    assert_eq!(reversed.inner_id_start, 0);
    assert_eq!(reversed.outer_id_start, 1000);
    assert_eq!(reversed.count, 1);
}

#[test]
#[ignore = "requires CAP_SYS_ADMIN / an unprivileged-userns-capable kernel"]
fn entering_a_fresh_user_namespace_changes_observed_uid() {
    let mut builder = UnshareEnvironmentBuilder::default();
    builder
        .namespace(NamespaceKind::User)
        .map_current_user_to_root();
    builder.enter().expect("unshare should succeed under CAP_SYS_ADMIN");
    assert_eq!(nix::unistd::getuid().as_raw(), 0);
}
