//! Times the stage1->stage2 and stage2->stage3 namespace hops back to back,
//! the way spec.md's bootstrap protocol chains them, without actually
//! re-execing into a new binary (this just measures `unshare` + id-map-write
//! latency in isolation).
use anyhow::Result;
use tracing::{info, Level};
use wirecage::sys::namespace::{NamespaceKind, UnshareEnvironmentBuilder};

fn print_ids(label: &str) {
    info!(
        "{}: uid={} gid={} pid={}",
        label,
        nix::unistd::getuid(),
        nix::unistd::getgid(),
        nix::unistd::getpid()
    );
}

fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    print_ids("host");
    let start = std::time::Instant::now();
    UnshareEnvironmentBuilder::default()
        .namespace(NamespaceKind::User)
        .namespace(NamespaceKind::Mount)
        .map_current_user_to_root()
        .enter()?;
    print_ids("stage1->stage2 hop");
    info!("first hop took {:?}", start.elapsed());

    let start = std::time::Instant::now();
    UnshareEnvironmentBuilder::default()
        .namespace(NamespaceKind::User)
        .map_root_to_user(1000, 1000)
        .enter()?;
    print_ids("stage2->stage3 hop");
    info!("second hop took {:?}", start.elapsed());

    Ok(())
}
