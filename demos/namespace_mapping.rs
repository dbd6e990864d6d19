//! Stand-alone demo of the `{0 -> host_uid}` mapping stage1 writes before
//! re-execing into stage2: unshare a user+mount namespace, write the id
//! maps, and show that `id` now reports uid 0 while the host still sees the
//! real caller.
use anyhow::Result;
use std::process::Command;
use wirecage::sys::namespace::{NamespaceKind, UnshareEnvironmentBuilder};

fn main() -> Result<()> {
    tracing_subscriber::fmt::Subscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .init();

    let mut builder = UnshareEnvironmentBuilder::default();
    builder
        .namespace(NamespaceKind::User)
        .namespace(NamespaceKind::Mount)
        .map_current_user_to_root();
    builder.enter()?;

    let output = Command::new("id").output()?;
    print!("{}", String::from_utf8_lossy(&output.stdout));
    Ok(())
}
