//! Shows the span-event tracing setup `main.rs` uses for every stage, with
//! an `#[instrument]`'d function standing in for a real stage `run()` call.
use anyhow::Result;
use tracing::{info, instrument, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[instrument(level = "trace", ret)]
fn bootstrap_step(step: &str) -> usize {
    info!(step, "running bootstrap step");
    step.len()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .with_max_level(Level::TRACE)
        .init();

    _ = bootstrap_step("configure-tun");
    _ = bootstrap_step("establish-handshake");

    Ok(())
}
