use std::ffi::OsString;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{instrument, Level};
use tracing_subscriber::{fmt, fmt::format::FmtSpan, EnvFilter};
use wirecage::config::{AppConfig, Cli, Stage2Args, Stage3Args};
use wirecage::stage::{self, Stage};

fn init_tracing(default_level: Level) -> Result<()> {
    fmt()
        .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
        .with_target(true)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("WIRECAGE_LOG")
                .from_env()
                .context("parsing WIRECAGE_LOG")?,
        )
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
fn run_stage1(argv: Vec<OsString>) -> Result<i32> {
    let cli = Cli::parse_from(argv);
    init_tracing(cli.log_level.as_tracing_level())?;
    let user = cli.user.clone();
    let uid = cli.uid;
    let gid = cli.gid;
    let config = AppConfig::try_from(cli).context("validating configuration")?;
    stage::stage1::run(config, user.as_deref(), uid, gid)
}

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
fn run_stage2(argv: Vec<OsString>) -> Result<i32> {
    init_tracing(Level::INFO)?;
    let args = Stage2Args::parse_from(argv);
    stage::stage2::run(args)
}

#[instrument(level = "trace", skip_all, err(level = Level::TRACE))]
fn run_stage3(argv: Vec<OsString>) -> Result<i32> {
    init_tracing(Level::INFO)?;
    let args = Stage3Args::parse_from(argv);
    stage::stage3::run(args)
}

fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    // argv[0] is the program path; the stage sentinel (if any) is argv[1].
    let rest = argv[1..].to_vec();

    let exit_code = match Stage::detect(&rest) {
        Stage::Stage1 => run_stage1(argv),
        Stage::Stage2 => run_stage2(rest),
        Stage::Stage3 => run_stage3(rest),
    }?;

    std::process::exit(exit_code);
}
