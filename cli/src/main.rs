//! kernel-ping: check that a Jupyter kernel answers `kernel_info_request`
//!
//! Exits 0 when the kernel named by the connection file replies in time,
//! 1 on any failure.

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use kernel_ping_client::{run_probe, ProbeConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod output;

const ENV_VERBOSE: &str = "KERNEL_PING_VERBOSE";

#[derive(Parser)]
#[command(name = "kernel-ping")]
#[command(about = "Liveness probe for Jupyter kernels", long_about = None)]
#[command(version)]
struct Cli {
    /// Kernel connection file (kernel-*.json)
    connection_file: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return argument_error(e),
    };

    init_tracing(cli.verbose || verbose_from_env());

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            output::error(&format!("{:#}", e));
            return ExitCode::FAILURE;
        }
    };

    match run_probe(&config).await {
        Ok(info) => {
            output::success(&format!(
                "Kernel is alive: {} {}",
                info.implementation_or_unknown(),
                info.version_or_unknown()
            ));
            if info.implementation.is_none() {
                output::warning("Kernel did not report its implementation");
            }
            if let Some(language) = &info.language_info.name {
                output::info(&format!("Language: {}", language));
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            output::error(&format!("Kernel test failed: {}", e));
            ExitCode::FAILURE
        }
    }
}

/// Help and version requests succeed; anything else is a usage error
fn argument_error(e: clap::Error) -> ExitCode {
    let _ = e.print();
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    }
}

fn load_config(cli: &Cli) -> Result<ProbeConfig> {
    ProbeConfig::from_env(cli.connection_file.clone()).context("invalid probe configuration")
}

fn verbose_from_env() -> bool {
    std::env::var(ENV_VERBOSE)
        .map(|v| matches!(v.trim(), "1" | "true" | "yes"))
        .unwrap_or(false)
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
