//! SerWB loopback: entry point.
//!
//! ```text
//! serwb-loopback                  Run with serwb-loopback.toml (or defaults)
//! serwb-loopback --config <path>  Load a custom config TOML
//! serwb-loopback --gen-config     Write default config to stdout
//! serwb-loopback --init           Write default config to the --config path
//! serwb-loopback --skew-ab 13     Override the receive phase of the slave
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use serwb_loopback::config::LoopbackConfig;
use serwb_loopback::service::LoopbackService;

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "serwb-loopback", about = "SerWB link loopback simulator")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "serwb-loopback.toml")]
    config: PathBuf,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    /// Write the default configuration to the config path and exit.
    #[arg(long)]
    init: bool,

    /// Bit skew seen by the slave receiver.
    #[arg(long)]
    skew_ab: Option<u32>,

    /// Bit skew seen by the master receiver.
    #[arg(long)]
    skew_ba: Option<u32>,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        let text = toml::to_string_pretty(&LoopbackConfig::default())?;
        println!("{text}");
        return Ok(ExitCode::SUCCESS);
    }

    if cli.init {
        LoopbackConfig::write_default(&cli.config)?;
        println!("wrote {}", cli.config.display());
        return Ok(ExitCode::SUCCESS);
    }

    // Load config.
    let mut config = LoopbackConfig::load(&cli.config);
    if let Some(skew) = cli.skew_ab {
        config.wire.skew_ab = skew;
    }
    if let Some(skew) = cli.skew_ba {
        config.wire.skew_ba = skew;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("serwb-loopback v{}", env!("CARGO_PKG_VERSION"));
    info!("lanes: {}", config.link.lanes);
    info!("skew: a→b {} bits, b→a {} bits", config.wire.skew_ab, config.wire.skew_ba);
    info!("traffic: {} words at {:#010x}", config.traffic.words, config.traffic.base_address);

    let service = LoopbackService::new(config);
    let report = match service.run().await {
        Ok(report) => report,
        Err(e) => {
            error!("loopback failed: {e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    report.log();
    Ok(if report.passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
