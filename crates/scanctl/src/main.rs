//! scanctl - drive barcode scan sessions from the command line
//!
//! Subcommands:
//! - `scanctl devices` - List cameras and show which one a scan would use
//! - `scanctl scan` - Run one scan attempt against the simulated camera
//! - `scanctl config` - Print the effective configuration and its sources

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "scanctl")]
#[command(about = "Drive barcode scan sessions")]
#[command(version)]
struct Cli {
    /// Config file used in place of ./scandesk.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List video inputs and the camera a scan would pick
    Devices {
        /// Simulate a machine with no cameras
        #[arg(long)]
        no_devices: bool,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Run one scan attempt
    Scan {
        /// Barcode text the simulated decoder will find
        #[arg(long, default_value = "FE001")]
        code: String,

        /// Empty frames before the code shows up
        #[arg(long, default_value = "3")]
        after_frames: usize,

        /// Decline the camera permission prompt
        #[arg(long)]
        deny_permission: bool,

        /// Simulate a machine with no cameras
        #[arg(long)]
        no_devices: bool,

        /// Stop the attempt after this many milliseconds
        #[arg(long)]
        cancel_after_ms: Option<u64>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, sources) = scanconf::ScanConfig::load_with_sources_from(cli.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.telemetry.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Devices { no_devices, json } => {
            commands::devices(&config, no_devices, json).await?;
        }
        Commands::Scan {
            code,
            after_frames,
            deny_permission,
            no_devices,
            cancel_after_ms,
            json,
        } => {
            commands::scan(
                &config,
                commands::ScanOptions {
                    code,
                    after_frames,
                    deny_permission,
                    no_devices,
                    cancel_after_ms,
                    json,
                },
            )
            .await?;
        }
        Commands::Config => {
            commands::show_config(&config, &sources);
        }
    }

    Ok(())
}
