// steplog/src/main.rs
//! steplog entry point.

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;
use std::process::ExitCode;

use steplog::cli::{Cli, Commands};
use steplog::{config_command, logger, mask_command, run_command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let level = if cli.quiet {
        Some(LevelFilter::Off)
    } else if cli.debug {
        Some(LevelFilter::Debug)
    } else {
        None
    };
    logger::init_logger(level);

    match cli.command {
        Commands::Run(cmd) => {
            let code = run_command(cmd, cli.quiet).await?;
            Ok(ExitCode::from(code.clamp(0, 255) as u8))
        }
        Commands::Mask(cmd) => {
            mask_command(cmd).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config(cmd) => {
            config_command(cmd)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
