// steplog/src/commands/config.rs
use anyhow::Result;
use std::io::Write;

use crate::cli::ConfigCommand;
use crate::commands::load_config;

/// Prints the merged configuration to stdout.
pub fn config_command(cmd: ConfigCommand) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    let yaml = config.to_yaml()?;
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(yaml.as_bytes())?;
    stdout.flush()?;
    Ok(())
}
