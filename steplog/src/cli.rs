// steplog/src/cli.rs
//! This file defines the command-line interface (CLI) for the steplog binary,
//! including all available commands and their arguments.
//! License: MIT OR APACHE 2.0

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(
    name = "steplog",
    author = "Relay",
    version = env!("CARGO_PKG_VERSION"),
    about = "Run CI steps with masked, timestamped, rate-limited logs",
    long_about = "steplog runs a command as one step of a task. Everything the command prints is masked against a list of secrets, stamped line by line with the time, and shipped through a batching writer that keeps sink traffic within a byte budget per time unit.",
    arg_required_else_help = true,
)]
pub struct Cli {
    /// Disable informational messages
    #[arg(long, short = 'q', global = true, help = "Suppress all informational and debug messages.")]
    pub quiet: bool,

    /// Enable debug logging (overrides RUST_LOG)
    #[arg(long, short = 'd', global = true, help = "Enable debug logging.")]
    pub debug: bool,

    /// The subcommand to run
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Runs a command as a step, streaming its output through the pipeline.
    Run(RunCommand),

    /// Masks stdin to stdout using the streaming masker.
    Mask(MaskCommand),

    /// Prints the effective configuration as YAML.
    Config(ConfigCommand),
}

/// Secret sources shared by every command that masks.
#[derive(Parser, Debug, Clone, Default)]
pub struct SecretArgs {
    /// A secret to mask, given as NAME=VALUE. May be repeated.
    #[arg(long = "secret", short = 's', value_name = "NAME=VALUE", value_parser = parse_secret)]
    pub secrets: Vec<(String, String)>,

    /// A dotenv-style file of NAME=VALUE secrets.
    #[arg(long = "secrets-file", value_name = "FILE", env = "STEPLOG_SECRETS_FILE")]
    pub secrets_file: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct RunCommand {
    /// Identifier of the task the step belongs to.
    #[arg(long = "task-id", value_name = "ID", env = "STEPLOG_TASK_ID", default_value = "local")]
    pub task_id: String,

    /// Name of the step.
    #[arg(long = "step", value_name = "NAME", env = "STEPLOG_STEP", default_value = "main")]
    pub step: String,

    /// Path to a configuration file merged over the defaults.
    #[arg(long = "config", value_name = "FILE", env = "STEPLOG_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub secrets: SecretArgs,

    /// Append flushed batches to this file instead of stdout.
    #[arg(long, short = 'o', value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Do not prefix log lines with a timestamp.
    #[arg(long = "no-timestamps")]
    pub no_timestamps: bool,

    /// The command to run, after `--`.
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

#[derive(Parser, Debug)]
pub struct MaskCommand {
    /// Path to a configuration file merged over the defaults.
    #[arg(long = "config", value_name = "FILE", env = "STEPLOG_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub secrets: SecretArgs,
}

#[derive(Parser, Debug)]
pub struct ConfigCommand {
    /// Path to a configuration file merged over the defaults.
    #[arg(long = "config", value_name = "FILE", env = "STEPLOG_CONFIG")]
    pub config: Option<PathBuf>,
}

fn parse_secret(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got '{}'", raw)),
    }
}
