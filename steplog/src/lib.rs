// steplog/src/lib.rs
//! # steplog CLI
//!
//! Command-line front end for `steplog-core`: run a command as a CI step with
//! masked, timestamped, rate-limited logs, mask a stream on its own, or inspect
//! the effective configuration.

pub mod cli;
pub mod commands;
pub mod logger;

pub use commands::config::config_command;
pub use commands::mask::mask_command;
pub use commands::run::run_command;
