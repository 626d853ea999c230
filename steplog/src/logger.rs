// steplog/src/logger.rs
//! Logger setup for the steplog binary.
//!
//! `RUST_LOG` is honoured unless a level is forced by `--quiet` or `--debug`.
//! Logs always go to stderr so they never mix with JSON lines on stdout.

use env_logger::{Builder, Env, Target};
use log::LevelFilter;

pub fn init_logger(level: Option<LevelFilter>) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("warn"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.format_timestamp_millis().target(Target::Stderr);
    // Tests may initialise more than once.
    let _ = builder.try_init();
}
