// steplog/src/commands/mod.rs
//! Subcommand implementations and the helpers they share.

use anyhow::{Context, Result};
use log::{debug, info};
use std::path::Path;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;

use steplog_core::{find_user_config, merge_configs, PipelineConfig, StreamCommand};

use crate::cli::SecretArgs;

pub mod config;
pub mod mask;
pub mod run;

const READ_BUFFER_SIZE: usize = 8192;

/// Defaults merged with `explicit`, or with the first user config found.
pub fn load_config(explicit: Option<&Path>) -> Result<PipelineConfig> {
    let defaults = PipelineConfig::load_default()?;
    let user_path = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => find_user_config(),
    };
    let user = match user_path {
        Some(path) => {
            info!("Using configuration file {}", path.display());
            Some(PipelineConfig::load_from_file(&path)?)
        }
        None => None,
    };
    Ok(merge_configs(defaults, user))
}

/// Secrets from `--secret` flags followed by those of the secrets file.
pub fn collect_secrets(args: &SecretArgs) -> Result<Vec<(String, String)>> {
    let mut secrets = args.secrets.clone();
    if let Some(path) = &args.secrets_file {
        let entries = dotenvy::from_path_iter(path)
            .with_context(|| format!("Failed to open secrets file {}", path.display()))?;
        for entry in entries {
            let (name, value) =
                entry.with_context(|| format!("Failed to parse secrets file {}", path.display()))?;
            secrets.push((name, value));
        }
    }
    debug!("Loaded {} secrets", secrets.len());
    Ok(secrets)
}

/// Copies `reader` into a stream stage chunk by chunk until EOF.
pub async fn pump<R: AsyncRead + Unpin>(mut reader: R, tx: mpsc::Sender<StreamCommand>) -> Result<u64> {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).await.context("Failed to read input")?;
        if n == 0 {
            return Ok(total);
        }
        total += n as u64;
        tx.send(StreamCommand::Data(buf[..n].to_vec()))
            .await
            .context("Log stream closed while reading input")?;
    }
}
