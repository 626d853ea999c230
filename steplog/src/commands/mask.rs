// steplog/src/commands/mask.rs
//! `steplog mask`: the masking stage on its own, stdin to stdout.

use anyhow::{Context, Result};
use log::info;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use steplog_core::{spawn_transform, MaskSet, MaskingTransform, StreamCommand, StreamSettings};

use crate::cli::MaskCommand;
use crate::commands::{collect_secrets, load_config, pump};

const CHANNEL_CAPACITY: usize = 64;

pub async fn mask_command(cmd: MaskCommand) -> Result<()> {
    let config = load_config(cmd.config.as_deref())?;
    let settings = StreamSettings::from_config(&config.stream)?;
    let secrets = collect_secrets(&cmd.secrets)?;
    let masks = MaskSet::from_blacklist(secrets).context("Failed to build mask set")?;
    info!("Masking stdin with {} masks", masks.len());

    let (out_tx, mut out_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let stage = spawn_transform(MaskingTransform::new(masks, &settings), out_tx, None, CHANNEL_CAPACITY);

    let printer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(command) = out_rx.recv().await {
            match command {
                StreamCommand::Data(bytes) => {
                    stdout.write_all(&bytes).await?;
                    stdout.flush().await?;
                }
                StreamCommand::End => break,
                StreamCommand::AddMask { .. } => {}
            }
        }
        Ok::<(), std::io::Error>(())
    });

    pump(tokio::io::stdin(), stage.sender()).await?;
    stage.end().await?;
    printer
        .await
        .context("Output task panicked")?
        .context("Failed to write to stdout")?;
    Ok(())
}
