// steplog/src/commands/run.rs
//! `steplog run`: executes a command as one step of a task.
//!
//! The child's stdout and stderr are both pumped into the step's log stream.
//! Flushed batches go to a JSON-lines sink; the step and task statuses follow
//! the child's exit status.

use anyhow::{Context, Result};
use is_terminal::IsTerminal;
use log::{debug, info, warn};
use owo_colors::OwoColorize;
use std::io::Write;
use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command;

use steplog_core::config::DEFAULT_CHANNEL_CAPACITY;
use steplog_core::{
    spawn_writer, JsonLinesSink, Layout, LogSink, StepStatus, StepSummary, StreamSettings, TaskLogger,
    WriterSettings, WriterStats,
};

use crate::cli::RunCommand;
use crate::commands::{collect_secrets, load_config, pump};

/// Exit code reported when the command could not be started.
pub const SPAWN_FAILURE_EXIT_CODE: i32 = 127;

pub async fn run_command(cmd: RunCommand, quiet: bool) -> Result<i32> {
    let config = load_config(cmd.config.as_deref())?;
    let writer_settings = WriterSettings::from_config(&config.writer)?;
    let mut stream_settings = StreamSettings::from_config(&config.stream)?;
    if cmd.no_timestamps {
        stream_settings.timestamps = false;
    }
    let layout = Layout::from_config(&config.layout)?;
    let secrets = collect_secrets(&cmd.secrets)?;

    let sink: Arc<dyn LogSink> = match &cmd.output {
        Some(path) => Arc::new(
            JsonLinesSink::create(path)
                .await
                .with_context(|| format!("Failed to open output file {}", path.display()))?,
        ),
        None => Arc::new(JsonLinesSink::stdout()),
    };
    let (writer, writer_task) = spawn_writer(sink, writer_settings);

    let mut task = TaskLogger::new(&cmd.task_id, writer.clone(), secrets, layout, stream_settings)
        .with_channel_capacity(config.writer.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY));
    task.set_status(StepStatus::Running).await?;
    let step = task.create_step(&cmd.step)?;
    step.set_status(StepStatus::Running).await?;

    let (program, args) = cmd
        .command
        .split_first()
        .context("No command given to run")?;
    info!("Running '{}' as step '{}' of task '{}'", program, cmd.step, cmd.task_id);

    let spawned = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn();

    let (status, exit_code) = match spawned {
        Ok(mut child) => {
            let stdout = child.stdout.take().context("Child stdout was not captured")?;
            let stderr = child.stderr.take().context("Child stderr was not captured")?;
            let out_pump = tokio::spawn(pump(stdout, step.log_sender()));
            let err_pump = tokio::spawn(pump(stderr, step.log_sender()));

            let exit = child.wait().await.context("Failed to wait for the command")?;
            let out_bytes = out_pump.await.context("stdout reader panicked")??;
            let err_bytes = err_pump.await.context("stderr reader panicked")??;
            debug!("Captured {} stdout and {} stderr bytes", out_bytes, err_bytes);

            let code = exit.code().unwrap_or(1);
            let status = if exit.success() { StepStatus::Success } else { StepStatus::Error };
            (status, code)
        }
        Err(e) => {
            warn!("Failed to start '{}': {}", program, e);
            step.write(format!("steplog: failed to start '{}': {}\n", program, e))
                .await?;
            (StepStatus::Error, SPAWN_FAILURE_EXIT_CODE)
        }
    };

    let summary = step.finish(status).await?;
    let finish_result = task.finish(status).await;
    let close_result = writer.close().await;
    let stats = writer.stats();
    writer_task.await.context("Writer task panicked")?;

    if !quiet {
        print_summary(&summary, &stats)?;
    }
    finish_result?;
    close_result?;
    Ok(exit_code)
}

fn print_summary(summary: &StepSummary, stats: &WriterStats) -> Result<()> {
    let mut stderr = std::io::stderr().lock();
    let color = std::io::stderr().is_terminal();
    let status = summary.status.to_string();
    let status = if !color {
        status
    } else if summary.status == StepStatus::Success {
        status.green().to_string()
    } else {
        status.red().to_string()
    };

    writeln!(
        stderr,
        "steplog: step '{}' {}: {} log bytes, {} flushes ({} failed), {} entries / {} bytes written",
        summary.name,
        status,
        summary.log_bytes,
        stats.flush_attempts,
        stats.failed_flushes,
        stats.entries_flushed,
        stats.bytes_flushed,
    )?;
    Ok(())
}
