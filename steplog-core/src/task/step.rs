//! step.rs - One step's log pipeline, status and resource metrics.
//!
//! A `StepLogger` owns the stream stages for its log (masking, then optionally
//! timestamps) and a forwarding task that hands their output to the writer.
//! Status and metric updates bypass the streams and go straight to the writer.
//!
//! License: MIT OR APACHE 2.0

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;

use steplog_mask::MaskSet;

use crate::config::StreamSettings;
use crate::errors::SteplogError;
use crate::stream::{spawn_transform, MaskingTransform, StreamCommand, StreamHandle, TimestampTransform};
use crate::task::layout::StepDestinations;
use crate::task::status::StepStatus;
use crate::writer::WriterHandle;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MemorySample {
    pub time: DateTime<Utc>,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CpuSample {
    pub time: DateTime<Utc>,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DiskSample {
    pub time: DateTime<Utc>,
    pub used: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize)]
struct StatusRecord<'a> {
    status: StepStatus,
    step: &'a str,
    time: DateTime<Utc>,
}

/// What a finished step reports back.
#[derive(Debug, Clone, PartialEq)]
pub struct StepSummary {
    pub name: String,
    pub status: StepStatus,
    /// Bytes of (masked, stamped) log text handed to the writer.
    pub log_bytes: u64,
}

pub struct StepLogger {
    name: String,
    destinations: StepDestinations,
    writer: WriterHandle,
    status: Mutex<StepStatus>,
    stages: Vec<StreamHandle>,
    forwarder: JoinHandle<Result<u64, SteplogError>>,
    /// Resolved by `finish`; dropping the step resolves it as well.
    done: oneshot::Sender<()>,
}

impl StepLogger {
    pub(crate) fn start(
        name: &str,
        destinations: StepDestinations,
        masks: MaskSet,
        settings: &StreamSettings,
        writer: WriterHandle,
        capacity: usize,
        done: oneshot::Sender<()>,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::channel(capacity);
        let forwarder = tokio::spawn(forward_logs(out_rx, writer.clone(), destinations.logs.clone()));
        let events = Some(writer.event_sender());

        // Stages are spawned back to front so each gets its downstream sender.
        let mut stages = Vec::with_capacity(2);
        let masking_downstream = if settings.timestamps {
            let stamps = spawn_transform(TimestampTransform::new(settings), out_tx, events.clone(), capacity);
            let tx = stamps.sender();
            stages.push(stamps);
            tx
        } else {
            out_tx
        };
        let masking = spawn_transform(
            MaskingTransform::new(masks, settings),
            masking_downstream,
            events,
            capacity,
        );
        stages.insert(0, masking);

        debug!("Step '{}' logging to {}", name, destinations.logs);
        Self {
            name: name.to_string(),
            destinations,
            writer,
            status: Mutex::new(StepStatus::Pending),
            stages,
            forwarder,
            done,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn destinations(&self) -> &StepDestinations {
        &self.destinations
    }

    pub async fn status(&self) -> StepStatus {
        *self.status.lock().await
    }

    /// Feeds raw process output into the step's log.
    pub async fn write(&self, chunk: impl Into<Vec<u8>>) -> Result<(), SteplogError> {
        self.input().write(chunk).await
    }

    /// A sender for feeding log chunks from several tasks at once.
    pub fn log_sender(&self) -> mpsc::Sender<StreamCommand> {
        self.input().sender()
    }

    pub async fn add_mask(&self, name: &str, value: &str) -> Result<(), SteplogError> {
        self.input().add_mask(name, value).await
    }

    fn input(&self) -> &StreamHandle {
        // `start` always creates the masking stage first.
        &self.stages[0]
    }

    pub async fn set_status(&self, next: StepStatus) -> Result<(), SteplogError> {
        let mut status = self.status.lock().await;
        *status = status.transition(&self.name, next)?;
        info!("Step '{}' is now {}", self.name, next);
        self.writer
            .write(&self.destinations.status, &StatusRecord {
                status: next,
                step: &self.name,
                time: Utc::now(),
            })
            .await
    }

    pub async fn update_memory_usage(&self, time: DateTime<Utc>, bytes: u64) -> Result<(), SteplogError> {
        self.writer.write(&self.destinations.memory, &MemorySample { time, bytes }).await
    }

    pub async fn update_cpu_usage(&self, time: DateTime<Utc>, percent: f64) -> Result<(), SteplogError> {
        self.writer.write(&self.destinations.cpu, &CpuSample { time, percent }).await
    }

    pub async fn update_disk_state(&self, time: DateTime<Utc>, used: u64, total: u64) -> Result<(), SteplogError> {
        self.writer.write(&self.destinations.disk, &DiskSample { time, used, total }).await
    }

    pub async fn set_log_size(&self, bytes: u64) -> Result<(), SteplogError> {
        self.writer.write(&self.destinations.log_size, &bytes).await
    }

    /// Ends the log stream, waits for every stage to drain into the writer,
    /// records the final log size and moves to `status`.
    ///
    /// A stage failure is returned after the status has been recorded.
    pub async fn finish(self, status: StepStatus) -> Result<StepSummary, SteplogError> {
        let mut stream_result = Ok(());
        for stage in self.stages {
            if let Err(e) = stage.end().await {
                if stream_result.is_ok() {
                    stream_result = Err(e);
                }
            }
        }

        let forwarded = match self.forwarder.await {
            Ok(result) => result,
            Err(e) => Err(SteplogError::Fatal(format!("log forwarder failed: {}", e))),
        };
        let log_bytes = match &forwarded {
            Ok(bytes) => {
                self.writer.write(&self.destinations.log_size, bytes).await?;
                *bytes
            }
            Err(e) => {
                warn!("Step '{}' log forwarding failed: {}", self.name, e);
                0
            }
        };

        let final_status = {
            let mut current = self.status.lock().await;
            *current = current.transition(&self.name, status)?;
            *current
        };
        self.writer
            .write(&self.destinations.status, &StatusRecord {
                status: final_status,
                step: &self.name,
                time: Utc::now(),
            })
            .await?;
        info!("Step '{}' finished as {} ({} log bytes)", self.name, final_status, log_bytes);
        let _ = self.done.send(());

        forwarded?;
        stream_result.map(|()| StepSummary {
            name: self.name,
            status: final_status,
            log_bytes,
        })
    }
}

/// Writes every output chunk of the last stage to the writer as a string
/// record. Returns the number of bytes forwarded.
async fn forward_logs(
    mut rx: mpsc::Receiver<StreamCommand>,
    writer: WriterHandle,
    destination: String,
) -> Result<u64, SteplogError> {
    let mut total = 0u64;
    while let Some(command) = rx.recv().await {
        match command {
            StreamCommand::Data(bytes) => {
                let text = match String::from_utf8(bytes) {
                    Ok(text) => text,
                    Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
                };
                total += text.len() as u64;
                writer.write(&destination, &text).await?;
            }
            StreamCommand::End => break,
            StreamCommand::AddMask { .. } => {}
        }
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriterSettings;
    use crate::sink::MemorySink;
    use crate::writer::spawn_writer;
    use std::sync::Arc;
    use std::time::Duration;

    fn destinations() -> StepDestinations {
        let at = |leaf: &str| format!("t/steps/s/{}", leaf);
        StepDestinations {
            logs: at("logs"),
            status: at("status"),
            log_size: at("log_size"),
            memory: at("metrics/memory"),
            cpu: at("metrics/cpu"),
            disk: at("metrics/disk"),
        }
    }

    fn settings() -> WriterSettings {
        WriterSettings {
            time_unit_limit: Duration::from_millis(1000),
            message_size_limit_per_time_unit: 1_000_000,
            flush_time_limit: Duration::from_millis(1000),
            debounce_delay: Duration::from_millis(50),
            batch_size: 100,
            max_deferred_writes: 16,
            channel_capacity: 16,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarder_failure_still_records_final_status() {
        let sink = Arc::new(MemorySink::new());
        let (writer, _task) = spawn_writer(sink.clone(), settings());
        let (done_tx, done_rx) = oneshot::channel();
        let step = StepLogger {
            name: "s".to_string(),
            destinations: destinations(),
            writer: writer.clone(),
            status: Mutex::new(StepStatus::Running),
            stages: Vec::new(),
            forwarder: tokio::spawn(async { Err(SteplogError::ChannelClosed("writer")) }),
            done: done_tx,
        };

        let err = step.finish(StepStatus::Error).await.unwrap_err();
        assert!(matches!(err, SteplogError::ChannelClosed("writer")));
        assert!(done_rx.await.is_ok());

        writer.flush().await.unwrap();
        let statuses = sink.values("t/steps/s/status").await;
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0]["status"], "error");
        assert!(sink.values("t/steps/s/log_size").await.is_empty());
    }
}
