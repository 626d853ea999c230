//! stream/mod.rs - Stream stages and the task that drives them.
//!
//! A stage implements [`ChunkTransform`]: a synchronous state machine that turns
//! incoming chunks into output text and exposes the next instant at which it
//! wants to flush on its own. [`spawn_transform`] confines a stage to a tokio
//! task which owns its buffer outright, so chunk arrival and deadline flushes
//! never race.
//!
//! License: MIT OR APACHE 2.0

use log::{debug, error};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::errors::SteplogError;
use crate::writer::PipelineEvent;

pub mod chunk_buffer;
pub mod masking;
pub mod timestamp;

pub use chunk_buffer::{Chunk, ChunkBuffer, Utf8Decoder};
pub use masking::MaskingTransform;
pub use timestamp::TimestampTransform;

/// Messages flowing between stages.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamCommand {
    Data(Vec<u8>),
    AddMask { name: String, value: String },
    End,
}

/// A buffering text transform driven by chunks, deadlines and end-of-stream.
pub trait ChunkTransform: Send + 'static {
    /// Short name used when reporting errors.
    fn stage(&self) -> &'static str;

    fn on_chunk(&mut self, data: &[u8], now: Instant) -> String;

    /// Called once `next_deadline()` has passed.
    fn on_deadline(&mut self, now: Instant) -> String;

    /// Flushes everything still held. Called exactly once.
    fn on_end(&mut self) -> String;

    fn next_deadline(&self) -> Option<Instant>;

    fn add_mask(&mut self, _name: &str, _value: &str) -> Result<(), SteplogError> {
        Ok(())
    }
}

/// Input side of a running stage.
pub struct StreamHandle {
    tx: mpsc::Sender<StreamCommand>,
    task: JoinHandle<Result<(), SteplogError>>,
}

impl StreamHandle {
    pub async fn write(&self, data: impl Into<Vec<u8>>) -> Result<(), SteplogError> {
        self.tx
            .send(StreamCommand::Data(data.into()))
            .await
            .map_err(|_| SteplogError::ChannelClosed("stream input"))
    }

    pub async fn add_mask(&self, name: &str, value: &str) -> Result<(), SteplogError> {
        self.tx
            .send(StreamCommand::AddMask {
                name: name.to_string(),
                value: value.to_string(),
            })
            .await
            .map_err(|_| SteplogError::ChannelClosed("stream input"))
    }

    pub fn sender(&self) -> mpsc::Sender<StreamCommand> {
        self.tx.clone()
    }

    /// Signals end-of-stream and waits until the stage has flushed downstream.
    pub async fn end(self) -> Result<(), SteplogError> {
        // A stage that already stopped reports its own error through the join.
        let _ = self.tx.send(StreamCommand::End).await;
        drop(self.tx);
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(SteplogError::Fatal(format!("stream task failed: {}", e))),
        }
    }
}

/// Runs `transform` on its own task, forwarding output to `downstream`.
///
/// Stage failures are reported on `events` as [`PipelineEvent::StreamError`]
/// and returned from [`StreamHandle::end`].
pub fn spawn_transform<T: ChunkTransform>(
    transform: T,
    downstream: mpsc::Sender<StreamCommand>,
    events: Option<broadcast::Sender<PipelineEvent>>,
    capacity: usize,
) -> StreamHandle {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let task = tokio::spawn(run_transform(transform, rx, downstream, events));
    StreamHandle { tx, task }
}

/// Stand-in deadline for a disabled timer branch.
pub(crate) fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}

async fn run_transform<T: ChunkTransform>(
    mut transform: T,
    mut rx: mpsc::Receiver<StreamCommand>,
    downstream: mpsc::Sender<StreamCommand>,
    events: Option<broadcast::Sender<PipelineEvent>>,
) -> Result<(), SteplogError> {
    let stage = transform.stage();
    debug!("Stream stage '{}' started", stage);

    let result = drive(&mut transform, &mut rx, &downstream).await;
    match &result {
        Ok(()) => debug!("Stream stage '{}' finished", stage),
        Err(e) => {
            error!("Stream stage '{}' failed: {}", stage, e);
            if let Some(events) = &events {
                let _ = events.send(PipelineEvent::StreamError {
                    stage,
                    message: e.to_string(),
                });
            }
        }
    }
    result
}

async fn drive<T: ChunkTransform>(
    transform: &mut T,
    rx: &mut mpsc::Receiver<StreamCommand>,
    downstream: &mpsc::Sender<StreamCommand>,
) -> Result<(), SteplogError> {
    loop {
        let deadline = transform.next_deadline();
        tokio::select! {
            command = rx.recv() => match command {
                Some(StreamCommand::Data(bytes)) => {
                    let out = transform.on_chunk(&bytes, Instant::now());
                    forward(downstream, out).await?;
                }
                Some(StreamCommand::AddMask { name, value }) => {
                    transform.add_mask(&name, &value)?;
                }
                Some(StreamCommand::End) | None => {
                    let out = transform.on_end();
                    forward(downstream, out).await?;
                    return downstream
                        .send(StreamCommand::End)
                        .await
                        .map_err(|_| SteplogError::ChannelClosed("stream downstream"));
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(far_future)), if deadline.is_some() => {
                let out = transform.on_deadline(Instant::now());
                forward(downstream, out).await?;
            }
        }
    }
}

async fn forward(downstream: &mpsc::Sender<StreamCommand>, out: String) -> Result<(), SteplogError> {
    if out.is_empty() {
        return Ok(());
    }
    downstream
        .send(StreamCommand::Data(out.into_bytes()))
        .await
        .map_err(|_| SteplogError::ChannelClosed("stream downstream"))
}
