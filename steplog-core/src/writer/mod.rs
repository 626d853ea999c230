//! writer/mod.rs - The rate-limited batch writer.
//!
//! `BatchWriterService` owns the batch, the rate window and the deferred write
//! queue; `WriterHandle` is the cloneable front end producers talk to. All
//! state lives on the service task, and sink calls are awaited there, so a
//! write that arrives while a flush is in flight waits in the channel and joins
//! the next batch.
//!
//! A batch is flushed when it reaches `batch_size` entries, when it becomes
//! older than `flush_time_limit`, when `debounce_delay` passes without a
//! write, or when a write would exceed the per-time-unit byte budget. In the
//! last case the write itself is deferred until the window expires and is
//! retried from an explicit, bounded queue.
//!
//! License: MIT OR APACHE 2.0

use log::{debug, info, warn};
use serde::Serialize;
use serde_json::value::RawValue;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::config::WriterSettings;
use crate::errors::{SinkError, SteplogError};
use crate::sink::LogSink;
use crate::stream::far_future;

pub mod batch;
pub mod window;

pub use batch::{Batch, BatchEntry};
pub use window::RateWindow;

const EVENT_CAPACITY: usize = 256;

/// Signals published by the writer and the stream stages feeding it.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A flush attempt is starting.
    WriteCalls,
    /// A flush attempt completed; `bytes` is the size of the batch handed over.
    Flush {
        error: Option<Arc<SinkError>>,
        bytes: usize,
    },
    /// A stream stage stopped on an error.
    StreamError { stage: &'static str, message: String },
}

/// Result of a flush: the bytes written, or the sink failure.
pub type FlushOutcome = Result<usize, Arc<SinkError>>;

/// Running counters, published after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub records_accepted: u64,
    pub flush_attempts: u64,
    pub failed_flushes: u64,
    pub bytes_flushed: u64,
    pub entries_flushed: u64,
    pub records_deferred: u64,
    /// Current length of the deferred queue.
    pub deferred_pending: usize,
    /// Current number of entries waiting in the batch.
    pub batch_len: usize,
}

#[derive(Debug)]
pub struct PendingWrite {
    destination: String,
    value: Box<RawValue>,
}

impl PendingWrite {
    fn size(&self) -> usize {
        self.value.get().len()
    }
}

#[derive(Debug)]
pub enum WriterCommand {
    Write(PendingWrite),
    Flush(oneshot::Sender<FlushOutcome>),
    Discard(oneshot::Sender<usize>),
    Close(oneshot::Sender<FlushOutcome>),
}

#[derive(Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<WriterCommand>,
    events: broadcast::Sender<PipelineEvent>,
    stats: watch::Receiver<WriterStats>,
}

impl WriterHandle {
    /// Serializes `record` and queues it for `destination`.
    ///
    /// Suspends while the writer's deferred queue is full.
    pub async fn write<T: Serialize + ?Sized>(&self, destination: &str, record: &T) -> Result<(), SteplogError> {
        let value = serde_json::value::to_raw_value(record)?;
        self.write_raw(destination, value).await
    }

    pub async fn write_raw(&self, destination: &str, value: Box<RawValue>) -> Result<(), SteplogError> {
        self.tx
            .send(WriterCommand::Write(PendingWrite {
                destination: destination.to_string(),
                value,
            }))
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer"))
    }

    /// Pushes every queued and deferred record to the sink, waiting out rate
    /// windows as needed. Returns the bytes written by the final flush.
    pub async fn flush(&self) -> Result<usize, SteplogError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Flush(response_tx))
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer"))?;
        let outcome = response_rx
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer flush response"))?;
        outcome.map_err(SteplogError::Sink)
    }

    /// Drops the current batch, typically after a failed flush the caller does
    /// not want to retry. Returns the number of entries dropped.
    pub async fn discard_batch(&self) -> Result<usize, SteplogError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Discard(response_tx))
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer"))?;
        response_rx
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer discard response"))
    }

    /// Flushes everything and stops the service.
    pub async fn close(&self) -> Result<usize, SteplogError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(WriterCommand::Close(response_tx))
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer"))?;
        let outcome = response_rx
            .await
            .map_err(|_| SteplogError::ChannelClosed("writer close response"))?;
        outcome.map_err(SteplogError::Sink)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    /// Sender for stages that report into the writer's event stream.
    pub fn event_sender(&self) -> broadcast::Sender<PipelineEvent> {
        self.events.clone()
    }

    pub fn stats(&self) -> WriterStats {
        self.stats.borrow().clone()
    }

    /// Change notifications for the counters.
    pub fn watch_stats(&self) -> watch::Receiver<WriterStats> {
        self.stats.clone()
    }
}

pub struct BatchWriterService {
    sink: Arc<dyn LogSink>,
    settings: WriterSettings,
    rx: mpsc::Receiver<WriterCommand>,
    events: broadcast::Sender<PipelineEvent>,
    stats_tx: watch::Sender<WriterStats>,
    stats: WriterStats,
    batch: Batch,
    window: RateWindow,
    deferred: VecDeque<PendingWrite>,
    debounce_at: Option<Instant>,
    /// Deadline from the age of the current batch, armed by its first record.
    age_limit_at: Option<Instant>,
    retry_at: Option<Instant>,
    /// Window start the bytes of a batch kept after a failed flush were last
    /// charged to.
    retained_window: Option<Instant>,
}

impl BatchWriterService {
    pub fn new(sink: Arc<dyn LogSink>, settings: WriterSettings) -> (Self, WriterHandle) {
        let (tx, rx) = mpsc::channel(settings.channel_capacity);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (stats_tx, stats_rx) = watch::channel(WriterStats::default());
        let window = RateWindow::new(
            settings.time_unit_limit,
            settings.message_size_limit_per_time_unit,
            Instant::now(),
        );

        let handle = WriterHandle {
            tx,
            events: events.clone(),
            stats: stats_rx,
        };
        let service = Self {
            sink,
            settings,
            rx,
            events,
            stats_tx,
            stats: WriterStats::default(),
            batch: Batch::new(),
            window,
            deferred: VecDeque::new(),
            debounce_at: None,
            age_limit_at: None,
            retry_at: None,
            retained_window: None,
        };
        (service, handle)
    }

    pub async fn run(mut self) {
        info!("Batch writer started for sink '{}'", self.sink.name());

        loop {
            let accepting = self.deferred.len() < self.settings.max_deferred_writes;
            let flush_at = match (self.debounce_at, self.age_limit_at) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let retry_at = self.retry_at.filter(|_| !self.deferred.is_empty());

            tokio::select! {
                command = self.rx.recv(), if accepting => match command {
                    Some(WriterCommand::Write(write)) => self.handle_write(write).await,
                    Some(WriterCommand::Flush(response_tx)) => {
                        let outcome = self.flush_all().await;
                        if response_tx.send(outcome).is_err() {
                            debug!("Flush requester went away before the response");
                        }
                    }
                    Some(WriterCommand::Discard(response_tx)) => {
                        let dropped = self.batch.len();
                        self.batch.clear();
                        self.debounce_at = None;
                        self.age_limit_at = None;
                        self.retained_window = None;
                        warn!("Discarded {} unflushed entries", dropped);
                        self.publish_stats();
                        let _ = response_tx.send(dropped);
                    }
                    Some(WriterCommand::Close(response_tx)) => {
                        let outcome = self.flush_all().await;
                        let _ = response_tx.send(outcome);
                        break;
                    }
                    None => {
                        debug!("All writer handles dropped");
                        let _ = self.flush_all().await;
                        break;
                    }
                },
                _ = sleep_until(flush_at.unwrap_or_else(far_future)), if flush_at.is_some() => {
                    debug!("Flush timer elapsed with {} entries batched", self.batch.len());
                    let _ = self.flush_batch().await;
                }
                _ = sleep_until(retry_at.unwrap_or_else(far_future)), if retry_at.is_some() => {
                    self.retry_at = None;
                    self.drain_deferred().await;
                }
            }
        }

        info!("Batch writer for sink '{}' stopped", self.sink.name());
    }

    async fn handle_write(&mut self, write: PendingWrite) {
        self.stats.records_accepted += 1;
        if !self.deferred.is_empty() {
            // Keep acceptance order behind records already waiting on the window.
            self.defer_back(write);
        } else if let Err(write) = self.try_write(write, Instant::now()).await {
            self.defer_back(write);
        }
        self.publish_stats();
    }

    /// Accepts `write` into the batch, or hands it back when the window has no
    /// room, after flushing what is already batched.
    async fn try_write(&mut self, write: PendingWrite, now: Instant) -> Result<(), PendingWrite> {
        self.debounce_at = None;
        self.window.refresh(now);
        self.charge_retained();

        let size = write.size();
        if !self.window.admits(size) {
            debug!(
                "Rate window full ({} + {} > {} bytes); deferring",
                self.window.bytes(),
                size,
                self.settings.message_size_limit_per_time_unit
            );
            let _ = self.flush_batch().await;
            self.retry_at = Some(self.window.retry_at());
            return Err(write);
        }

        self.window.record(size);
        let key = self.sink.push_key(&write.destination);
        self.batch.push(
            BatchEntry {
                key,
                destination: write.destination,
                value: write.value,
            },
            now,
        );

        if self.batch.len() < self.settings.batch_size && self.batch.age(now) < self.settings.flush_time_limit {
            self.debounce_at = Some(now + self.settings.debounce_delay);
            if self.age_limit_at.is_none() {
                self.age_limit_at = self.batch.started_at().map(|t| t + self.settings.flush_time_limit);
            }
        } else {
            let _ = self.flush_batch().await;
        }
        Ok(())
    }

    fn defer_back(&mut self, write: PendingWrite) {
        self.deferred.push_back(write);
        self.stats.records_deferred += 1;
    }

    /// Retries deferred writes in order until one is refused again.
    async fn drain_deferred(&mut self) {
        let now = Instant::now();
        while let Some(write) = self.deferred.pop_front() {
            if let Err(write) = self.try_write(write, now).await {
                self.deferred.push_front(write);
                break;
            }
        }
        self.publish_stats();
    }

    /// Waits out as many rate windows as the deferred queue needs, then flushes.
    async fn flush_all(&mut self) -> FlushOutcome {
        while !self.deferred.is_empty() {
            if let Some(at) = self.retry_at.take() {
                sleep_until(at).await;
            }
            self.drain_deferred().await;
        }
        self.flush_batch().await
    }

    /// Charges a batch kept after a failed flush to the current window once,
    /// so resent bytes count against the window they are sent in.
    fn charge_retained(&mut self) {
        let Some(charged) = self.retained_window else {
            return;
        };
        if self.window.start() != charged {
            debug!("Charging {} retained bytes to the new rate window", self.batch.bytes());
            self.window.record(self.batch.bytes());
            self.retained_window = Some(self.window.start());
        }
    }

    /// Hands the whole batch to the sink in one call. The batch is cleared only
    /// when the sink accepted it.
    async fn flush_batch(&mut self) -> FlushOutcome {
        self.debounce_at = None;
        self.age_limit_at = None;
        if self.batch.is_empty() {
            return Ok(0);
        }
        self.window.refresh(Instant::now());
        self.charge_retained();

        let bytes = self.batch.bytes();
        let entries = self.batch.len();
        self.emit(PipelineEvent::WriteCalls);
        self.stats.flush_attempts += 1;

        let result = self.sink.update(&self.batch).await;
        let outcome = match result {
            Ok(()) => {
                debug!("Flushed {} entries ({} bytes) to '{}'", entries, bytes, self.sink.name());
                self.batch.clear();
                self.retained_window = None;
                self.stats.bytes_flushed += bytes as u64;
                self.stats.entries_flushed += entries as u64;
                self.emit(PipelineEvent::Flush { error: None, bytes });
                Ok(bytes)
            }
            Err(e) => {
                warn!("Sink '{}' failed to write {} entries: {}", self.sink.name(), entries, e);
                let error = Arc::new(e);
                self.retained_window = Some(self.window.start());
                self.stats.failed_flushes += 1;
                self.emit(PipelineEvent::Flush {
                    error: Some(Arc::clone(&error)),
                    bytes,
                });
                Err(error)
            }
        };
        self.publish_stats();
        outcome
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn publish_stats(&mut self) {
        self.stats.deferred_pending = self.deferred.len();
        self.stats.batch_len = self.batch.len();
        self.stats_tx.send_replace(self.stats.clone());
    }
}

/// Creates a writer and runs it on a new task.
pub fn spawn_writer(sink: Arc<dyn LogSink>, settings: WriterSettings) -> (WriterHandle, JoinHandle<()>) {
    let (service, handle) = BatchWriterService::new(sink, settings);
    let task = tokio::spawn(service.run());
    (handle, task)
}
