// steplog-core/src/lib.rs
//! # steplog Core Library
//!
//! `steplog-core` is the streaming half of steplog: it takes raw process output
//! for the steps of a task, masks secrets in it, stamps each line with the time,
//! and hands the result to a batching writer that keeps sink traffic inside a
//! byte budget per time unit.
//!
//! ## Modules
//!
//! * `config`: YAML configuration, merging and validated settings.
//! * `stream`: the chunk buffer and the masking and timestamp stages.
//! * `writer`: the rate-limited batch writer and its events.
//! * `sink`: the `LogSink` trait and the bundled memory and JSON-lines sinks.
//! * `task`: task and step controllers that wire the stages to the writer.
//! * `fingerprint`: log-safe identifiers for secrets.
//! * `errors`: the crate error types.
//!
//! ## Public API
//!
//! **Configuration**
//!
//! * [`PipelineConfig`]: loading, merging ([`merge_configs`]) and serializing configuration.
//! * [`StreamSettings`] and [`WriterSettings`]: validated settings built from it.
//!
//! **Pipeline**
//!
//! * [`MaskingTransform`], [`TimestampTransform`]: the stream stages.
//! * [`spawn_transform`]: runs a stage on its own task.
//! * [`spawn_writer`] / [`BatchWriterService`]: the writer, driven through a [`WriterHandle`].
//! * [`PipelineEvent`]: `WriteCalls`, `Flush` and `StreamError` notifications.
//!
//! **Controllers**
//!
//! * [`TaskLogger`] and [`StepLogger`].
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use steplog_core::{
//!     spawn_writer, Layout, MemorySink, PipelineConfig, StepStatus, StreamSettings, TaskLogger,
//!     WriterSettings,
//! };
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = PipelineConfig::load_default()?;
//! let sink = Arc::new(MemorySink::new());
//! let (writer, _task) = spawn_writer(sink.clone(), WriterSettings::from_config(&config.writer)?);
//!
//! let mut task = TaskLogger::new(
//!     "task-1",
//!     writer,
//!     vec![("TOKEN".to_string(), "s3cr3t".to_string())],
//!     Layout::from_config(&config.layout)?,
//!     StreamSettings::from_config(&config.stream)?,
//! );
//! let step = task.create_step("build")?;
//! step.set_status(StepStatus::Running).await?;
//! step.write("using s3cr3t\n").await?;
//! step.finish(StepStatus::Success).await?;
//! task.finish(StepStatus::Success).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ---
//! License: MIT OR APACHE 2.0

pub mod config;
pub mod errors;
pub mod fingerprint;
pub mod sink;
pub mod stream;
pub mod task;
pub mod writer;

/// Re-exports configuration types and loaders.
pub use config::{
    config_candidate_paths,
    find_user_config,
    merge_configs,
    LayoutConfig,
    PipelineConfig,
    StreamConfig,
    StreamSettings,
    WriterConfig,
    WriterSettings,
};

pub use errors::{SinkError, SteplogError};

pub use sink::{JsonLinesSink, LogSink, MemorySink};

pub use stream::{spawn_transform, ChunkTransform, MaskingTransform, StreamCommand, StreamHandle, TimestampTransform};

pub use task::{Layout, StepDestinations, StepLogger, StepStatus, StepSummary, TaskLogger};

pub use writer::{
    spawn_writer,
    Batch,
    BatchEntry,
    BatchWriterService,
    FlushOutcome,
    PipelineEvent,
    WriterHandle,
    WriterStats,
};

/// Re-exports the secret masker so callers need only this crate.
pub use steplog_mask::{Mask, MaskSet, PLACEHOLDER};
