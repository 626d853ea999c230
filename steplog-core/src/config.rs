//! Configuration management for `steplog-core`.
//!
//! This module defines the serializable configuration for the streaming pipeline
//! (`StreamConfig`, `WriterConfig`, `LayoutConfig`) and the validated settings the
//! runtime components are built from. It handles YAML loading, merging a user
//! file over the embedded defaults, and locating a user configuration on disk.
//!
//! License: MIT OR Apache-2.0

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::SteplogError;

/// Per-chunk flush deadline used when none is configured.
pub const DEFAULT_CHUNK_FLUSH_TIMEOUT_MS: u64 = 200;
/// Slot size used when redistributing a withheld tail across buffered chunks.
pub const DEFAULT_CHUNK_SIZE: usize = 100;
/// Longest time an item may sit in a batch before a write forces a flush.
pub const DEFAULT_FLUSH_TIME_LIMIT_MS: u64 = 1000;
/// Capacity of the deferred (rate-limited) write queue.
pub const DEFAULT_MAX_DEFERRED_WRITES: usize = 1024;
/// Capacity of the command channels feeding streams and the writer.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;
/// Smallest slot that can always hold one UTF-8 character.
pub const MIN_CHUNK_SIZE: usize = 4;

/// Settings for the masking and timestamp stream stages.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Milliseconds a buffered chunk may wait before it is force-flushed.
    pub chunk_flush_timeout_ms: Option<u64>,
    /// Slot size in bytes for tail redistribution.
    pub default_chunk_size: Option<usize>,
    /// Whether step logs receive a timestamp prefix per line.
    pub timestamps: Option<bool>,
}

/// Settings for the rate-limited batch writer.
///
/// Every field is optional so a user file can override a subset; the ones
/// without a default are required when building [`WriterSettings`].
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct WriterConfig {
    pub time_unit_limit_ms: Option<u64>,
    pub message_size_limit_per_time_unit: Option<usize>,
    pub flush_time_limit_ms: Option<u64>,
    pub debounce_delay_ms: Option<u64>,
    pub batch_size: Option<usize>,
    pub max_deferred_writes: Option<usize>,
    pub channel_capacity: Option<usize>,
}

/// Destination templates, rendered with `task_id` and `step`.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct LayoutConfig {
    pub task_status: Option<String>,
    pub step_logs: Option<String>,
    pub step_status: Option<String>,
    pub step_log_size: Option<String>,
    pub step_memory: Option<String>,
    pub step_cpu: Option<String>,
    pub step_disk: Option<String>,
}

/// The top-level configuration document.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub stream: StreamConfig,
    pub writer: WriterConfig,
    pub layout: LayoutConfig,
}

impl PipelineConfig {
    /// Loads a configuration from a YAML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading pipeline configuration from: {}", path.display());
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: PipelineConfig = serde_yml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Loads the built-in defaults embedded in the library.
    pub fn load_default() -> Result<Self> {
        debug!("Loading default pipeline configuration from embedded string...");
        let default_yaml = include_str!("../config/default_config.yaml");
        serde_yml::from_str(default_yaml).context("Failed to parse default configuration")
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yml::to_string(self).context("Failed to serialize configuration")
    }
}

/// Merges a user configuration over the defaults, field by field.
pub fn merge_configs(default_config: PipelineConfig, user_config: Option<PipelineConfig>) -> PipelineConfig {
    let Some(user) = user_config else {
        debug!("No user configuration supplied; using defaults.");
        return default_config;
    };

    debug!("Merging user configuration over defaults.");
    let d = default_config;
    PipelineConfig {
        stream: StreamConfig {
            chunk_flush_timeout_ms: user.stream.chunk_flush_timeout_ms.or(d.stream.chunk_flush_timeout_ms),
            default_chunk_size: user.stream.default_chunk_size.or(d.stream.default_chunk_size),
            timestamps: user.stream.timestamps.or(d.stream.timestamps),
        },
        writer: WriterConfig {
            time_unit_limit_ms: user.writer.time_unit_limit_ms.or(d.writer.time_unit_limit_ms),
            message_size_limit_per_time_unit: user
                .writer
                .message_size_limit_per_time_unit
                .or(d.writer.message_size_limit_per_time_unit),
            flush_time_limit_ms: user.writer.flush_time_limit_ms.or(d.writer.flush_time_limit_ms),
            debounce_delay_ms: user.writer.debounce_delay_ms.or(d.writer.debounce_delay_ms),
            batch_size: user.writer.batch_size.or(d.writer.batch_size),
            max_deferred_writes: user.writer.max_deferred_writes.or(d.writer.max_deferred_writes),
            channel_capacity: user.writer.channel_capacity.or(d.writer.channel_capacity),
        },
        layout: LayoutConfig {
            task_status: user.layout.task_status.or(d.layout.task_status),
            step_logs: user.layout.step_logs.or(d.layout.step_logs),
            step_status: user.layout.step_status.or(d.layout.step_status),
            step_log_size: user.layout.step_log_size.or(d.layout.step_log_size),
            step_memory: user.layout.step_memory.or(d.layout.step_memory),
            step_cpu: user.layout.step_cpu.or(d.layout.step_cpu),
            step_disk: user.layout.step_disk.or(d.layout.step_disk),
        },
    }
}

/// Locations searched for a user configuration, most specific first.
pub fn config_candidate_paths() -> Vec<PathBuf> {
    let base_dirs = vec![
        dirs::config_dir().map(|p| p.join("steplog")),
        dirs::home_dir().map(|p| p.join(".steplog")),
        Some(PathBuf::from("/etc/steplog")),
    ];

    base_dirs.into_iter()
        .flatten()
        .map(|dir| dir.join("config.yaml"))
        .collect()
}

/// Returns the first candidate configuration file that exists.
pub fn find_user_config() -> Option<PathBuf> {
    config_candidate_paths().into_iter().find(|p| p.is_file())
}

/// Validated settings for the stream stages.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSettings {
    pub chunk_flush_timeout: Duration,
    pub chunk_size: usize,
    pub timestamps: bool,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            chunk_flush_timeout: Duration::from_millis(DEFAULT_CHUNK_FLUSH_TIMEOUT_MS),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timestamps: true,
        }
    }
}

impl StreamSettings {
    pub fn from_config(config: &StreamConfig) -> Result<Self, SteplogError> {
        let timeout_ms = config.chunk_flush_timeout_ms.unwrap_or(DEFAULT_CHUNK_FLUSH_TIMEOUT_MS);
        if timeout_ms == 0 {
            return Err(SteplogError::InvalidConfig {
                field: "chunk_flush_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }

        let chunk_size = config.default_chunk_size.unwrap_or(DEFAULT_CHUNK_SIZE);
        if chunk_size < MIN_CHUNK_SIZE {
            return Err(SteplogError::InvalidConfig {
                field: "default_chunk_size",
                reason: format!("must be at least {} bytes", MIN_CHUNK_SIZE),
            });
        }

        Ok(Self {
            chunk_flush_timeout: Duration::from_millis(timeout_ms),
            chunk_size,
            timestamps: config.timestamps.unwrap_or(true),
        })
    }
}

/// Validated settings for the batch writer.
#[derive(Debug, Clone, PartialEq)]
pub struct WriterSettings {
    pub time_unit_limit: Duration,
    pub message_size_limit_per_time_unit: usize,
    pub flush_time_limit: Duration,
    pub debounce_delay: Duration,
    pub batch_size: usize,
    pub max_deferred_writes: usize,
    pub channel_capacity: usize,
}

impl WriterSettings {
    /// Builds writer settings, failing when a required field is absent.
    pub fn from_config(config: &WriterConfig) -> Result<Self, SteplogError> {
        let time_unit_limit_ms = config.time_unit_limit_ms
            .ok_or(SteplogError::MissingConfig("time_unit_limit_ms"))?;
        let message_size_limit = config.message_size_limit_per_time_unit
            .ok_or(SteplogError::MissingConfig("message_size_limit_per_time_unit"))?;
        let debounce_delay_ms = config.debounce_delay_ms
            .ok_or(SteplogError::MissingConfig("debounce_delay_ms"))?;
        let batch_size = config.batch_size
            .ok_or(SteplogError::MissingConfig("batch_size"))?;

        positive("time_unit_limit_ms", time_unit_limit_ms)?;
        positive("message_size_limit_per_time_unit", message_size_limit)?;
        positive("batch_size", batch_size)?;

        let max_deferred_writes = config.max_deferred_writes.unwrap_or(DEFAULT_MAX_DEFERRED_WRITES);
        positive("max_deferred_writes", max_deferred_writes)?;
        let channel_capacity = config.channel_capacity.unwrap_or(DEFAULT_CHANNEL_CAPACITY);
        positive("channel_capacity", channel_capacity)?;

        Ok(Self {
            time_unit_limit: Duration::from_millis(time_unit_limit_ms),
            message_size_limit_per_time_unit: message_size_limit,
            flush_time_limit: Duration::from_millis(
                config.flush_time_limit_ms.unwrap_or(DEFAULT_FLUSH_TIME_LIMIT_MS),
            ),
            debounce_delay: Duration::from_millis(debounce_delay_ms),
            batch_size,
            max_deferred_writes,
            channel_capacity,
        })
    }
}

fn positive<T: Default + PartialEq>(field: &'static str, value: T) -> Result<(), SteplogError> {
    if value == T::default() {
        return Err(SteplogError::InvalidConfig {
            field,
            reason: "must be greater than 0".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_builds_settings() {
        let config = PipelineConfig::load_default().unwrap();
        let stream = StreamSettings::from_config(&config.stream).unwrap();
        assert_eq!(stream, StreamSettings::default());

        let writer = WriterSettings::from_config(&config.writer).unwrap();
        assert_eq!(writer.flush_time_limit, Duration::from_millis(1000));
        assert_eq!(writer.batch_size, 100);
    }

    #[test]
    fn test_missing_required_writer_field_is_fatal() {
        let config = WriterConfig {
            time_unit_limit_ms: Some(1000),
            message_size_limit_per_time_unit: Some(1024),
            debounce_delay_ms: Some(10),
            ..Default::default()
        };
        let err = WriterSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, SteplogError::MissingConfig("batch_size")));
    }

    #[test]
    fn test_flush_time_limit_defaults_when_absent() {
        let config = WriterConfig {
            time_unit_limit_ms: Some(1000),
            message_size_limit_per_time_unit: Some(1024),
            debounce_delay_ms: Some(10),
            batch_size: Some(5),
            ..Default::default()
        };
        let settings = WriterSettings::from_config(&config).unwrap();
        assert_eq!(settings.flush_time_limit, Duration::from_millis(DEFAULT_FLUSH_TIME_LIMIT_MS));
        assert_eq!(settings.max_deferred_writes, DEFAULT_MAX_DEFERRED_WRITES);
    }

    #[test]
    fn test_time_unit_is_checked_at_full_width() {
        let config = WriterConfig {
            time_unit_limit_ms: Some(1 << 32),
            message_size_limit_per_time_unit: Some(1024),
            debounce_delay_ms: Some(10),
            batch_size: Some(5),
            ..Default::default()
        };
        let settings = WriterSettings::from_config(&config).unwrap();
        assert_eq!(settings.time_unit_limit, Duration::from_millis(1 << 32));

        let zero = WriterConfig { time_unit_limit_ms: Some(0), ..config };
        let err = WriterSettings::from_config(&zero).unwrap_err();
        assert!(matches!(err, SteplogError::InvalidConfig { field: "time_unit_limit_ms", .. }));
    }

    #[test]
    fn test_tiny_chunk_size_rejected() {
        let config = StreamConfig { default_chunk_size: Some(2), ..Default::default() };
        assert!(StreamSettings::from_config(&config).is_err());
    }

    #[test]
    fn test_merge_prefers_user_values() {
        let defaults = PipelineConfig::load_default().unwrap();
        let user = PipelineConfig {
            writer: WriterConfig { batch_size: Some(7), ..Default::default() },
            stream: StreamConfig { timestamps: Some(false), ..Default::default() },
            ..Default::default()
        };
        let merged = merge_configs(defaults.clone(), Some(user));
        assert_eq!(merged.writer.batch_size, Some(7));
        assert_eq!(merged.writer.debounce_delay_ms, defaults.writer.debounce_delay_ms);
        assert_eq!(merged.stream.timestamps, Some(false));
        assert_eq!(merged.layout, defaults.layout);
    }
}
