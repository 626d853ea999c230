// steplog-core/src/sink/json_lines.rs
//! A sink that appends each flushed batch as one JSON line.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use serde::Serialize;
use std::path::Path;
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::errors::SinkError;
use crate::sink::LogSink;
use crate::writer::{Batch, BatchEntry};

#[derive(Serialize)]
struct BatchLine<'a> {
    flushed_at: DateTime<Utc>,
    entries: &'a [BatchEntry],
}

pub struct JsonLinesSink {
    name: String,
    out: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
}

impl JsonLinesSink {
    /// Appends to `path`, creating the file if needed.
    pub async fn create<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref();
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        debug!("JSON lines sink writing to {}", path.display());
        Ok(Self {
            name: format!("json-lines:{}", path.display()),
            out: Mutex::new(Box::new(file)),
        })
    }

    pub fn stdout() -> Self {
        Self {
            name: "json-lines:stdout".to_string(),
            out: Mutex::new(Box::new(tokio::io::stdout())),
        }
    }
}

#[async_trait]
impl LogSink for JsonLinesSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn update(&self, batch: &Batch) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(&BatchLine {
            flushed_at: Utc::now(),
            entries: batch.entries(),
        })?;
        line.push(b'\n');

        // One write per batch so lines from concurrent writers never interleave.
        let mut out = self.out.lock().await;
        out.write_all(&line).await?;
        out.flush().await?;
        Ok(())
    }
}
