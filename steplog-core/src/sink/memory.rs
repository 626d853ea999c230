// steplog-core/src/sink/memory.rs
//! In-process sink that keeps every flushed batch for inspection.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::errors::SinkError;
use crate::sink::LogSink;
use crate::writer::{Batch, BatchEntry};

#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Batch>>,
    failures_left: AtomicUsize,
    latency: Option<Duration>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `update` sleeps for `latency` before completing.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// Makes the next `count` updates fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub async fn batches(&self) -> Vec<Batch> {
        self.batches.lock().await.clone()
    }

    /// All stored entries, in flush order.
    pub async fn entries(&self) -> Vec<BatchEntry> {
        self.batches
            .lock()
            .await
            .iter()
            .flat_map(|b| b.entries().iter().cloned())
            .collect()
    }

    /// Stored values for `destination`, decoded.
    pub async fn values(&self, destination: &str) -> Vec<serde_json::Value> {
        self.entries()
            .await
            .into_iter()
            .filter(|e| e.destination == destination)
            .filter_map(|e| serde_json::from_str(e.value.get()).ok())
            .collect()
    }
}

#[async_trait]
impl LogSink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn update(&self, batch: &Batch) -> Result<(), SinkError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let injected = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(SinkError::Rejected {
                sink: self.name().to_string(),
                message: "injected failure".to_string(),
            });
        }

        self.batches.lock().await.push(batch.clone());
        Ok(())
    }
}
