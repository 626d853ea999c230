// steplog-core/src/sink/mod.rs
//! The storage seam consumed by the batch writer.

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::SinkError;
use crate::writer::Batch;

pub mod json_lines;
pub mod memory;

pub use json_lines::JsonLinesSink;
pub use memory::MemorySink;

#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &str;

    /// A unique key for a new record under `destination`, generated before the
    /// record is written.
    fn push_key(&self, _destination: &str) -> String {
        Uuid::new_v4().to_string()
    }

    /// Writes every entry of `batch` in one call. Either all entries are stored
    /// or an error is returned.
    async fn update(&self, batch: &Batch) -> Result<(), SinkError>;
}
