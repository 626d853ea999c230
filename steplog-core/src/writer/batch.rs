//! batch.rs - The set of records accumulated between two flushes.
//!
//! License: MIT OR APACHE 2.0

use serde::Serialize;
use serde_json::value::RawValue;
use tokio::time::Instant;

/// One record waiting to be flushed.
#[derive(Debug, Clone, Serialize)]
pub struct BatchEntry {
    /// Unique key obtained from the sink.
    pub key: String,
    pub destination: String,
    /// The record, already serialized to JSON.
    pub value: Box<RawValue>,
}

impl BatchEntry {
    pub fn size(&self) -> usize {
        self.value.get().len()
    }
}

/// Records in acceptance order with their total serialized size.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    entries: Vec<BatchEntry>,
    bytes: usize,
    started_at: Option<Instant>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BatchEntry, now: Instant) {
        self.bytes += entry.size();
        self.started_at.get_or_insert(now);
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    /// When the first record of this batch was accepted.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    /// Time since the first record of this batch was accepted.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        self.started_at
            .map(|t| now.saturating_duration_since(t))
            .unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.bytes = 0;
        self.started_at = None;
    }

    /// Entries addressed to `destination`.
    pub fn for_destination<'a>(&'a self, destination: &'a str) -> impl Iterator<Item = &'a BatchEntry> + 'a {
        self.entries.iter().filter(move |e| e.destination == destination)
    }
}
