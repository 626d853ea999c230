//! timestamp.rs - Prefixes each output line with the time it was emitted.
//!
//! License: MIT OR APACHE 2.0

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::time::Instant;

use crate::config::StreamSettings;
use crate::stream::chunk_buffer::{ChunkBuffer, Utf8Decoder};
use crate::stream::ChunkTransform;

/// Matches a prefix written by [`utc_timestamp_prefix`].
static TIMESTAMP_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}\.\d{3}Z ")
        .unwrap_or_else(|e| panic!("invalid timestamp pattern: {}", e))
});

/// Source of the prefix text, including its trailing separator.
pub type Clock = Box<dyn Fn() -> String + Send>;

/// RFC 3339 UTC time with milliseconds, followed by a space.
pub fn utc_timestamp_prefix() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ ").to_string()
}

/// Whether `line` already starts with a prefix in the stage's own format.
///
/// Such lines are passed through unstamped. This covers text stamped by an
/// earlier pass and also process output that carries its own RFC 3339
/// millisecond UTC timestamp.
pub fn has_timestamp_prefix(line: &str) -> bool {
    TIMESTAMP_PREFIX.is_match(line)
}

pub struct TimestampTransform {
    buffer: ChunkBuffer,
    decoder: Utf8Decoder,
    last_was_newline: bool,
    clock: Clock,
}

impl TimestampTransform {
    pub fn new(settings: &StreamSettings) -> Self {
        Self::with_clock(settings, Box::new(utc_timestamp_prefix))
    }

    pub fn with_clock(settings: &StreamSettings, clock: Clock) -> Self {
        Self {
            buffer: ChunkBuffer::new(settings.chunk_flush_timeout, settings.chunk_size),
            decoder: Utf8Decoder::new(),
            last_was_newline: true,
            clock,
        }
    }

    fn stamp(&mut self, text: &str) -> String {
        let mut out = String::with_capacity(text.len());
        for segment in text.split_inclusive('\n') {
            let content = segment.strip_suffix('\n').unwrap_or(segment);
            if self.last_was_newline && !content.trim().is_empty() && !has_timestamp_prefix(segment) {
                out.push_str(&(self.clock)());
            }
            out.push_str(segment);
            self.last_was_newline = segment.ends_with('\n');
        }
        out
    }

    fn flush_all(&mut self) -> String {
        let rest = self.buffer.drain_all();
        self.stamp(&rest)
    }
}

impl ChunkTransform for TimestampTransform {
    fn stage(&self) -> &'static str {
        "timestamp"
    }

    fn on_chunk(&mut self, data: &[u8], now: Instant) -> String {
        let text = self.decoder.decode(data);
        if text.is_empty() {
            return String::new();
        }
        self.buffer.push(text, now);

        let full = self.buffer.concat();
        match full.rfind('\n') {
            Some(last) => {
                let complete = &full[..=last];
                let out = self.stamp(complete);
                self.buffer.retain_from(last + 1);
                out
            }
            None => String::new(),
        }
    }

    /// The buffer only ever holds one incomplete line, so an expired head
    /// flushes all of it.
    fn on_deadline(&mut self, now: Instant) -> String {
        if self.buffer.expired_len(now) == 0 {
            return String::new();
        }
        self.flush_all()
    }

    fn on_end(&mut self) -> String {
        let rest = self.decoder.finish();
        if !rest.is_empty() {
            self.buffer.push(rest, Instant::now());
        }
        self.flush_all()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.buffer.next_deadline()
    }
}
