// steplog-core/src/writer/window.rs
use std::time::Duration;
use tokio::time::Instant;

/// Margin added to a retry so it lands strictly after the window expires.
pub const RETRY_EPSILON: Duration = Duration::from_millis(1);

/// A fixed time-unit window counting bytes accepted by the writer.
#[derive(Debug, Clone)]
pub struct RateWindow {
    start: Instant,
    bytes: usize,
    time_unit: Duration,
    limit: usize,
}

impl RateWindow {
    pub fn new(time_unit: Duration, limit: usize, now: Instant) -> Self {
        Self {
            start: now,
            bytes: 0,
            time_unit,
            limit,
        }
    }

    /// Starts a new window when the current one is older than the time unit.
    pub fn refresh(&mut self, now: Instant) {
        if now.saturating_duration_since(self.start) > self.time_unit {
            self.start = now;
            self.bytes = 0;
        }
    }

    /// Whether `size` more bytes fit. An empty window takes any single record,
    /// however large, so an oversize record cannot stall the writer forever.
    pub fn admits(&self, size: usize) -> bool {
        self.bytes == 0 || self.bytes + size <= self.limit
    }

    pub fn record(&mut self, size: usize) {
        self.bytes += size;
    }

    /// Earliest instant at which [`RateWindow::refresh`] opens a new window.
    pub fn retry_at(&self) -> Instant {
        self.start + self.time_unit + RETRY_EPSILON
    }

    pub fn bytes(&self) -> usize {
        self.bytes
    }

    pub fn start(&self) -> Instant {
        self.start
    }
}
