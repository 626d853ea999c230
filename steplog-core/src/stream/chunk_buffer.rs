//! chunk_buffer.rs - Ordered pending fragments with per-fragment flush deadlines.
//!
//! Both stream stages keep their withheld text in a `ChunkBuffer`. Each chunk
//! remembers the deadline it was given on arrival; when the buffer keeps only a
//! tail of its contents, the tail is cut back into slot-sized pieces and every
//! piece inherits the deadline of the chunk its first byte came from, so a byte
//! is never held longer than the timeout it arrived with.
//!
//! License: MIT OR APACHE 2.0

use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// One buffered fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub data: String,
    pub sent: bool,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct ChunkBuffer {
    chunks: VecDeque<Chunk>,
    timeout: Duration,
    slot_size: usize,
}

impl ChunkBuffer {
    pub fn new(timeout: Duration, slot_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            timeout,
            slot_size: slot_size.max(1),
        }
    }

    /// Appends `data` as a new chunk due at `now + timeout`.
    pub fn push(&mut self, data: String, now: Instant) {
        self.chunks.push_back(Chunk {
            data,
            sent: false,
            deadline: now + self.timeout,
        });
    }

    /// Concatenation of every unsent chunk, in arrival order.
    pub fn concat(&self) -> String {
        let mut full = String::with_capacity(self.len_bytes());
        for chunk in self.chunks.iter().filter(|c| !c.sent) {
            full.push_str(&chunk.data);
        }
        full
    }

    pub fn len_bytes(&self) -> usize {
        self.chunks.iter().filter(|c| !c.sent).map(|c| c.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len_bytes() == 0
    }

    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Earliest deadline among unsent chunks. Deadlines never decrease along
    /// the buffer, so this is the head's.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.chunks.iter().find(|c| !c.sent && !c.data.is_empty()).map(|c| c.deadline)
    }

    /// Number of leading bytes whose chunks are due at or before `now`.
    pub fn expired_len(&self, now: Instant) -> usize {
        self.chunks
            .iter()
            .filter(|c| !c.sent)
            .take_while(|c| c.deadline <= now)
            .map(|c| c.data.len())
            .sum()
    }

    /// Marks everything sent and returns the remaining text.
    pub fn drain_all(&mut self) -> String {
        let full = self.concat();
        for chunk in self.chunks.iter_mut() {
            chunk.sent = true;
        }
        self.chunks.clear();
        full
    }

    /// Drops the first `cut` bytes of the concatenation and spreads what is left
    /// over the existing slots.
    ///
    /// `cut` must lie on a char boundary of [`ChunkBuffer::concat`]. Slots hold at
    /// most `slot_size` bytes except the last, which takes the remainder. Slots
    /// left without data are marked sent and removed.
    pub fn retain_from(&mut self, cut: usize) {
        let full = self.concat();
        let tail = &full[cut..];

        let mut spans = Vec::with_capacity(self.chunks.len());
        let mut offset = 0;
        for chunk in self.chunks.iter().filter(|c| !c.sent) {
            spans.push((offset, offset + chunk.data.len(), chunk.deadline));
            offset += chunk.data.len();
        }
        let slots = spans.len().max(1);

        let mut pieces: Vec<Chunk> = Vec::with_capacity(slots);
        let mut start = 0;
        while start < tail.len() {
            let end = if pieces.len() + 1 == slots {
                tail.len()
            } else {
                let wanted = (start + self.slot_size).min(tail.len());
                let end = floor_char_boundary(tail, wanted);
                if end <= start { ceil_char_boundary(tail, start + 1) } else { end }
            };
            let absolute = cut + start;
            let deadline = spans
                .iter()
                .find(|(s, e, _)| *s <= absolute && absolute < *e)
                .map(|(_, _, d)| *d)
                .unwrap_or_else(Instant::now);
            pieces.push(Chunk {
                data: tail[start..end].to_string(),
                sent: false,
                deadline,
            });
            start = end;
        }

        for chunk in self.chunks.iter_mut().skip(pieces.len()) {
            chunk.sent = true;
        }
        self.chunks = pieces.into();
    }
}

/// Largest char boundary of `s` at or below `index`.
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut i = index.min(s.len());
    while !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

/// Incremental UTF-8 decoding that never splits a multi-byte character.
///
/// An incomplete sequence at the end of a chunk is held back until the next
/// chunk completes it. Genuinely invalid bytes decode to U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let split = self.pending.len() - incomplete_tail_len(&self.pending);
        let text = String::from_utf8_lossy(&self.pending[..split]).into_owned();
        self.pending.drain(..split);
        text
    }

    /// Whatever is still pending, decoded lossily.
    pub fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}

fn incomplete_tail_len(bytes: &[u8]) -> usize {
    for back in 1..=bytes.len().min(3) {
        let b = bytes[bytes.len() - back];
        if b & 0xC0 == 0x80 {
            continue;
        }
        let needed = if b & 0xE0 == 0xC0 {
            2
        } else if b & 0xF0 == 0xE0 {
            3
        } else if b & 0xF8 == 0xF0 {
            4
        } else {
            return 0;
        };
        return if needed > back { back } else { 0 };
    }
    0
}
