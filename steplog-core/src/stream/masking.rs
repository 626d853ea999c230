//! masking.rs - The secret-masking stream stage.
//!
//! The stage withholds the trailing `longest_mask_length()` bytes of everything
//! it has seen, unmasked, and emits the rest masked. A secret arriving across
//! several chunks is therefore always complete in the buffer before any part of
//! it is emitted. When the withholding point falls inside a match, the cut moves
//! to the end of that match so the placeholder is emitted whole.
//!
//! License: MIT OR APACHE 2.0

use log::debug;
use tokio::time::Instant;

use steplog_mask::{apply_matches, MaskMatch, MaskSet};

use crate::config::StreamSettings;
use crate::errors::SteplogError;
use crate::fingerprint::mask_fingerprint;
use crate::stream::chunk_buffer::{floor_char_boundary, ChunkBuffer, Utf8Decoder};
use crate::stream::ChunkTransform;

pub struct MaskingTransform {
    masks: MaskSet,
    buffer: ChunkBuffer,
    decoder: Utf8Decoder,
}

impl MaskingTransform {
    pub fn new(masks: MaskSet, settings: &StreamSettings) -> Self {
        Self {
            masks,
            buffer: ChunkBuffer::new(settings.chunk_flush_timeout, settings.chunk_size),
            decoder: Utf8Decoder::new(),
        }
    }

    pub fn masks(&self) -> &MaskSet {
        &self.masks
    }

    /// Bytes currently withheld.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len_bytes()
    }

    /// Emits `full[..cut]` masked, moving `cut` past a match that straddles it,
    /// and keeps the rest buffered.
    fn emit_prefix(&mut self, full: &str, cut: usize) -> String {
        let matches = self.masks.find(full);
        let cut = extend_past_match(&matches, cut);
        let out = apply_matches(full, &matches, cut);
        self.buffer.retain_from(cut);
        out
    }
}

fn extend_past_match(matches: &[MaskMatch], cut: usize) -> usize {
    matches
        .iter()
        .find(|m| m.start < cut && m.end > cut)
        .map_or(cut, |m| m.end)
}

impl ChunkTransform for MaskingTransform {
    fn stage(&self) -> &'static str {
        "masking"
    }

    fn on_chunk(&mut self, data: &[u8], now: Instant) -> String {
        let text = self.decoder.decode(data);
        if !text.is_empty() {
            self.buffer.push(text, now);
        }

        let full = self.buffer.concat();
        let withheld = self.masks.longest_mask_length();
        if full.len() < withheld {
            debug!("Masking stage holding {} bytes (< {})", full.len(), withheld);
            return String::new();
        }
        let cut = floor_char_boundary(&full, full.len() - withheld);
        self.emit_prefix(&full, cut)
    }

    fn on_deadline(&mut self, now: Instant) -> String {
        let expired = self.buffer.expired_len(now);
        if expired == 0 {
            return String::new();
        }
        debug!("Masking stage flushing {} bytes past their deadline", expired);
        let full = self.buffer.concat();
        self.emit_prefix(&full, expired)
    }

    fn on_end(&mut self) -> String {
        let rest = self.decoder.finish();
        if !rest.is_empty() {
            self.buffer.push(rest, Instant::now());
        }
        let full = self.buffer.drain_all();
        self.masks.mask(&full)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.buffer.next_deadline()
    }

    fn add_mask(&mut self, name: &str, value: &str) -> Result<(), SteplogError> {
        if self.masks.add_mask(name, value)? {
            debug!(
                "Mask '{}' added to stream ({}), now {} masks",
                name,
                mask_fingerprint(value),
                self.masks.len()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn transform(entries: &[(&str, &str)]) -> MaskingTransform {
        let masks = MaskSet::from_blacklist(entries.iter().copied()).unwrap();
        MaskingTransform::new(masks, &StreamSettings::default())
    }

    fn feed(t: &mut MaskingTransform, chunks: &[&str]) -> String {
        let now = Instant::now();
        let mut out = String::new();
        for chunk in chunks {
            out.push_str(&t.on_chunk(chunk.as_bytes(), now));
        }
        out.push_str(&t.on_end());
        out
    }

    #[test]
    fn test_secret_split_over_three_chunks() {
        let mut t = transform(&[("NUM", "1234567890")]);
        let out = feed(&mut t, &["Hello, 123", "456", "7890 world"]);
        assert_eq!(out, "Hello, **** world");
    }

    #[test]
    fn test_longest_mask_wins() {
        let mut t = transform(&[("SHORT", "xyz"), ("LONG", "xyz123")]);
        assert_eq!(feed(&mut t, &["Hello, xyz123"]), "Hello, ****");
    }

    #[test]
    fn test_prefix_mask_split_at_shorter_boundary() {
        let mut t = transform(&[("SHORT", "xyz"), ("LONG", "xyz123")]);
        assert_eq!(feed(&mut t, &["hello xyz", "123 bye"]), "hello **** bye");
    }

    #[test]
    fn test_every_split_matches_whole_feed() {
        let input = "pre s3cr3t-t0ken mid s3cr3t and t0k post s3cr3t-t0k";
        let entries = [("A", "s3cr3t-t0ken"), ("B", "s3cr3t"), ("C", "t0k")];
        let expected = feed(&mut transform(&entries), &[input]);
        assert!(!expected.contains("s3cr3t"));

        for i in 0..=input.len() {
            for j in i..=input.len() {
                let chunks = [&input[..i], &input[i..j], &input[j..]];
                let out = feed(&mut transform(&entries), &chunks);
                assert_eq!(out, expected, "split at {} and {}", i, j);
            }
        }
    }

    #[test]
    fn test_byte_split_inside_multibyte_secret() {
        let secret = "pässwörd";
        let input = format!("a {} b", secret);
        let bytes = input.as_bytes();
        for i in 0..=bytes.len() {
            let mut t = transform(&[("P", secret)]);
            let now = Instant::now();
            let mut out = t.on_chunk(&bytes[..i], now);
            out.push_str(&t.on_chunk(&bytes[i..], now));
            out.push_str(&t.on_end());
            assert_eq!(out, "a **** b", "split at byte {}", i);
        }
    }

    #[test]
    fn test_withholds_longest_mask_length() {
        let mut t = transform(&[("K", "abcdef")]);
        let now = Instant::now();
        assert_eq!(t.on_chunk(b"abc", now), "");
        assert_eq!(t.buffered_len(), 3);
        assert_eq!(t.on_chunk(b"0123456789", now), "abc0123");
        assert_eq!(t.buffered_len(), 6);
    }

    #[test]
    fn test_no_masks_is_passthrough() {
        let mut t = transform(&[]);
        let now = Instant::now();
        assert_eq!(t.on_chunk(b"plain", now), "plain");
        assert_eq!(t.buffered_len(), 0);
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_deadline_flushes_held_data() {
        let mut t = transform(&[("K", "a-very-long-secret")]);
        let now = Instant::now();
        assert_eq!(t.on_chunk(b"short", now), "");
        let due = t.next_deadline().unwrap();
        assert_eq!(due, now + Duration::from_millis(200));
        assert_eq!(t.on_deadline(now + Duration::from_millis(100)), "");
        assert_eq!(t.on_deadline(due), "short");
        assert_eq!(t.next_deadline(), None);
    }

    #[test]
    fn test_deadline_flush_masks_whole_secret() {
        let mut t = transform(&[("K", "topsecret"), ("L", "0123456789abcdef")]);
        let start = Instant::now();
        t.on_chunk(b"x top", start);
        t.on_chunk(b"secret y", start + Duration::from_millis(150));
        let out = t.on_deadline(start + Duration::from_millis(200));
        assert_eq!(out, "x ****");
        assert_eq!(t.on_end(), " y");
    }

    #[test]
    fn test_mask_added_mid_stream() {
        let mut t = transform(&[]);
        let now = Instant::now();
        assert_eq!(t.on_chunk(b"before ", now), "before ");
        t.add_mask("LATE", "hunter2").unwrap();
        let mut out = t.on_chunk(b"hunter", now);
        out.push_str(&t.on_chunk(b"2!", now));
        out.push_str(&t.on_end());
        assert_eq!(out, "****!");
    }
}
