//! The blacklist of secret values and the pure masking function.
//!
//! Masks are kept ordered by descending word length. The automaton is rebuilt
//! from that ordering whenever a mask is added.

extern crate alloc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::matcher::{LiteralMatcher, MaskError, MaskMatch};

/// Replacement written in place of every masked occurrence.
pub const PLACEHOLDER: &str = "****";

/// One blacklisted secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub name: String,
    pub word: String,
}

/// An ordered set of masks together with the automaton matching them.
#[derive(Debug)]
pub struct MaskSet {
    masks: Vec<Mask>,
    matcher: LiteralMatcher,
}

impl Default for MaskSet {
    fn default() -> Self {
        Self::new()
    }
}

impl MaskSet {
    pub fn new() -> Self {
        Self {
            masks: Vec::new(),
            matcher: LiteralMatcher::empty(),
        }
    }

    /// Builds a set from `name -> secret` pairs. Empty secrets are skipped.
    pub fn from_blacklist<I, K, V>(entries: I) -> Result<Self, MaskError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new();
        for (name, value) in entries {
            set.insert_sorted(name.as_ref(), value.as_ref());
        }
        set.rebuild()?;
        Ok(set)
    }

    /// Adds a mask in length order. Returns `Ok(false)` when the value is empty
    /// or already masked, in which case nothing changes.
    pub fn add_mask(&mut self, name: &str, value: &str) -> Result<bool, MaskError> {
        if !self.insert_sorted(name, value) {
            return Ok(false);
        }
        self.rebuild()?;
        Ok(true)
    }

    fn insert_sorted(&mut self, name: &str, value: &str) -> bool {
        if value.is_empty() || self.masks.iter().any(|m| m.word == value) {
            return false;
        }
        let position = self.masks.partition_point(|m| m.word.len() >= value.len());
        self.masks.insert(position, Mask {
            name: name.to_string(),
            word: value.to_string(),
        });
        true
    }

    fn rebuild(&mut self) -> Result<(), MaskError> {
        self.matcher = LiteralMatcher::build(self.masks.iter().map(|m| m.word.as_bytes()))?;
        Ok(())
    }

    /// Length in bytes of the longest mask, 0 when there are none.
    pub fn longest_mask_length(&self) -> usize {
        self.masks.first().map_or(0, |m| m.word.len())
    }

    pub fn masks(&self) -> &[Mask] {
        &self.masks
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    /// Leftmost-longest occurrences of any mask in `haystack`.
    pub fn find(&self, haystack: &str) -> Vec<MaskMatch> {
        self.matcher.find_all(haystack)
    }

    /// Replaces every occurrence of every mask with [`PLACEHOLDER`].
    ///
    /// Matching runs once over `input`; the output is not rescanned. A mask
    /// containing `*` may therefore appear in the output where input text
    /// meets a placeholder, although no secret from `input` survives.
    pub fn mask(&self, input: &str) -> String {
        if self.matcher.is_empty() {
            return input.to_string();
        }
        let matches = self.find(input);
        apply_matches(input, &matches, input.len())
    }
}

/// Renders `input[..end]` with every match lying inside that prefix replaced.
///
/// `matches` must come from a scan of `input` and `end` must not fall strictly
/// inside one of them.
pub fn apply_matches(input: &str, matches: &[MaskMatch], end: usize) -> String {
    let mut out = String::with_capacity(end);
    let mut last = 0;
    for m in matches.iter().take_while(|m| m.end <= end) {
        out.push_str(&input[last..m.start]);
        out.push_str(PLACEHOLDER);
        last = m.end;
    }
    out.push_str(&input[last..end]);
    out
}
