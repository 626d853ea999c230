// steplog-mask/src/matcher/mod.rs
use daachorse::{DoubleArrayAhoCorasick, DoubleArrayAhoCorasickBuilder, MatchKind};
extern crate alloc;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::fmt;

/// Byte span of one literal occurrence inside a haystack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaskMatch {
    pub start: usize,
    pub end: usize,
}

impl MaskMatch {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Raised when the automaton cannot be built (only capacity limits remain,
/// empty and duplicate words are filtered before building).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskError {
    message: String,
}

impl fmt::Display for MaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to build mask automaton: {}", self.message)
    }
}

#[cfg(feature = "std")]
impl std::error::Error for MaskError {}

/// Finds literal words with leftmost-longest semantics.
///
/// At every scan position the longest word starting there wins, so a secret
/// that contains a shorter secret as a prefix is reported whole.
pub struct LiteralMatcher {
    automaton: Option<DoubleArrayAhoCorasick<u32>>,
}

impl fmt::Debug for LiteralMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiteralMatcher")
         .field("automaton", &self.automaton.as_ref().map(|_| "<DoubleArrayAhoCorasick>"))
         .finish()
    }
}

impl LiteralMatcher {
    /// A matcher that never matches.
    pub fn empty() -> Self {
        Self { automaton: None }
    }

    /// Builds a matcher over `words`. Callers pass unique, non-empty words.
    pub fn build<I, P>(words: I) -> Result<Self, MaskError>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[u8]>,
    {
        let patterns: Vec<P> = words.into_iter().collect();
        if patterns.is_empty() {
            return Ok(Self::empty());
        }

        let automaton = DoubleArrayAhoCorasickBuilder::new()
            .match_kind(MatchKind::LeftmostLongest)
            .build(patterns)
            .map_err(|e| MaskError { message: e.to_string() })?;

        Ok(Self { automaton: Some(automaton) })
    }

    pub fn is_empty(&self) -> bool {
        self.automaton.is_none()
    }

    /// Returns every non-overlapping match, left to right.
    pub fn find_all(&self, haystack: &str) -> Vec<MaskMatch> {
        let Some(automaton) = &self.automaton else {
            return Vec::new();
        };

        automaton
            .leftmost_find_iter(haystack)
            .map(|m| MaskMatch { start: m.start(), end: m.end() })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;

    #[test]
    fn test_empty_matcher_finds_nothing() {
        let matcher = LiteralMatcher::build(Vec::<&str>::new()).unwrap();
        assert!(matcher.is_empty());
        assert!(matcher.find_all("anything").is_empty());
    }

    #[test]
    fn test_leftmost_longest_prefers_longer_word() {
        let matcher = LiteralMatcher::build(vec!["xyz", "xyz123"]).unwrap();
        let found = matcher.find_all("hello xyz123");
        assert_eq!(found, vec![MaskMatch { start: 6, end: 12 }]);
    }

    #[test]
    fn test_metacharacters_are_literal() {
        let matcher = LiteralMatcher::build(vec!["a.b*c"]).unwrap();
        assert!(matcher.find_all("aXbbbc").is_empty());
        assert_eq!(matcher.find_all("x a.b*c").len(), 1);
    }

    #[test]
    fn test_matches_are_non_overlapping() {
        let matcher = LiteralMatcher::build(vec!["aa"]).unwrap();
        let found = matcher.find_all("aaaaa");
        assert_eq!(found.len(), 2);
        assert_eq!(found[1], MaskMatch { start: 2, end: 4 });
    }
}
