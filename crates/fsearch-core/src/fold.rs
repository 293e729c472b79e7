//! NFKC folding for case-insensitive literal matching.
//!
//! Compatibility forms such as the `ﬁ` ligature, fullwidth letters or
//! decomposed accents only meet their plain spelling after NFKC. A folded
//! copy keeps grapheme offsets back into the original so highlights still
//! point at the text the user sees.

use unicode_normalization::{UnicodeNormalization, is_nfkc};
use unicode_segmentation::UnicodeSegmentation;

/// NFKC form of a text with a map back to the original bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldedText {
    text: String,
    /// `(folded_start, original_start)` of every grapheme, then both lengths
    segments: Vec<(usize, usize)>,
}

impl FoldedText {
    /// Returns `None` when `original` is already in NFKC.
    pub fn new(original: &str) -> Option<Self> {
        if is_nfkc(original) {
            return None;
        }

        let mut text = String::with_capacity(original.len());
        let mut segments = Vec::new();
        for (start, grapheme) in original.grapheme_indices(true) {
            segments.push((text.len(), start));
            text.extend(grapheme.nfkc());
        }
        segments.push((text.len(), original.len()));

        Some(Self { text, segments })
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Maps a byte span of the folded text to the original graphemes it touches
    pub fn to_original(&self, (start, end): (usize, usize)) -> (usize, usize) {
        let first = self
            .segments
            .partition_point(|&(folded, _)| folded <= start)
            .saturating_sub(1);
        let last = self
            .segments
            .partition_point(|&(folded, _)| folded < end)
            .min(self.segments.len() - 1);
        (self.segments[first].1, self.segments[last].1)
    }
}

/// NFKC form of a query pattern
pub fn fold_pattern(pattern: &str) -> String {
    if is_nfkc(pattern) {
        pattern.to_string()
    } else {
        pattern.nfkc().collect()
    }
}
