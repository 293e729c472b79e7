//! Highlight ranges for matched text.
//!
//! Engines report byte spans. Consumers (text widgets) index strings in
//! UTF-16 code units, and a highlight must never split a user-perceived
//! character, so spans are widened to extended grapheme cluster boundaries
//! before conversion.

use crate::entry::Entry;
use crate::matcher::{BoundMatcher, CompiledMatcher, haystack};
use fsearch_query_parser::Field;
use serde::{Serialize, Serializer};
use smallvec::SmallVec;
use unicode_segmentation::UnicodeSegmentation;

/// Half-open `[start, end)` range in UTF-16 code units
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "(u32, u32)")]
pub struct HighlightRange {
    pub start: u32,
    pub end: u32,
}

impl HighlightRange {
    pub fn new(start: u32, end: u32) -> Self {
        Self { start, end }
    }
}

impl From<HighlightRange> for (u32, u32) {
    fn from(range: HighlightRange) -> Self {
        (range.start, range.end)
    }
}

/// Ranges for one field of a result. Numeric fields carry no ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldHighlight {
    #[serde(serialize_with = "serialize_field")]
    pub field: Field,
    pub ranges: Vec<HighlightRange>,
}

fn serialize_field<S: Serializer>(field: &Field, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(field.as_str())
}

/// Renders highlights as `[{"field":"name","ranges":[[0,6]]}]`
pub fn to_json(highlights: &[FieldHighlight]) -> String {
    serde_json::to_string(highlights).unwrap_or_else(|_| String::from("[]"))
}

/// Converts byte spans over `text` into sorted, merged, grapheme-aligned
/// UTF-16 ranges. Empty and out-of-range spans are dropped.
pub fn resolve(text: &str, byte_ranges: &[(usize, usize)]) -> Vec<HighlightRange> {
    let len = text.len();
    let mut spans: SmallVec<[(usize, usize); 8]> = byte_ranges
        .iter()
        .map(|&(start, end)| (start, end.min(len)))
        .filter(|&(start, end)| start < end)
        .collect();

    if spans.is_empty() {
        return Vec::new();
    }

    let mut boundaries: Vec<usize> = text.grapheme_indices(true).map(|(i, _)| i).collect();
    boundaries.push(len);

    for span in spans.iter_mut() {
        *span = snap_to_graphemes(&boundaries, *span);
    }

    spans.sort_unstable();
    let merged = merge(&spans);
    to_utf16(text, &merged)
}

/// Widens a byte span so both ends fall on a grapheme boundary
fn snap_to_graphemes(boundaries: &[usize], (start, end): (usize, usize)) -> (usize, usize) {
    let start_idx = boundaries.partition_point(|&b| b <= start).saturating_sub(1);
    let end_idx = boundaries
        .partition_point(|&b| b < end)
        .min(boundaries.len() - 1);
    (boundaries[start_idx], boundaries[end_idx])
}

/// Merges sorted spans that overlap or touch
fn merge(spans: &[(usize, usize)]) -> SmallVec<[(usize, usize); 8]> {
    let mut merged: SmallVec<[(usize, usize); 8]> = SmallVec::new();
    for &(start, end) in spans {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}

fn to_utf16(text: &str, spans: &[(usize, usize)]) -> Vec<HighlightRange> {
    let mut chars = text.char_indices().peekable();
    let mut units: u32 = 0;

    // spans are sorted and disjoint, so offsets are requested in order
    let mut advance_to = |byte: usize| -> u32 {
        while let Some(&(i, c)) = chars.peek() {
            if i >= byte {
                break;
            }
            units += c.len_utf16() as u32;
            chars.next();
        }
        units
    };

    spans
        .iter()
        .map(|&(start, end)| {
            let start = advance_to(start);
            let end = advance_to(end);
            HighlightRange::new(start, end)
        })
        .collect()
}

/// Gathers match spans from every leaf that contributed to a match.
///
/// Branches of an `Or` only contribute when they matched on their own and
/// negated subtrees never contribute.
pub struct HighlightCollector<'b, 'm> {
    bound: &'b BoundMatcher<'m>,
    spans: SmallVec<[(Field, Vec<(usize, usize)>); 2]>,
}

impl<'b, 'm> HighlightCollector<'b, 'm> {
    pub fn new(bound: &'b BoundMatcher<'m>) -> Self {
        Self {
            bound,
            spans: SmallVec::new(),
        }
    }

    /// Highlights for an entry the matcher accepted, one per field in field order.
    ///
    /// Extension matches are drawn inside the name; the `extension` field
    /// itself is reported without ranges.
    pub fn collect(mut self, entry: &Entry) -> Vec<FieldHighlight> {
        self.walk(self.bound.matcher(), entry);

        if let Some(position) = self.spans.iter().position(|(f, _)| *f == Field::Extension) {
            let spans = std::mem::take(&mut self.spans[position].1);
            if let Some(offset) = entry.extension_start() {
                self.field_spans(Field::Name)
                    .extend(spans.iter().map(|&(start, end)| (start + offset, end + offset)));
            }
        }

        let mut highlights = Vec::with_capacity(self.spans.len());
        for field in Field::ALL {
            let Some((_, spans)) = self.spans.iter().find(|(f, _)| *f == field) else {
                continue;
            };

            let ranges = match entry.text(field) {
                Some(text) => resolve(text, spans),
                None => Vec::new(),
            };
            highlights.push(FieldHighlight { field, ranges });
        }
        highlights
    }

    fn walk(&mut self, node: &CompiledMatcher, entry: &Entry) {
        match node {
            CompiledMatcher::Literal(leaf) | CompiledMatcher::Regex(leaf) => {
                let bound = self.bound;
                let (Some(engine), Some(text)) = (bound.engine(leaf), haystack(leaf, entry)) else {
                    return;
                };

                let spans = self.field_spans(leaf.field);
                match entry.folded(leaf.field).filter(|_| leaf.fold) {
                    Some(folded) => {
                        let mut found = Vec::new();
                        engine.find_spans(text.as_bytes(), &mut found);
                        spans.extend(found.into_iter().map(|span| folded.to_original(span)));
                    }
                    None => engine.find_spans(text.as_bytes(), spans),
                }
            }
            CompiledMatcher::Range { field, .. } => {
                self.field_spans(*field);
            }
            CompiledMatcher::Field { term, .. } | CompiledMatcher::Modified { term, .. } => {
                self.walk(term, entry);
            }
            CompiledMatcher::And(children) => {
                for child in children {
                    self.walk(child, entry);
                }
            }
            CompiledMatcher::Or(children) => {
                for child in children {
                    if self.bound.eval(child, entry) {
                        self.walk(child, entry);
                    }
                }
            }
            CompiledMatcher::Not(_) => {}
        }
    }

    fn field_spans(&mut self, field: Field) -> &mut Vec<(usize, usize)> {
        let position = match self.spans.iter().position(|(f, _)| *f == field) {
            Some(position) => position,
            None => {
                self.spans.push((field, Vec::new()));
                self.spans.len() - 1
            }
        };
        &mut self.spans[position].1
    }
}
