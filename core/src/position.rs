//! Conversion between byte offsets and editor line/character positions.
//!
//! Characters are counted in UTF-16 code units, which is what editor
//! protocols report. Offsets are clamped to the text and snapped back to the
//! nearest character boundary.

use serde::{Deserialize, Serialize};

/// Zero-based line/character coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    pub fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

/// Half-open range between two positions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// Precomputed line starts for repeated lookups against one text.
#[derive(Debug, Clone)]
pub struct LineIndex<'a> {
    text: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(idx, _)| idx + 1));
        Self { text, line_starts }
    }

    pub fn position(&self, offset: usize) -> Position {
        let offset = floor_boundary(self.text, offset);
        let line = self.line_starts.partition_point(|&start| start <= offset) - 1;
        let line_start = self.line_starts[line];
        let character = self.text[line_start..offset].encode_utf16().count();
        Position {
            line: line as u32,
            character: character as u32,
        }
    }

    pub fn offset(&self, position: Position) -> usize {
        let Some(&line_start) = self.line_starts.get(position.line as usize) else {
            return self.text.len();
        };
        let line_end = self
            .line_starts
            .get(position.line as usize + 1)
            .map(|next| next - 1)
            .unwrap_or(self.text.len());
        let mut units = 0u32;
        for (idx, ch) in self.text[line_start..line_end].char_indices() {
            if units >= position.character {
                return line_start + idx;
            }
            units += ch.len_utf16() as u32;
        }
        line_end
    }

    pub fn range(&self, span: (usize, usize)) -> Range {
        Range {
            start: self.position(span.0),
            end: self.position(span.1),
        }
    }
}

/// Position of `offset` within `text`.
pub fn to_position(text: &str, offset: usize) -> Position {
    LineIndex::new(text).position(offset)
}

/// Byte offset of `position` within `text`; the inverse of [`to_position`].
pub fn to_offset(text: &str, position: Position) -> usize {
    LineIndex::new(text).offset(position)
}

/// Re-anchor a segment-local span into document coordinates.
pub fn shift_span(span: (usize, usize), segment_offset: usize) -> (usize, usize) {
    (span.0 + segment_offset, span.1 + segment_offset)
}

fn floor_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}
