use tower_lsp_server::ls_types::{Position, Range};

/// Line start table for one immutable text.
///
/// The index does not own the text; callers pass the same text they built it
/// from. Snapshots keep both side by side so the pairing never drifts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineIndex {
    line_starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(
            text.bytes()
                .enumerate()
                .filter(|(_, b)| *b == b'\n')
                .map(|(i, _)| i + 1),
        );
        Self {
            line_starts,
            len: text.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.line_starts.len()
    }

    fn line_bounds(&self, text: &str, line: usize) -> Option<(usize, usize)> {
        let start = *self.line_starts.get(line)?;
        let end = match self.line_starts.get(line + 1) {
            Some(next) => next - 1,
            None => self.len.min(text.len()),
        };
        Some((start, end.max(start)))
    }

    /// Convert an LSP position to a byte offset.
    ///
    /// Characters past the end of a line clamp to the line end, matching what
    /// editors send for a cursor after trailing whitespace was trimmed.
    pub fn offset(&self, text: &str, position: Position) -> Option<usize> {
        let (start, end) = self.line_bounds(text, position.line as usize)?;
        let line_text = text.get(start..end)?;
        match convert_utf16_to_byte_in_line(line_text, position.character as usize) {
            Some(byte) => Some(start + byte),
            None => Some(end),
        }
    }

    /// Convert a byte offset to an LSP position.
    ///
    /// An offset inside a multi-byte character snaps back to its start.
    pub fn position(&self, text: &str, offset: usize) -> Option<Position> {
        if offset > self.len {
            return None;
        }
        let line = match self.line_starts.binary_search(&offset) {
            Ok(line) => line,
            Err(line) => line.saturating_sub(1),
        };
        let (start, end) = self.line_bounds(text, line)?;
        let line_text = text.get(start..end)?;
        let mut column = offset.saturating_sub(start).min(line_text.len());
        while !line_text.is_char_boundary(column) {
            column -= 1;
        }
        let character = convert_byte_to_utf16_in_line(line_text, column)?;
        Some(Position {
            line: line as u32,
            character: character as u32,
        })
    }

    pub fn range(&self, text: &str, start: usize, end: usize) -> Option<Range> {
        Some(Range {
            start: self.position(text, start)?,
            end: self.position(text, end)?,
        })
    }

    pub fn offsets(&self, text: &str, range: Range) -> Option<(usize, usize)> {
        Some((self.offset(text, range.start)?, self.offset(text, range.end)?))
    }

    /// Position just past the last character.
    pub fn end_position(&self, text: &str) -> Position {
        self.position(text, self.len).unwrap_or_default()
    }
}

/// Convert a UTF-16 column to a byte column within one line.
///
/// Returns `None` when the column is past the end of the line.
#[inline]
pub fn convert_utf16_to_byte_in_line(line_text: &str, utf16_pos: usize) -> Option<usize> {
    let mut byte_offset = 0;
    let mut utf16_offset = 0;

    for ch in line_text.chars() {
        if utf16_offset >= utf16_pos {
            return Some(byte_offset);
        }
        utf16_offset += ch.len_utf16();
        byte_offset += ch.len_utf8();
    }

    (utf16_offset == utf16_pos).then_some(byte_offset)
}

/// Convert a byte column to a UTF-16 column within one line.
///
/// Returns `None` for a byte column in the middle of a character or past the end.
#[inline]
pub fn convert_byte_to_utf16_in_line(line_text: &str, byte_pos: usize) -> Option<usize> {
    let mut utf16_offset = 0;
    let mut byte_count = 0;

    for ch in line_text.chars() {
        if byte_count == byte_pos {
            return Some(utf16_offset);
        }
        if byte_count + ch.len_utf8() > byte_pos {
            return None;
        }
        byte_count += ch.len_utf8();
        utf16_offset += ch.len_utf16();
    }

    (byte_count == byte_pos).then_some(utf16_offset)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    #[test]
    fn offset_and_position_agree_on_ascii() {
        let text = "ab\ncde\n\nf";
        let index = LineIndex::new(text);

        assert_eq!(index.line_count(), 4);
        assert_eq!(index.offset(text, pos(1, 2)), Some(5));
        assert_eq!(index.position(text, 5), Some(pos(1, 2)));
        assert_eq!(index.offset(text, pos(2, 0)), Some(7));
        assert_eq!(index.position(text, text.len()), Some(pos(3, 1)));
    }

    #[test]
    fn utf16_columns_for_multibyte_text() {
        // "あ" is 3 bytes / 1 UTF-16 unit, "😀" is 4 bytes / 2 units
        let text = "あ😀x";
        let index = LineIndex::new(text);

        assert_eq!(index.offset(text, pos(0, 1)), Some(3));
        assert_eq!(index.offset(text, pos(0, 3)), Some(7));
        assert_eq!(index.position(text, 7), Some(pos(0, 3)));
        // inside the emoji snaps back to its start
        assert_eq!(index.position(text, 5), Some(pos(0, 1)));
    }

    #[test]
    fn column_past_line_end_clamps() {
        let text = "abc\ndef";
        let index = LineIndex::new(text);

        assert_eq!(index.offset(text, pos(0, 99)), Some(3));
        assert_eq!(index.offset(text, pos(5, 0)), None);
        assert_eq!(index.position(text, 99), None);
    }

    #[test]
    fn end_position_of_trailing_newline() {
        let text = "abc\n";
        let index = LineIndex::new(text);

        assert_eq!(index.end_position(text), pos(1, 0));
    }
}
