//! Applying `didChange` content changes.

use tower_lsp_server::ls_types::TextDocumentContentChangeEvent;

use crate::text::LineIndex;

/// Apply content changes in order and return the new text.
///
/// A change without a range replaces the whole document; ranged changes
/// are applied against the text produced by the changes before them.
pub(crate) fn apply_content_changes(
    old_text: &str,
    content_changes: Vec<TextDocumentContentChangeEvent>,
) -> String {
    let mut text = old_text.to_string();
    for change in content_changes {
        let Some(range) = change.range else {
            text = change.text;
            continue;
        };
        let index = LineIndex::new(&text);
        let start = index.offset(&text, range.start).unwrap_or(text.len());
        let end = index.offset(&text, range.end).unwrap_or(text.len()).max(start);
        text.replace_range(start..end, &change.text);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use tower_lsp_server::ls_types::{Position, Range};

    fn ranged(start: (u32, u32), end: (u32, u32), text: &str) -> TextDocumentContentChangeEvent {
        TextDocumentContentChangeEvent {
            range: Some(Range::new(
                Position::new(start.0, start.1),
                Position::new(end.0, end.1),
            )),
            range_length: None,
            text: text.to_string(),
        }
    }

    #[test]
    fn ranged_changes_apply_in_sequence() {
        let text = "<script>\nlet a = 1\n</script>\n";
        let changes = vec![ranged((1, 4), (1, 5), "answer"), ranged((1, 13), (1, 14), "42")];

        assert_eq!(
            apply_content_changes(text, changes),
            "<script>\nlet answer = 42\n</script>\n"
        );
    }

    #[test]
    fn full_change_replaces_text_and_utf16_columns_are_respected() {
        let full = TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text: "<p>é</p>\n".to_string(),
        };
        // insert after the two-byte character (UTF-16 column 4)
        let changes = vec![full, ranged((0, 4), (0, 4), "!")];

        assert_eq!(apply_content_changes("old", changes), "<p>é!</p>\n");
    }
}
