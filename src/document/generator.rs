//! Language-specific virtual code generators.
//!
//! A generator knows one container format. It cuts the host text into
//! [`BlockSlice`]s and turns each slice into [`GeneratedCode`], optionally with
//! nested children. The virtual tree owns the bookkeeping around it.

use url::Url;

use super::mapping::{Mapping, Span};
use super::teleport::Teleport;
use super::virtual_doc::VirtualDocument;
use crate::error::YosegiResult;

/// One top-level block of the host document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSlice {
    /// Stable sub-id, unique within the host (`template`, `style_1`, ...)
    pub id: String,
    /// Tag or kind of the block (`template`, `script`, `style`, custom)
    pub kind: String,
    pub language_id: String,
    /// Opening tag to closing tag inclusive
    pub outer: Span,
    /// Text between the tags
    pub content: Span,
    /// Raw opening tag text, compared to decide if the slice shape changed
    pub header: String,
    /// Whether the closing tag was found
    pub terminated: bool,
}

impl BlockSlice {
    pub fn content<'a>(&self, host_text: &'a str) -> &'a str {
        host_text
            .get(self.content.start..self.content.end)
            .unwrap_or_default()
    }

    /// Same id, language and opening tag.
    pub fn same_shape(&self, other: &BlockSlice) -> bool {
        self.id == other.id
            && self.language_id == other.language_id
            && self.header == other.header
            && self.terminated == other.terminated
    }
}

/// Output of a generator for one document.
///
/// Mapping sources are in the coordinates of the parent: host offsets for a
/// top-level block, parent generated offsets for an embedded child.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GeneratedCode {
    pub text: String,
    pub mappings: Vec<Mapping>,
    pub teleports: Vec<Teleport>,
    pub embedded: Vec<EmbeddedCode>,
}

impl GeneratedCode {
    /// Text copied verbatim from `source` with one mapping.
    pub fn verbatim(text: &str, source: Span, data: super::mapping::CodeInformation) -> Self {
        Self {
            text: text.to_string(),
            mappings: vec![Mapping::offset(source.start, 0, text.len(), data)],
            teleports: Vec::new(),
            embedded: Vec::new(),
        }
    }
}

/// A nested virtual document derived from a generated parent.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedCode {
    pub id: String,
    pub language_id: String,
    pub code: GeneratedCode,
}

pub trait VirtualCodeGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this generator handles a host document.
    fn accepts(&self, language_id: &str, uri: &Url) -> bool;

    /// Cut the host text into blocks. Must not fail; malformed blocks are
    /// reported as unterminated slices.
    fn scan(&self, host_text: &str) -> Vec<BlockSlice>;

    /// Generate the virtual document for one block.
    fn generate(&self, slice: &BlockSlice, host_text: &str) -> YosegiResult<GeneratedCode>;

    /// Cheaper in-place update for a block whose shape did not change.
    ///
    /// Returning `None` falls back to [`generate`](Self::generate).
    fn patch(
        &self,
        _previous: &VirtualDocument,
        _slice: &BlockSlice,
        _host_text: &str,
    ) -> Option<GeneratedCode> {
        None
    }
}
