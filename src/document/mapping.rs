//! Capability-tagged offset mappings between a source text and a generated text.
//!
//! A [`MappingTable`] belongs to exactly one virtual document and relates it to
//! its parent (the host document or another virtual document). Overlapping
//! mappings are legal, so every query returns all matches in table order.

use rust_lapper::{Interval, Lapper};
use serde::Serialize;

/// Which request kinds may use a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CodeInformation {
    pub completion: bool,
    pub hover: bool,
    pub definition: bool,
    pub references: bool,
    pub rename: bool,
    pub formatting: bool,
    pub diagnostics: bool,
    pub semantic_tokens: bool,
    pub folding: bool,
    pub selection: bool,
    pub links: bool,
    pub symbols: bool,
    pub code_actions: bool,
    pub code_lenses: bool,
    pub call_hierarchy: bool,
    pub signature_help: bool,
}

impl CodeInformation {
    pub const fn all() -> Self {
        Self {
            completion: true,
            hover: true,
            definition: true,
            references: true,
            rename: true,
            formatting: true,
            diagnostics: true,
            semantic_tokens: true,
            folding: true,
            selection: true,
            links: true,
            symbols: true,
            code_actions: true,
            code_lenses: true,
            call_hierarchy: true,
            signature_help: true,
        }
    }

    pub const fn none() -> Self {
        Self {
            completion: false,
            hover: false,
            definition: false,
            references: false,
            rename: false,
            formatting: false,
            diagnostics: false,
            semantic_tokens: false,
            folding: false,
            selection: false,
            links: false,
            symbols: false,
            code_actions: false,
            code_lenses: false,
            call_hierarchy: false,
            signature_help: false,
        }
    }

    /// Navigation only: definition, references and rename.
    pub const fn navigation() -> Self {
        Self {
            definition: true,
            references: true,
            rename: true,
            ..Self::none()
        }
    }
}

/// Half-open byte span `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub const fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub const fn len(&self) -> usize {
        self.end - self.start
    }

    pub const fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Inclusive of `end` so a cursor sitting right after the span still hits it.
    pub const fn contains(&self, offset: usize) -> bool {
        self.start <= offset && offset <= self.end
    }

    pub fn shifted(&self, delta: isize) -> Self {
        Self {
            start: self.start.saturating_add_signed(delta),
            end: self.end.saturating_add_signed(delta),
        }
    }
}

/// How offsets inside a mapping translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SegmentMode {
    /// 1:1, both sides have the same length.
    #[default]
    Offset,
    /// The sides differ in length. Endpoints map to endpoints, interior
    /// offsets clamp into the target span.
    Expand,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mapping {
    pub source: Span,
    pub generated: Span,
    pub data: CodeInformation,
    pub mode: SegmentMode,
}

impl Mapping {
    /// A 1:1 mapping of `len` bytes.
    pub fn offset(source_start: usize, generated_start: usize, len: usize, data: CodeInformation) -> Self {
        Self {
            source: Span::new(source_start, source_start + len),
            generated: Span::new(generated_start, generated_start + len),
            data,
            mode: SegmentMode::Offset,
        }
    }

    pub fn expand(source: Span, generated: Span, data: CodeInformation) -> Self {
        Self {
            source,
            generated,
            data,
            mode: SegmentMode::Expand,
        }
    }

    fn translate(&self, from: Span, to: Span, offset: usize) -> usize {
        let relative = offset - from.start;
        match self.mode {
            SegmentMode::Offset => to.start + relative,
            SegmentMode::Expand => {
                if offset == from.end {
                    to.end
                } else {
                    to.start + relative.min(to.len())
                }
            }
        }
    }

    pub fn to_generated(&self, source_offset: usize) -> Option<usize> {
        self.source
            .contains(source_offset)
            .then(|| self.translate(self.source, self.generated, source_offset))
    }

    pub fn to_source(&self, generated_offset: usize) -> Option<usize> {
        self.generated
            .contains(generated_offset)
            .then(|| self.translate(self.generated, self.source, generated_offset))
    }
}

#[derive(Clone, Copy)]
enum Side {
    Source,
    Generated,
}

/// Immutable, queryable set of mappings for one virtual document.
#[derive(Clone)]
pub struct MappingTable {
    mappings: Vec<Mapping>,
    by_source: Lapper<usize, usize>,
    by_generated: Lapper<usize, usize>,
}

impl std::fmt::Debug for MappingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MappingTable")
            .field("mappings", &self.mappings)
            .finish_non_exhaustive()
    }
}

impl Default for MappingTable {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PartialEq for MappingTable {
    fn eq(&self, other: &Self) -> bool {
        self.mappings == other.mappings
    }
}

fn build_index(mappings: &[Mapping], side: Side) -> Lapper<usize, usize> {
    let intervals = mappings
        .iter()
        .enumerate()
        .map(|(index, mapping)| {
            let span = match side {
                Side::Source => mapping.source,
                Side::Generated => mapping.generated,
            };
            // Stored one past the end so that `end` itself is a hit and empty
            // spans still form a valid interval.
            Interval {
                start: span.start,
                stop: span.end + 1,
                val: index,
            }
        })
        .collect();
    Lapper::new(intervals)
}

impl MappingTable {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        let by_source = build_index(&mappings, Side::Source);
        let by_generated = build_index(&mappings, Side::Generated);
        Self {
            mappings,
            by_source,
            by_generated,
        }
    }

    pub fn mappings(&self) -> &[Mapping] {
        &self.mappings
    }

    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }

    /// Indices of mappings touching `offset` on `side`, in table order.
    fn hits(&self, side: Side, offset: usize) -> Vec<usize> {
        let index = match side {
            Side::Source => &self.by_source,
            Side::Generated => &self.by_generated,
        };
        let mut hits: Vec<usize> = index.find(offset, offset + 1).map(|iv| iv.val).collect();
        hits.sort_unstable();
        hits
    }

    fn offsets(
        &self,
        side: Side,
        offset: usize,
        filter: &dyn Fn(&CodeInformation) -> bool,
    ) -> Vec<usize> {
        let mut result = Vec::new();
        for index in self.hits(side, offset) {
            let mapping = &self.mappings[index];
            if !filter(&mapping.data) {
                continue;
            }
            let mapped = match side {
                Side::Source => mapping.to_generated(offset),
                Side::Generated => mapping.to_source(offset),
            };
            if let Some(mapped) = mapped
                && !result.contains(&mapped)
            {
                result.push(mapped);
            }
        }
        result
    }

    /// All generated offsets for a source offset under `filter`.
    pub fn to_generated_offsets(
        &self,
        source_offset: usize,
        filter: impl Fn(&CodeInformation) -> bool,
    ) -> Vec<usize> {
        self.offsets(Side::Source, source_offset, &filter)
    }

    /// All source offsets for a generated offset under `filter`.
    pub fn to_source_offsets(
        &self,
        generated_offset: usize,
        filter: impl Fn(&CodeInformation) -> bool,
    ) -> Vec<usize> {
        self.offsets(Side::Generated, generated_offset, &filter)
    }

    fn ranges(
        &self,
        side: Side,
        start: usize,
        end: usize,
        filter: &dyn Fn(&CodeInformation) -> bool,
    ) -> Vec<(usize, usize)> {
        let mut result = Vec::new();

        // Prefer a single mapping covering both ends.
        for index in self.hits(side, start) {
            let mapping = &self.mappings[index];
            if !filter(&mapping.data) {
                continue;
            }
            let pair = match side {
                Side::Source => mapping.to_generated(start).zip(mapping.to_generated(end)),
                Side::Generated => mapping.to_source(start).zip(mapping.to_source(end)),
            };
            if let Some((s, e)) = pair
                && s <= e
                && !result.contains(&(s, e))
            {
                result.push((s, e));
            }
        }
        if !result.is_empty() {
            return result;
        }

        // Ends land in different mappings.
        let starts = self.offsets(side, start, filter);
        let ends = self.offsets(side, end, filter);
        for s in &starts {
            for e in &ends {
                if s <= e && !result.contains(&(*s, *e)) {
                    result.push((*s, *e));
                }
            }
        }
        result
    }

    pub fn to_generated_ranges(
        &self,
        start: usize,
        end: usize,
        filter: impl Fn(&CodeInformation) -> bool,
    ) -> Vec<(usize, usize)> {
        self.ranges(Side::Source, start, end, &filter)
    }

    pub fn to_source_ranges(
        &self,
        start: usize,
        end: usize,
        filter: impl Fn(&CodeInformation) -> bool,
    ) -> Vec<(usize, usize)> {
        self.ranges(Side::Generated, start, end, &filter)
    }

    /// Copy of this table with every source span shifted by `delta`.
    ///
    /// Used when a block moves inside the host without changing content.
    pub fn rebased(&self, delta: isize) -> Self {
        if delta == 0 {
            return self.clone();
        }
        Self::new(
            self.mappings
                .iter()
                .map(|m| Mapping {
                    source: m.source.shifted(delta),
                    ..m.clone()
                })
                .collect(),
        )
    }
}
