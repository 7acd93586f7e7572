//! Host-level block structure: unterminated-block diagnostics, one folding
//! range and one symbol per block.

use tower_lsp_server::ls_types::{
    Diagnostic, DiagnosticSeverity, DocumentSymbol, FoldingRange, FoldingRangeKind, SymbolKind,
};

use crate::document::{BlockSlice, DocumentRegistry};
use crate::plugin::{Plugin, PluginDocument};

pub const ID: &str = "sfc-structure";

/// Top-level blocks as the generator saw them, so configured block
/// languages show up in symbol details.
fn blocks(document: &PluginDocument, registry: &DocumentRegistry) -> Option<Vec<BlockSlice>> {
    // virtual documents have no top-level blocks of their own
    if !document.is_host() {
        return None;
    }
    let snapshot = registry.snapshot(document.uri())?;
    if snapshot.version() != document.version() {
        return None;
    }
    let blocks: Vec<BlockSlice> = snapshot.tree()?.slices().cloned().collect();
    (!blocks.is_empty()).then_some(blocks)
}

fn missing_end_tags(document: &PluginDocument, registry: &DocumentRegistry) -> Vec<Diagnostic> {
    let Some(blocks) = blocks(document, registry) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|block| !block.terminated)
        .filter_map(|block| {
            let range = document.range_of(block.outer.start, block.content.start)?;
            Some(Diagnostic {
                range,
                severity: Some(DiagnosticSeverity::ERROR),
                source: Some("yosegi".to_string()),
                message: format!("Element is missing end tag </{}>.", block.kind),
                ..Default::default()
            })
        })
        .collect()
}

fn block_folds(document: &PluginDocument, registry: &DocumentRegistry) -> Vec<FoldingRange> {
    let Some(blocks) = blocks(document, registry) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| {
            let range = document.range_of(block.outer.start, block.outer.end)?;
            (range.end.line > range.start.line).then(|| FoldingRange {
                start_line: range.start.line,
                end_line: range.end.line,
                kind: Some(FoldingRangeKind::Region),
                ..Default::default()
            })
        })
        .collect()
}

fn block_symbols(document: &PluginDocument, registry: &DocumentRegistry) -> Vec<DocumentSymbol> {
    let Some(blocks) = blocks(document, registry) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter_map(|block| {
            let range = document.range_of(block.outer.start, block.outer.end)?;
            let selection_range = document.range_of(block.outer.start, block.content.start)?;
            #[allow(deprecated)]
            let symbol = DocumentSymbol {
                name: block.kind.clone(),
                detail: Some(block.language_id.clone()),
                kind: SymbolKind::MODULE,
                tags: None,
                deprecated: None,
                range,
                selection_range,
                children: None,
            };
            Some(symbol)
        })
        .collect()
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

/// Plugin answering for `.vue` host documents.
pub fn plugin() -> Plugin {
    Plugin::builder(ID)
        .languages(["vue", "sfc"])
        .on_diagnostics(|doc, (), ctx| async move {
            Ok(non_empty(missing_end_tags(&doc, ctx.registry())))
        })
        .on_folding_ranges(|doc, (), ctx| async move {
            Ok(non_empty(block_folds(&doc, ctx.registry())))
        })
        .on_document_symbols(|doc, (), ctx| async move {
            Ok(non_empty(block_symbols(&doc, ctx.registry())))
        })
        .build()
}
