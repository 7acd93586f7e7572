//! Combining and deduplicating results from several (document, plugin) pairs.

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use tower_lsp_server::ls_types::{
    CompletionList, DocumentChanges, Hover, HoverContents, LanguageString, Location,
    LocationLink, MarkedString, MarkupContent, MarkupKind, Position, Range, SelectionRange,
    SignatureHelp, TextEdit, Uri, WorkspaceEdit,
};

fn range_key(range: &Range) -> (u32, u32, u32, u32) {
    (
        range.start.line,
        range.start.character,
        range.end.line,
        range.end.character,
    )
}

/// Dedupe by (uri, range); first occurrence wins.
pub fn dedup_locations(locations: Vec<Location>) -> Vec<Location> {
    let mut seen = HashSet::new();
    locations
        .into_iter()
        .filter(|l| seen.insert((l.uri.as_str().to_string(), range_key(&l.range))))
        .collect()
}

/// Dedupe by (target uri, target selection range); first occurrence wins.
pub fn dedup_location_links(links: Vec<LocationLink>) -> Vec<LocationLink> {
    let mut seen = HashSet::new();
    links
        .into_iter()
        .filter(|l| {
            seen.insert((
                l.target_uri.as_str().to_string(),
                range_key(&l.target_selection_range),
            ))
        })
        .collect()
}

pub fn concat<T>(mut acc: Vec<T>, next: Vec<T>) -> Vec<T> {
    acc.extend(next);
    acc
}

pub fn merge_completion(mut acc: CompletionList, next: CompletionList) -> CompletionList {
    acc.is_incomplete |= next.is_incomplete;
    acc.items.extend(next.items);
    acc
}

/// Drop implementation-only items such as generated helper names.
pub fn strip_internal_items(mut list: CompletionList, prefix: &str) -> CompletionList {
    if !prefix.is_empty() {
        list.items.retain(|item| !item.label.starts_with(prefix));
    }
    list
}

fn marked_to_markdown(marked: MarkedString) -> String {
    match marked {
        MarkedString::String(s) => s,
        MarkedString::LanguageString(LanguageString { language, value }) => {
            format!("```{language}\n{value}\n```")
        }
    }
}

fn hover_markdown(contents: HoverContents) -> String {
    match contents {
        HoverContents::Scalar(marked) => marked_to_markdown(marked),
        HoverContents::Array(items) => items
            .into_iter()
            .map(marked_to_markdown)
            .collect::<Vec<_>>()
            .join("\n\n"),
        HoverContents::Markup(markup) => markup.value,
    }
}

/// Concatenate hover contents into one markdown block; the first range wins.
pub fn merge_hover(acc: Hover, next: Hover) -> Hover {
    let value = format!(
        "{}\n\n---\n\n{}",
        hover_markdown(acc.contents),
        hover_markdown(next.contents)
    );
    Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value,
        }),
        range: acc.range.or(next.range),
    }
}

pub fn merge_signature_help(mut acc: SignatureHelp, next: SignatureHelp) -> SignatureHelp {
    acc.signatures.extend(next.signatures);
    acc
}

fn dedup_edits(edits: &mut Vec<TextEdit>) {
    let mut seen = HashSet::new();
    edits.retain(|e| seen.insert((range_key(&e.range), e.new_text.clone())));
}

/// Concatenate per-URI edits and drop exact duplicates.
pub fn merge_workspace_edit(acc: WorkspaceEdit, next: WorkspaceEdit) -> WorkspaceEdit {
    let changes = match (acc.changes, next.changes) {
        (None, None) => None,
        (a, b) => {
            let mut merged: HashMap<Uri, Vec<TextEdit>> = a.unwrap_or_default();
            for (uri, edits) in b.unwrap_or_default() {
                merged.entry(uri).or_default().extend(edits);
            }
            merged.values_mut().for_each(dedup_edits);
            Some(merged)
        }
    };

    let document_changes = match (acc.document_changes, next.document_changes) {
        (None, None) => None,
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (Some(DocumentChanges::Edits(mut a)), Some(DocumentChanges::Edits(b))) => {
            let fresh: Vec<_> = b.into_iter().filter(|e| !a.contains(e)).collect();
            a.extend(fresh);
            Some(DocumentChanges::Edits(a))
        }
        (Some(a), Some(b)) => {
            let mut operations = into_operations(a);
            for op in into_operations(b) {
                if !operations.contains(&op) {
                    operations.push(op);
                }
            }
            Some(DocumentChanges::Operations(operations))
        }
    };

    let change_annotations = match (acc.change_annotations, next.change_annotations) {
        (None, None) => None,
        (a, b) => {
            let mut merged = a.unwrap_or_default();
            merged.extend(b.unwrap_or_default());
            Some(merged)
        }
    };

    WorkspaceEdit {
        changes,
        document_changes,
        change_annotations,
    }
}

fn into_operations(
    changes: DocumentChanges,
) -> Vec<tower_lsp_server::ls_types::DocumentChangeOperation> {
    use tower_lsp_server::ls_types::DocumentChangeOperation;
    match changes {
        DocumentChanges::Edits(edits) => edits.into_iter().map(DocumentChangeOperation::Edit).collect(),
        DocumentChanges::Operations(operations) => operations,
    }
}

fn contains(outer: &Range, inner: &Range) -> bool {
    outer.start <= inner.start && inner.end <= outer.end
}

/// Merge selection range chains from several documents into one chain for
/// `position`, innermost first.
///
/// Every range containing the position takes part; ranges are ordered by
/// containment so a block-level range from the host wraps the finer ranges
/// produced inside a virtual document.
pub fn nest_selection_ranges(position: Position, chains: Vec<SelectionRange>) -> Option<SelectionRange> {
    let mut ranges: Vec<Range> = Vec::new();
    for chain in chains {
        let mut current = Some(chain);
        while let Some(link) = current {
            let r = link.range;
            if r.start <= position && position <= r.end && !ranges.contains(&r) {
                ranges.push(r);
            }
            current = link.parent.map(|p| *p);
        }
    }

    // Every range contains the position, so a contained range starts no
    // earlier and ends no later than its container.
    ranges.sort_by_key(|r| {
        (
            Reverse((r.start.line, r.start.character)),
            (r.end.line, r.end.character),
        )
    });

    // Keep a strictly growing chain.
    let mut chain: Vec<Range> = Vec::new();
    for range in ranges {
        if chain.last().is_none_or(|last| contains(&range, last)) {
            chain.push(range);
        }
    }

    chain.into_iter().rev().fold(None, |parent, range| {
        Some(SelectionRange {
            range,
            parent: parent.map(Box::new),
        })
    })
}
