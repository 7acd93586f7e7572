//! Reverse mapping of plugin results into host coordinates.
//!
//! Every URI in a result falls into one of three cases:
//! 1. the document the plugin ran against, or another virtual document of the
//!    same host: ranges are mapped back and the URI becomes the host URI;
//! 2. a real file: kept as is;
//! 3. a virtual document this snapshot does not know: dropped.
//!
//! Sub-parts whose ranges do not map under the request's capability
//! predicate are dropped; a result left with nothing is treated as empty.

use std::collections::HashMap;

use serde_json::{Value, json};
use tower_lsp_server::ls_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, CodeAction,
    CodeActionOrCommand, CodeLens, CompletionItem, CompletionList, CompletionTextEdit, Diagnostic,
    DocumentChangeOperation, DocumentChanges, DocumentLink, DocumentSymbol, FoldingRange, Hover,
    InsertReplaceEdit, Location, LocationLink, OneOf, Position, PrepareRenameResponse, Range,
    SelectionRange, TextDocumentEdit, TextEdit, Uri, WorkspaceEdit,
};

use crate::document::{CodeFilter, DocumentMap, VirtualDocumentUri};
use crate::error::{YosegiError, YosegiResult};
use crate::lsp::{uri_to_url, url_to_uri};
use crate::plugin::Plugin;

/// Key of the origin envelope stored in `data` of resolvable items.
pub(crate) const ENVELOPE_KEY: &str = "yosegi";

/// Where a follow-up request (resolve, incoming/outgoing calls) must go.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Origin {
    pub plugin: String,
    pub document: String,
    pub original: Value,
}

impl Origin {
    pub(crate) fn wrap(&self) -> Value {
        json!({
            ENVELOPE_KEY: {
                "plugin": self.plugin,
                "document": self.document,
                "original": self.original,
            }
        })
    }

    /// Parse an envelope from item data.
    ///
    /// `Ok(None)` when the data carries no envelope; an envelope that is
    /// present but malformed is an invalid request.
    pub(crate) fn unwrap(data: Option<&Value>) -> YosegiResult<Option<Self>> {
        let Some(envelope) = data.and_then(|d| d.get(ENVELOPE_KEY)) else {
            return Ok(None);
        };
        let field = |name: &str| {
            envelope
                .get(name)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| YosegiError::invalid_request(format!("origin envelope without {name}")))
        };
        Ok(Some(Self {
            plugin: field("plugin")?,
            document: field("document")?,
            original: envelope.get("original").cloned().unwrap_or(Value::Null),
        }))
    }
}

enum Target {
    Mapped(DocumentMap),
    External,
}

/// Maps one plugin's result from the document it ran against to the host.
pub(crate) struct ResultMapper<'a> {
    map: &'a DocumentMap,
    filter: CodeFilter,
    plugin: &'a Plugin,
    host_uri: Option<Uri>,
}

impl<'a> ResultMapper<'a> {
    pub(crate) fn new(map: &'a DocumentMap, filter: CodeFilter, plugin: &'a Plugin) -> Self {
        Self {
            map,
            filter,
            plugin,
            host_uri: url_to_uri(map.snapshot().uri()).ok(),
        }
    }

    pub(crate) fn plugin(&self) -> &Plugin {
        self.plugin
    }

    pub(crate) fn document_map(&self) -> &DocumentMap {
        self.map
    }

    pub(crate) fn origin(&self, original: Value) -> Origin {
        Origin {
            plugin: self.plugin.id().to_string(),
            document: self.map.uri().to_string(),
            original,
        }
    }

    fn target(&self, uri: &Uri) -> Option<Target> {
        if uri.as_str() == self.map.uri().as_str() {
            return Some(Target::Mapped(self.map.clone()));
        }
        let Ok(url) = uri_to_url(uri) else {
            return Some(Target::External);
        };
        let snapshot = self.map.snapshot();
        if &url == snapshot.uri() {
            return Some(Target::Mapped(DocumentMap::host(snapshot.clone())));
        }
        if let Some((node, _)) = snapshot.virtual_document(&url) {
            return Some(Target::Mapped(DocumentMap::node(snapshot.clone(), node)));
        }
        if VirtualDocumentUri::is_virtual_uri(uri.as_str()) {
            return None;
        }
        Some(Target::External)
    }

    /// Range in the document the plugin ran against → host range.
    pub(crate) fn range(&self, range: Range) -> Option<Range> {
        self.map.to_host_lsp_range(range, self.filter)
    }

    pub(crate) fn position(&self, position: Position) -> Option<Position> {
        self.map
            .to_host_positions(position, self.filter)
            .into_iter()
            .next()
    }

    pub(crate) fn location(&self, uri: &Uri, range: Range) -> Option<(Uri, Range)> {
        match self.target(uri)? {
            Target::Mapped(map) => {
                let range = map.to_host_lsp_range(range, self.filter)?;
                Some((self.host_uri.clone()?, range))
            }
            Target::External => Some((uri.clone(), range)),
        }
    }

    fn range_in(&self, uri: &Uri, range: Range) -> Option<Range> {
        self.location(uri, range).map(|(_, r)| r)
    }

    pub(crate) fn text_edits(&self, edits: Vec<TextEdit>) -> Vec<TextEdit> {
        edits
            .into_iter()
            .filter_map(|edit| {
                Some(TextEdit {
                    range: self.range(edit.range)?,
                    new_text: edit.new_text,
                })
            })
            .collect()
    }

    fn text_edits_in(&self, map: &DocumentMap, edits: Vec<TextEdit>) -> Vec<TextEdit> {
        edits
            .into_iter()
            .filter_map(|edit| {
                Some(TextEdit {
                    range: map.to_host_lsp_range(edit.range, self.filter)?,
                    new_text: edit.new_text,
                })
            })
            .collect()
    }

    pub(crate) fn location_links(&self, links: Vec<LocationLink>) -> Vec<LocationLink> {
        links
            .into_iter()
            .filter_map(|link| {
                let (target_uri, target_range) =
                    self.location(&link.target_uri, link.target_range)?;
                let target_selection_range = self
                    .range_in(&link.target_uri, link.target_selection_range)
                    .unwrap_or(target_range);
                Some(LocationLink {
                    origin_selection_range: link.origin_selection_range.and_then(|r| self.range(r)),
                    target_uri,
                    target_range,
                    target_selection_range,
                })
            })
            .collect()
    }

    pub(crate) fn locations(&self, locations: Vec<Location>) -> Vec<Location> {
        locations
            .into_iter()
            .filter_map(|location| {
                let (uri, range) = self.location(&location.uri, location.range)?;
                Some(Location { uri, range })
            })
            .collect()
    }

    pub(crate) fn hover(&self, hover: Hover) -> Hover {
        Hover {
            range: hover.range.and_then(|r| self.range(r)),
            contents: hover.contents,
        }
    }

    pub(crate) fn prepare_rename(&self, response: PrepareRenameResponse) -> Option<PrepareRenameResponse> {
        match response {
            PrepareRenameResponse::Range(range) => self.range(range).map(PrepareRenameResponse::Range),
            PrepareRenameResponse::RangeWithPlaceholder { range, placeholder } => self
                .range(range)
                .map(|range| PrepareRenameResponse::RangeWithPlaceholder { range, placeholder }),
            other => Some(other),
        }
    }

    fn text_document_edit(&self, mut edit: TextDocumentEdit) -> Option<TextDocumentEdit> {
        match self.target(&edit.text_document.uri)? {
            Target::External => Some(edit),
            Target::Mapped(map) => {
                let edits: Vec<_> = edit
                    .edits
                    .into_iter()
                    .filter_map(|e| match e {
                        OneOf::Left(text_edit) => {
                            let range = map.to_host_lsp_range(text_edit.range, self.filter)?;
                            Some(OneOf::Left(TextEdit { range, ..text_edit }))
                        }
                        OneOf::Right(mut annotated) => {
                            annotated.text_edit.range =
                                map.to_host_lsp_range(annotated.text_edit.range, self.filter)?;
                            Some(OneOf::Right(annotated))
                        }
                    })
                    .collect();
                if edits.is_empty() {
                    return None;
                }
                edit.text_document.uri = self.host_uri.clone()?;
                edit.text_document.version = Some(map.snapshot().version());
                edit.edits = edits;
                Some(edit)
            }
        }
    }

    pub(crate) fn workspace_edit(&self, edit: WorkspaceEdit) -> Option<WorkspaceEdit> {
        let changes = edit.changes.map(|changes| {
            let mut mapped: HashMap<Uri, Vec<TextEdit>> = HashMap::new();
            for (uri, edits) in changes {
                let (key, edits) = match self.target(&uri) {
                    None => continue,
                    Some(Target::External) => (uri, edits),
                    Some(Target::Mapped(map)) => {
                        let Some(host_uri) = self.host_uri.clone() else {
                            continue;
                        };
                        (host_uri, self.text_edits_in(&map, edits))
                    }
                };
                if !edits.is_empty() {
                    mapped.entry(key).or_default().extend(edits);
                }
            }
            mapped
        });

        let document_changes = edit.document_changes.map(|changes| match changes {
            DocumentChanges::Edits(edits) => DocumentChanges::Edits(
                edits
                    .into_iter()
                    .filter_map(|e| self.text_document_edit(e))
                    .collect(),
            ),
            DocumentChanges::Operations(operations) => DocumentChanges::Operations(
                operations
                    .into_iter()
                    .filter_map(|op| match op {
                        DocumentChangeOperation::Edit(e) => {
                            self.text_document_edit(e).map(DocumentChangeOperation::Edit)
                        }
                        other => Some(other),
                    })
                    .collect(),
            ),
        });

        let changes = changes.filter(|c| !c.is_empty());
        let document_changes = document_changes.filter(|d| match d {
            DocumentChanges::Edits(e) => !e.is_empty(),
            DocumentChanges::Operations(o) => !o.is_empty(),
        });
        if changes.is_none() && document_changes.is_none() {
            return None;
        }
        Some(WorkspaceEdit {
            changes,
            document_changes,
            change_annotations: edit.change_annotations,
        })
    }

    pub(crate) fn diagnostic(&self, mut diagnostic: Diagnostic) -> Option<Diagnostic> {
        diagnostic.range = self.range(diagnostic.range)?;
        if let Some(related) = diagnostic.related_information.take() {
            let related: Vec<_> = related
                .into_iter()
                .filter_map(|mut info| {
                    let (uri, range) = self.location(&info.location.uri, info.location.range)?;
                    info.location = Location { uri, range };
                    Some(info)
                })
                .collect();
            diagnostic.related_information = (!related.is_empty()).then_some(related);
        }
        Some(diagnostic)
    }

    fn completion_edit(&self, edit: CompletionTextEdit) -> Option<CompletionTextEdit> {
        match edit {
            CompletionTextEdit::Edit(edit) => Some(CompletionTextEdit::Edit(TextEdit {
                range: self.range(edit.range)?,
                new_text: edit.new_text,
            })),
            CompletionTextEdit::InsertAndReplace(edit) => {
                Some(CompletionTextEdit::InsertAndReplace(InsertReplaceEdit {
                    insert: self.range(edit.insert)?,
                    replace: self.range(edit.replace)?,
                    new_text: edit.new_text,
                }))
            }
        }
    }

    /// Map one completion item; `None` when its primary edit does not map.
    pub(crate) fn completion_item(&self, mut item: CompletionItem) -> Option<CompletionItem> {
        if let Some(edit) = item.text_edit.take() {
            item.text_edit = Some(self.completion_edit(edit)?);
        }
        if let Some(additional) = item.additional_text_edits.take() {
            item.additional_text_edits = Some(self.text_edits(additional));
        }
        Some(item)
    }

    pub(crate) fn completion_list(&self, list: CompletionList) -> CompletionList {
        let resolvable = self.plugin.handlers().completion_resolve.is_some();
        let items = list
            .items
            .into_iter()
            .filter_map(|item| {
                let original = resolvable.then(|| serde_json::to_value(&item).ok()).flatten();
                let mut mapped = self.completion_item(item)?;
                if let Some(original) = original {
                    mapped.data = Some(self.origin(original).wrap());
                }
                Some(mapped)
            })
            .collect();
        CompletionList {
            is_incomplete: list.is_incomplete,
            items,
        }
    }

    pub(crate) fn folding_range(&self, range: FoldingRange) -> Option<FoldingRange> {
        let start = self.position(Position {
            line: range.start_line,
            character: range.start_character.unwrap_or(0),
        })?;
        let end = self.position(Position {
            line: range.end_line,
            character: range.end_character.unwrap_or(0),
        })?;
        if end.line < start.line {
            return None;
        }
        Some(FoldingRange {
            start_line: start.line,
            start_character: range.start_character.map(|_| start.character),
            end_line: end.line,
            end_character: range.end_character.map(|_| end.character),
            ..range
        })
    }

    /// Map a selection range chain, skipping links that do not map.
    pub(crate) fn selection_range(&self, range: SelectionRange) -> Option<SelectionRange> {
        let mut mapped = Vec::new();
        let mut current = Some(range);
        while let Some(link) = current {
            if let Some(r) = self.range(link.range) {
                mapped.push(r);
            }
            current = link.parent.map(|p| *p);
        }
        mapped.into_iter().rev().fold(None, |parent, range| {
            Some(SelectionRange {
                range,
                parent: parent.map(Box::new),
            })
        })
    }

    pub(crate) fn code_action(&self, action: CodeActionOrCommand) -> Option<CodeActionOrCommand> {
        match action {
            CodeActionOrCommand::Command(command) => Some(CodeActionOrCommand::Command(command)),
            CodeActionOrCommand::CodeAction(action) => {
                let edit = match action.edit {
                    Some(edit) => Some(self.workspace_edit(edit)?),
                    None => None,
                };
                let diagnostics = action
                    .diagnostics
                    .map(|d| d.into_iter().filter_map(|d| self.diagnostic(d)).collect());
                Some(CodeActionOrCommand::CodeAction(CodeAction {
                    edit,
                    diagnostics,
                    ..action
                }))
            }
        }
    }

    pub(crate) fn code_lens(&self, lens: CodeLens) -> Option<CodeLens> {
        Some(CodeLens {
            range: self.range(lens.range)?,
            ..lens
        })
    }

    pub(crate) fn document_link(&self, link: DocumentLink) -> Option<DocumentLink> {
        Some(DocumentLink {
            range: self.range(link.range)?,
            ..link
        })
    }

    pub(crate) fn document_symbol(&self, mut symbol: DocumentSymbol) -> Option<DocumentSymbol> {
        let range = self.range(symbol.range)?;
        symbol.selection_range = self
            .range(symbol.selection_range)
            .filter(|s| s.start >= range.start && s.end <= range.end)
            .unwrap_or(range);
        symbol.range = range;
        symbol.children = symbol.children.take().map(|children| {
            children
                .into_iter()
                .filter_map(|c| self.document_symbol(c))
                .collect()
        });
        Some(symbol)
    }

    /// Map a call hierarchy item and wrap the original in an origin envelope.
    pub(crate) fn call_hierarchy_item(&self, item: CallHierarchyItem) -> Option<CallHierarchyItem> {
        let original = serde_json::to_value(&item).ok()?;
        let (uri, range) = self.location(&item.uri, item.range)?;
        let selection_range = self
            .range_in(&item.uri, item.selection_range)
            .unwrap_or(range);
        Some(CallHierarchyItem {
            uri,
            range,
            selection_range,
            data: Some(self.origin(original).wrap()),
            ..item
        })
    }

    pub(crate) fn incoming_call(&self, call: CallHierarchyIncomingCall) -> Option<CallHierarchyIncomingCall> {
        // `from_ranges` are relative to the caller
        let caller_uri = call.from.uri.clone();
        let from_ranges = call
            .from_ranges
            .into_iter()
            .filter_map(|r| self.range_in(&caller_uri, r))
            .collect();
        Some(CallHierarchyIncomingCall {
            from: self.call_hierarchy_item(call.from)?,
            from_ranges,
        })
    }

    pub(crate) fn outgoing_call(&self, call: CallHierarchyOutgoingCall) -> Option<CallHierarchyOutgoingCall> {
        // `from_ranges` are relative to the item the request was made for
        let from_ranges = call
            .from_ranges
            .into_iter()
            .filter_map(|r| self.range(r))
            .collect();
        Some(CallHierarchyOutgoingCall {
            to: self.call_hierarchy_item(call.to)?,
            from_ranges,
        })
    }
}
