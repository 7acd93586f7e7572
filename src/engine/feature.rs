//! Request kinds as seen by the dispatch engine.
//!
//! Each kind ties together its plugin handler, capability predicate,
//! accumulation policy, argument translation, result mapping and merge.

use serde::Serialize;
use tower_lsp_server::ls_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, CodeActionContext,
    CodeActionOrCommand, CodeLens, CompletionItem, CompletionList, Diagnostic, DocumentChanges,
    DocumentLink, DocumentSymbol, FoldingRange, FormattingOptions, Hover, Location, LocationLink,
    OneOf, Position, PrepareRenameResponse, Range, SelectionRange, SemanticTokens, SignatureHelp,
    TextEdit, WorkspaceEdit,
};

use super::context::RequestContext;
use super::merge;
use super::semantic;
use super::transform::ResultMapper;
use super::capability;
use crate::document::{CodeFilter, DocumentMap};
use crate::plugin::{
    CodeActionArgs, CompletionArgs, Handler, Plugin, RangeFormattingArgs, ReferencesArgs,
    RenameArgs, SignatureHelpArgs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// The first main (plugin, document) pair with a result locks that
    /// document; only additional plugins on it still contribute.
    FirstMatch,
    /// Every pair contributes, merged in walk order.
    Combine,
}

/// How a kind follows teleports found in its results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeleportMode {
    Off,
    /// Teleported candidates are replaced by what their targets resolve to.
    Replace,
    /// Teleported candidates are kept and their targets are queried too.
    Extend,
}

pub(crate) trait Feature {
    type Arg: Clone + Send + 'static;
    type Output: Serialize + Send + 'static;

    const NAME: &'static str;
    const POLICY: Policy;
    const FILTER: CodeFilter;
    const TELEPORT: TeleportMode = TeleportMode::Off;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>>;

    fn trigger(_arg: &Self::Arg) -> Option<&str> {
        None
    }

    /// Host argument → zero or more arguments in the target document.
    fn transform_arg(arg: &Self::Arg, map: &DocumentMap) -> Vec<Self::Arg>;

    /// Target document result → host result; `None` if nothing maps.
    fn transform_result(
        output: Self::Output,
        mapper: &ResultMapper<'_>,
        ctx: &RequestContext,
    ) -> Option<Self::Output>;

    fn is_empty(output: &Self::Output) -> bool;

    fn combine(acc: Self::Output, next: Self::Output) -> Self::Output;

    /// Ranges of the result inside the document identified by `uri`.
    fn ranges_in(_output: &Self::Output, _uri: &str) -> Vec<Range> {
        Vec::new()
    }

    /// Position the request was asked at, for positional kinds.
    fn position(_arg: &Self::Arg) -> Option<Position> {
        None
    }

    fn at_position(arg: &Self::Arg, _position: Position) -> Self::Arg {
        arg.clone()
    }

    /// Remove candidates in `uri` for which `teleported` holds.
    fn prune(output: Self::Output, _uri: &str, _teleported: &dyn Fn(&Range) -> bool) -> Self::Output {
        output
    }

    fn origin(_output: &Self::Output) -> Option<Range> {
        None
    }

    fn with_origin(output: Self::Output, _origin: Option<Range>) -> Self::Output {
        output
    }
}

fn positions(position: Position, map: &DocumentMap, filter: CodeFilter) -> Vec<Position> {
    map.to_virtual_positions(position, filter)
}

/// Whole-document requests run against the host, or against a virtual
/// document with at least one mapping passing the predicate.
fn whole_document<T: Clone>(arg: &T, map: &DocumentMap, filter: CodeFilter) -> Vec<T> {
    let applicable = match map.virtual_document() {
        None => true,
        Some(doc) => doc.mappings().mappings().iter().any(|m| filter(&m.data)),
    };
    if applicable { vec![arg.clone()] } else { Vec::new() }
}

fn non_empty<T>(items: Vec<T>) -> Option<Vec<T>> {
    (!items.is_empty()).then_some(items)
}

pub(crate) struct CompletionRequest;

impl Feature for CompletionRequest {
    type Arg = CompletionArgs;
    type Output = CompletionList;
    const NAME: &'static str = "completion";
    const POLICY: Policy = Policy::Combine;
    const FILTER: CodeFilter = capability::completion;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().completion.as_ref()
    }

    fn trigger(arg: &Self::Arg) -> Option<&str> {
        arg.trigger_character()
    }

    fn transform_arg(arg: &Self::Arg, map: &DocumentMap) -> Vec<Self::Arg> {
        positions(arg.position, map, Self::FILTER)
            .into_iter()
            .map(|position| CompletionArgs {
                position,
                context: arg.context.clone(),
            })
            .collect()
    }

    /// Internal items are stripped per contribution so progress reports
    /// never carry them either.
    fn transform_result(output: CompletionList, mapper: &ResultMapper<'_>, ctx: &RequestContext) -> Option<CompletionList> {
        let list = mapper.completion_list(output);
        Some(merge::strip_internal_items(list, ctx.internal_item_prefix()))
    }

    fn is_empty(output: &CompletionList) -> bool {
        output.items.is_empty() && !output.is_incomplete
    }

    fn combine(acc: CompletionList, next: CompletionList) -> CompletionList {
        merge::merge_completion(acc, next)
    }
}

pub(crate) struct CompletionResolveRequest;

impl Feature for CompletionResolveRequest {
    type Arg = CompletionItem;
    type Output = CompletionItem;
    const NAME: &'static str = "completionItem/resolve";
    const POLICY: Policy = Policy::FirstMatch;
    const FILTER: CodeFilter = capability::completion;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().completion_resolve.as_ref()
    }

    fn transform_arg(arg: &Self::Arg, _map: &DocumentMap) -> Vec<Self::Arg> {
        vec![arg.clone()]
    }

    fn transform_result(output: CompletionItem, mapper: &ResultMapper<'_>, _: &RequestContext) -> Option<CompletionItem> {
        mapper.completion_item(output)
    }

    fn is_empty(_output: &CompletionItem) -> bool {
        false
    }

    fn combine(acc: CompletionItem, _next: CompletionItem) -> CompletionItem {
        acc
    }
}

pub(crate) struct HoverRequest;

impl Feature for HoverRequest {
    type Arg = Position;
    type Output = Hover;
    const NAME: &'static str = "hover";
    const POLICY: Policy = Policy::FirstMatch;
    const FILTER: CodeFilter = capability::hover;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().hover.as_ref()
    }

    fn transform_arg(arg: &Position, map: &DocumentMap) -> Vec<Position> {
        positions(*arg, map, Self::FILTER)
    }

    fn transform_result(output: Hover, mapper: &ResultMapper<'_>, _: &RequestContext) -> Option<Hover> {
        Some(mapper.hover(output))
    }

    fn is_empty(output: &Hover) -> bool {
        use tower_lsp_server::ls_types::{HoverContents, MarkedString};
        match &output.contents {
            HoverContents::Scalar(MarkedString::String(s)) => s.is_empty(),
            HoverContents::Scalar(MarkedString::LanguageString(l)) => l.value.is_empty(),
            HoverContents::Array(items) => items.is_empty(),
            HoverContents::Markup(markup) => markup.value.is_empty(),
        }
    }

    fn combine(acc: Hover, next: Hover) -> Hover {
        merge::merge_hover(acc, next)
    }
}

pub(crate) struct SignatureHelpRequest;

impl Feature for SignatureHelpRequest {
    type Arg = SignatureHelpArgs;
    type Output = SignatureHelp;
    const NAME: &'static str = "signatureHelp";
    const POLICY: Policy = Policy::FirstMatch;
    const FILTER: CodeFilter = capability::signature_help;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().signature_help.as_ref()
    }

    fn trigger(arg: &Self::Arg) -> Option<&str> {
        arg.trigger_character()
    }

    fn transform_arg(arg: &Self::Arg, map: &DocumentMap) -> Vec<Self::Arg> {
        positions(arg.position, map, Self::FILTER)
            .into_iter()
            .map(|position| SignatureHelpArgs {
                position,
                context: arg.context.clone(),
            })
            .collect()
    }

    fn transform_result(output: SignatureHelp, _: &ResultMapper<'_>, _: &RequestContext) -> Option<SignatureHelp> {
        Some(output)
    }

    fn is_empty(output: &SignatureHelp) -> bool {
        output.signatures.is_empty()
    }

    fn combine(acc: SignatureHelp, next: SignatureHelp) -> SignatureHelp {
        merge::merge_signature_help(acc, next)
    }
}

fn link_ranges_in(links: &[LocationLink], uri: &str) -> Vec<Range> {
    links
        .iter()
        .filter(|l| l.target_uri.as_str() == uri)
        .map(|l| l.target_selection_range)
        .collect()
}

fn prune_links(links: Vec<LocationLink>, uri: &str, teleported: &dyn Fn(&Range) -> bool) -> Vec<LocationLink> {
    links
        .into_iter()
        .filter(|l| !(l.target_uri.as_str() == uri && teleported(&l.target_selection_range)))
        .collect()
}

fn links_with_origin(links: Vec<LocationLink>, origin: Option<Range>) -> Vec<LocationLink> {
    links
        .into_iter()
        .map(|l| LocationLink {
            origin_selection_range: origin.or(l.origin_selection_range),
            ..l
        })
        .collect()
}

macro_rules! goto_feature {
    ($name:ident, $field:ident, $method:literal) => {
        pub(crate) struct $name;

        impl Feature for $name {
            type Arg = Position;
            type Output = Vec<LocationLink>;
            const NAME: &'static str = $method;
            const POLICY: Policy = Policy::Combine;
            const FILTER: CodeFilter = capability::definition;
            const TELEPORT: TeleportMode = TeleportMode::Replace;

            fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
                plugin.handlers().$field.as_ref()
            }

            fn transform_arg(arg: &Position, map: &DocumentMap) -> Vec<Position> {
                positions(*arg, map, Self::FILTER)
            }

            fn transform_result(
                output: Vec<LocationLink>,
                mapper: &ResultMapper<'_>,
                _: &RequestContext,
            ) -> Option<Vec<LocationLink>> {
                non_empty(mapper.location_links(output))
            }

            fn is_empty(output: &Vec<LocationLink>) -> bool {
                output.is_empty()
            }

            fn combine(acc: Vec<LocationLink>, next: Vec<LocationLink>) -> Vec<LocationLink> {
                merge::dedup_location_links(merge::concat(acc, next))
            }

            fn ranges_in(output: &Vec<LocationLink>, uri: &str) -> Vec<Range> {
                link_ranges_in(output, uri)
            }

            fn position(arg: &Position) -> Option<Position> {
                Some(*arg)
            }

            fn at_position(_arg: &Position, position: Position) -> Position {
                position
            }

            fn prune(
                output: Vec<LocationLink>,
                uri: &str,
                teleported: &dyn Fn(&Range) -> bool,
            ) -> Vec<LocationLink> {
                prune_links(output, uri, teleported)
            }

            fn origin(output: &Vec<LocationLink>) -> Option<Range> {
                output.iter().find_map(|l| l.origin_selection_range)
            }

            fn with_origin(output: Vec<LocationLink>, origin: Option<Range>) -> Vec<LocationLink> {
                links_with_origin(output, origin)
            }
        }
    };
}

goto_feature!(DefinitionRequest, definition, "definition");
goto_feature!(TypeDefinitionRequest, type_definition, "typeDefinition");
goto_feature!(ImplementationRequest, implementation, "implementation");

pub(crate) struct ReferencesRequest;

impl Feature for ReferencesRequest {
    type Arg = ReferencesArgs;
    type Output = Vec<Location>;
    const NAME: &'static str = "references";
    const POLICY: Policy = Policy::Combine;
    const FILTER: CodeFilter = capability::references;
    const TELEPORT: TeleportMode = TeleportMode::Extend;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().references.as_ref()
    }

    fn transform_arg(arg: &ReferencesArgs, map: &DocumentMap) -> Vec<ReferencesArgs> {
        positions(arg.position, map, Self::FILTER)
            .into_iter()
            .map(|position| ReferencesArgs { position, ..*arg })
            .collect()
    }

    fn transform_result(output: Vec<Location>, mapper: &ResultMapper<'_>, _: &RequestContext) -> Option<Vec<Location>> {
        non_empty(mapper.locations(output))
    }

    fn is_empty(output: &Vec<Location>) -> bool {
        output.is_empty()
    }

    fn combine(acc: Vec<Location>, next: Vec<Location>) -> Vec<Location> {
        merge::dedup_locations(merge::concat(acc, next))
    }

    fn ranges_in(output: &Vec<Location>, uri: &str) -> Vec<Range> {
        output
            .iter()
            .filter(|l| l.uri.as_str() == uri)
            .map(|l| l.range)
            .collect()
    }

    fn position(arg: &ReferencesArgs) -> Option<Position> {
        Some(arg.position)
    }

    fn at_position(arg: &ReferencesArgs, position: Position) -> ReferencesArgs {
        ReferencesArgs { position, ..*arg }
    }
}

pub(crate) struct PrepareRenameRequest;

impl Feature for PrepareRenameRequest {
    type Arg = Position;
    type Output = PrepareRenameResponse;
    const NAME: &'static str = "prepareRename";
    const POLICY: Policy = Policy::FirstMatch;
    const FILTER: CodeFilter = capability::rename;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().prepare_rename.as_ref()
    }

    fn transform_arg(arg: &Position, map: &DocumentMap) -> Vec<Position> {
        positions(*arg, map, Self::FILTER)
    }

    fn transform_result(
        output: PrepareRenameResponse,
        mapper: &ResultMapper<'_>,
        _: &RequestContext,
    ) -> Option<PrepareRenameResponse> {
        mapper.prepare_rename(output)
    }

    fn is_empty(_output: &PrepareRenameResponse) -> bool {
        false
    }

    fn combine(acc: PrepareRenameResponse, _next: PrepareRenameResponse) -> PrepareRenameResponse {
        acc
    }
}

fn edit_ranges_in(edit: &WorkspaceEdit, uri: &str) -> Vec<Range> {
    let mut ranges = Vec::new();
    if let Some(changes) = &edit.changes {
        for (key, edits) in changes {
            if key.as_str() == uri {
                ranges.extend(edits.iter().map(|e| e.range));
            }
        }
    }
    let document_edits: Vec<_> = match &edit.document_changes {
        Some(DocumentChanges::Edits(edits)) => edits.iter().collect(),
        Some(DocumentChanges::Operations(operations)) => operations
            .iter()
            .filter_map(|op| match op {
                tower_lsp_server::ls_types::DocumentChangeOperation::Edit(e) => Some(e),
                _ => None,
            })
            .collect(),
        None => Vec::new(),
    };
    for document_edit in document_edits {
        if document_edit.text_document.uri.as_str() == uri {
            ranges.extend(document_edit.edits.iter().map(|e| match e {
                OneOf::Left(edit) => edit.range,
                OneOf::Right(annotated) => annotated.text_edit.range,
            }));
        }
    }
    ranges
}

pub(crate) struct RenameRequest;

impl Feature for RenameRequest {
    type Arg = RenameArgs;
    type Output = WorkspaceEdit;
    const NAME: &'static str = "rename";
    const POLICY: Policy = Policy::FirstMatch;
    const FILTER: CodeFilter = capability::rename;
    const TELEPORT: TeleportMode = TeleportMode::Extend;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().rename.as_ref()
    }

    fn transform_arg(arg: &RenameArgs, map: &DocumentMap) -> Vec<RenameArgs> {
        positions(arg.position, map, Self::FILTER)
            .into_iter()
            .map(|position| RenameArgs {
                position,
                new_name: arg.new_name.clone(),
            })
            .collect()
    }

    fn transform_result(output: WorkspaceEdit, mapper: &ResultMapper<'_>, _: &RequestContext) -> Option<WorkspaceEdit> {
        mapper.workspace_edit(output)
    }

    fn is_empty(output: &WorkspaceEdit) -> bool {
        output.changes.as_ref().is_none_or(|c| c.is_empty())
            && output.document_changes.as_ref().is_none_or(|d| match d {
                DocumentChanges::Edits(e) => e.is_empty(),
                DocumentChanges::Operations(o) => o.is_empty(),
            })
    }

    fn combine(acc: WorkspaceEdit, next: WorkspaceEdit) -> WorkspaceEdit {
        merge::merge_workspace_edit(acc, next)
    }

    fn ranges_in(output: &WorkspaceEdit, uri: &str) -> Vec<Range> {
        edit_ranges_in(output, uri)
    }

    fn position(arg: &RenameArgs) -> Option<Position> {
        Some(arg.position)
    }

    fn at_position(arg: &RenameArgs, position: Position) -> RenameArgs {
        RenameArgs {
            position,
            new_name: arg.new_name.clone(),
        }
    }
}

macro_rules! list_feature {
    (
        $name:ident, $field:ident, $method:literal, $arg:ty, $item:ty, $filter:path,
        transform_arg: $transform_arg:expr,
        map_item: $map_item:expr
    ) => {
        pub(crate) struct $name;

        impl Feature for $name {
            type Arg = $arg;
            type Output = Vec<$item>;
            const NAME: &'static str = $method;
            const POLICY: Policy = Policy::Combine;
            const FILTER: CodeFilter = $filter;

            fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
                plugin.handlers().$field.as_ref()
            }

            fn transform_arg(arg: &$arg, map: &DocumentMap) -> Vec<$arg> {
                let transform: fn(&$arg, &DocumentMap) -> Vec<$arg> = $transform_arg;
                transform(arg, map)
            }

            fn transform_result(
                output: Vec<$item>,
                mapper: &ResultMapper<'_>,
                _: &RequestContext,
            ) -> Option<Vec<$item>> {
                let map_item: fn(&ResultMapper<'_>, $item) -> Option<$item> = $map_item;
                non_empty(output.into_iter().filter_map(|i| map_item(mapper, i)).collect())
            }

            fn is_empty(output: &Vec<$item>) -> bool {
                output.is_empty()
            }

            fn combine(acc: Vec<$item>, next: Vec<$item>) -> Vec<$item> {
                merge::concat(acc, next)
            }
        }
    };
}

list_feature!(
    DiagnosticsRequest, diagnostics, "diagnostic", (), Diagnostic, capability::diagnostics,
    transform_arg: |arg, map| whole_document(arg, map, capability::diagnostics),
    map_item: |mapper, d| mapper.diagnostic(d)
);

list_feature!(
    FormattingRequest, formatting, "formatting", FormattingOptions, TextEdit, capability::formatting,
    transform_arg: |arg, map| whole_document(arg, map, capability::formatting),
    map_item: |mapper, e| mapper.text_edits(vec![e]).pop()
);

list_feature!(
    RangeFormattingRequest, range_formatting, "rangeFormatting", RangeFormattingArgs, TextEdit,
    capability::formatting,
    transform_arg: |arg, map| {
        map.to_virtual_lsp_ranges(arg.range, capability::formatting)
            .into_iter()
            .map(|range| RangeFormattingArgs {
                range,
                options: arg.options.clone(),
            })
            .collect()
    },
    map_item: |mapper, e| mapper.text_edits(vec![e]).pop()
);

list_feature!(
    FoldingRangeRequest, folding_ranges, "foldingRange", (), FoldingRange, capability::folding,
    transform_arg: |arg, map| whole_document(arg, map, capability::folding),
    map_item: |mapper, f| mapper.folding_range(f)
);

list_feature!(
    SelectionRangeRequest, selection_ranges, "selectionRange", Position, SelectionRange,
    capability::selection,
    transform_arg: |arg, map| positions(*arg, map, capability::selection),
    map_item: |mapper, s| mapper.selection_range(s)
);

list_feature!(
    CodeActionRequest, code_actions, "codeAction", CodeActionArgs, CodeActionOrCommand,
    capability::code_actions,
    transform_arg: |arg, map| {
        map.to_virtual_lsp_ranges(arg.range, capability::code_actions)
            .into_iter()
            .map(|range| CodeActionArgs {
                range,
                context: CodeActionContext {
                    diagnostics: arg
                        .context
                        .diagnostics
                        .iter()
                        .filter_map(|d| {
                            let range = map
                                .to_virtual_lsp_ranges(d.range, capability::code_actions)
                                .into_iter()
                                .next()?;
                            Some(Diagnostic {
                                range,
                                ..d.clone()
                            })
                        })
                        .collect(),
                    ..arg.context.clone()
                },
            })
            .collect()
    },
    map_item: |mapper, a| mapper.code_action(a)
);

list_feature!(
    CodeLensRequest, code_lenses, "codeLens", (), CodeLens, capability::code_lenses,
    transform_arg: |arg, map| whole_document(arg, map, capability::code_lenses),
    map_item: |mapper, l| mapper.code_lens(l)
);

list_feature!(
    DocumentLinkRequest, document_links, "documentLink", (), DocumentLink, capability::links,
    transform_arg: |arg, map| whole_document(arg, map, capability::links),
    map_item: |mapper, l| mapper.document_link(l)
);

list_feature!(
    DocumentSymbolRequest, document_symbols, "documentSymbol", (), DocumentSymbol,
    capability::symbols,
    transform_arg: |arg, map| whole_document(arg, map, capability::symbols),
    map_item: |mapper, s| mapper.document_symbol(s)
);

list_feature!(
    PrepareCallHierarchyRequest, prepare_call_hierarchy, "prepareCallHierarchy", Position,
    CallHierarchyItem, capability::call_hierarchy,
    transform_arg: |arg, map| positions(*arg, map, capability::call_hierarchy),
    map_item: |mapper, i| mapper.call_hierarchy_item(i)
);

list_feature!(
    IncomingCallsRequest, incoming_calls, "callHierarchy/incomingCalls", CallHierarchyItem,
    CallHierarchyIncomingCall, capability::call_hierarchy,
    transform_arg: |arg, _map| vec![arg.clone()],
    map_item: |mapper, c| mapper.incoming_call(c)
);

list_feature!(
    OutgoingCallsRequest, outgoing_calls, "callHierarchy/outgoingCalls", CallHierarchyItem,
    CallHierarchyOutgoingCall, capability::call_hierarchy,
    transform_arg: |arg, _map| vec![arg.clone()],
    map_item: |mapper, c| mapper.outgoing_call(c)
);

pub(crate) struct SemanticTokensRequest;

impl Feature for SemanticTokensRequest {
    type Arg = ();
    type Output = SemanticTokens;
    const NAME: &'static str = "semanticTokens/full";
    const POLICY: Policy = Policy::Combine;
    const FILTER: CodeFilter = capability::semantic_tokens;

    fn handler(plugin: &Plugin) -> Option<&Handler<Self::Arg, Self::Output>> {
        plugin.handlers().semantic_tokens.as_ref()
    }

    fn transform_arg(arg: &(), map: &DocumentMap) -> Vec<()> {
        whole_document(arg, map, Self::FILTER)
    }

    fn transform_result(output: SemanticTokens, mapper: &ResultMapper<'_>, ctx: &RequestContext) -> Option<SemanticTokens> {
        let tokens = semantic::map_tokens(output, mapper, || ctx.is_cancelled());
        Some(SemanticTokens {
            result_id: None,
            data: semantic::encode(tokens),
        })
    }

    fn is_empty(output: &SemanticTokens) -> bool {
        output.data.is_empty()
    }

    fn combine(acc: SemanticTokens, next: SemanticTokens) -> SemanticTokens {
        semantic::merge(acc, next)
    }
}
