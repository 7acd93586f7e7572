//! Public entry points of the dispatch engine, one per editor request kind.

use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::de::DeserializeOwned;
use tower_lsp_server::ls_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, CodeActionOrCommand,
    CodeLens, CompletionItem, CompletionList, Diagnostic, DocumentLink, DocumentSymbol,
    FoldingRange, FormattingOptions, Hover, Location, LocationLink, Position,
    PrepareRenameResponse, Range, SelectionRange, SemanticTokens, SignatureHelp, TextEdit,
    WorkspaceEdit,
};
use url::Url;

use super::blocking::BlockingQueue;
use super::context::{RequestContext, dispatch_order};
use super::feature::*;
use super::merge;
use super::transform::{Origin, ResultMapper};
use super::worker::{dispatch, run_handler};
use crate::config::YosegiSettings;
use crate::document::{DocumentMap, DocumentRegistry, DocumentSnapshot};
use crate::error::{YosegiError, YosegiResult};
use crate::sidecar::SidecarLocator;
use crate::plugin::{
    CodeActionArgs, CompletionArgs, Plugin, PluginDocument, RangeFormattingArgs, ReferencesArgs,
    RenameArgs, SignatureHelpArgs,
};

const LOG_TARGET: &str = "yosegi::service";

/// Owns the registry, the plugin list, the blocking queue and the optional
/// sidecar locator.
///
/// Every operation takes an explicit [`RequestContext`], usually built with
/// [`LanguageService::context`] and then given a cancellation token and a
/// progress reporter by the caller.
pub struct LanguageService {
    registry: Arc<DocumentRegistry>,
    plugins: Arc<[Arc<Plugin>]>,
    blocking: BlockingQueue,
    settings: Arc<ArcSwap<YosegiSettings>>,
    sidecar: Option<Arc<SidecarLocator>>,
}

impl LanguageService {
    pub fn new(
        registry: Arc<DocumentRegistry>,
        plugins: Vec<Arc<Plugin>>,
        settings: Arc<ArcSwap<YosegiSettings>>,
    ) -> Self {
        let plugins = dispatch_order(plugins);
        log::info!(
            target: LOG_TARGET,
            "language service with plugins: {}",
            plugins.iter().map(|p| p.id()).collect::<Vec<_>>().join(", ")
        );
        Self {
            registry,
            plugins,
            blocking: BlockingQueue::new(),
            settings,
            sidecar: None,
        }
    }

    pub fn with_sidecar(mut self, sidecar: Arc<SidecarLocator>) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    pub fn sidecar(&self) -> Option<&Arc<SidecarLocator>> {
        self.sidecar.as_ref()
    }

    pub fn settings(&self) -> Arc<YosegiSettings> {
        self.settings.load_full()
    }

    /// Fresh context for one request.
    pub fn context(&self) -> RequestContext {
        let ctx = RequestContext::new(Arc::clone(&self.registry), Arc::clone(&self.plugins))
            .with_internal_item_prefix(&self.settings.load().internal_item_prefix);
        match &self.sidecar {
            Some(sidecar) => ctx.with_sidecar(Arc::clone(sidecar)),
            None => ctx,
        }
    }

    fn snapshot(&self, ctx: &RequestContext, uri: &Url) -> YosegiResult<Arc<DocumentSnapshot>> {
        ctx.registry()
            .snapshot(uri)
            .ok_or_else(|| YosegiError::document_not_found(uri.as_str()))
    }

    async fn run<F: Feature>(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        arg: F::Arg,
    ) -> YosegiResult<Option<F::Output>> {
        let snapshot = self.snapshot(ctx, uri)?;
        Ok(dispatch::<F>(ctx, &snapshot, &arg).await)
    }

    async fn run_blocking<F: Feature>(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        arg: F::Arg,
    ) -> YosegiResult<Option<F::Output>> {
        self.blocking.run(self.run::<F>(ctx, uri, arg)).await
    }

    pub async fn completion(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        args: CompletionArgs,
    ) -> YosegiResult<Option<CompletionList>> {
        self.run::<CompletionRequest>(ctx, uri, args).await
    }

    /// Route a resolve back to the plugin and document that produced the item.
    ///
    /// Items without an origin envelope are returned unchanged.
    pub async fn completion_resolve(
        &self,
        ctx: &RequestContext,
        item: CompletionItem,
    ) -> YosegiResult<CompletionItem> {
        let Some(origin) = Origin::unwrap(item.data.as_ref())? else {
            return Ok(item);
        };
        let resolved = self
            .routed::<CompletionResolveRequest>(ctx, &origin)
            .await?;
        Ok(match resolved {
            Some(mut resolved) => {
                resolved.data = item.data;
                resolved
            }
            None => item,
        })
    }

    pub async fn hover(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        position: Position,
    ) -> YosegiResult<Option<Hover>> {
        self.run::<HoverRequest>(ctx, uri, position).await
    }

    pub async fn signature_help(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        args: SignatureHelpArgs,
    ) -> YosegiResult<Option<SignatureHelp>> {
        self.run::<SignatureHelpRequest>(ctx, uri, args).await
    }

    pub async fn definition(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        position: Position,
    ) -> YosegiResult<Option<Vec<LocationLink>>> {
        self.run::<DefinitionRequest>(ctx, uri, position).await
    }

    pub async fn type_definition(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        position: Position,
    ) -> YosegiResult<Option<Vec<LocationLink>>> {
        self.run::<TypeDefinitionRequest>(ctx, uri, position).await
    }

    pub async fn implementation(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        position: Position,
    ) -> YosegiResult<Option<Vec<LocationLink>>> {
        self.run::<ImplementationRequest>(ctx, uri, position).await
    }

    pub async fn references(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        args: ReferencesArgs,
    ) -> YosegiResult<Option<Vec<Location>>> {
        self.run::<ReferencesRequest>(ctx, uri, args).await
    }

    pub async fn prepare_rename(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        position: Position,
    ) -> YosegiResult<Option<PrepareRenameResponse>> {
        self.run::<PrepareRenameRequest>(ctx, uri, position).await
    }

    pub async fn rename(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        args: RenameArgs,
    ) -> YosegiResult<Option<WorkspaceEdit>> {
        self.run_blocking::<RenameRequest>(ctx, uri, args).await
    }

    pub async fn diagnostics(
        &self,
        ctx: &RequestContext,
        uri: &Url,
    ) -> YosegiResult<Option<Vec<Diagnostic>>> {
        self.run::<DiagnosticsRequest>(ctx, uri, ()).await
    }

    pub async fn formatting(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        options: FormattingOptions,
    ) -> YosegiResult<Option<Vec<TextEdit>>> {
        self.run_blocking::<FormattingRequest>(ctx, uri, options).await
    }

    pub async fn range_formatting(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        args: RangeFormattingArgs,
    ) -> YosegiResult<Option<Vec<TextEdit>>> {
        self.run_blocking::<RangeFormattingRequest>(ctx, uri, args).await
    }

    pub async fn folding_ranges(
        &self,
        ctx: &RequestContext,
        uri: &Url,
    ) -> YosegiResult<Option<Vec<FoldingRange>>> {
        self.run::<FoldingRangeRequest>(ctx, uri, ()).await
    }

    /// One nested chain per requested position.
    ///
    /// Positions nothing answers for get an empty range at the position so
    /// the response stays aligned with the request.
    pub async fn selection_ranges(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        positions: Vec<Position>,
    ) -> YosegiResult<Option<Vec<SelectionRange>>> {
        let snapshot = self.snapshot(ctx, uri)?;
        let mut out = Vec::with_capacity(positions.len());
        for position in positions {
            let chains = dispatch::<SelectionRangeRequest>(ctx, &snapshot, &position)
                .await
                .unwrap_or_default();
            out.push(
                merge::nest_selection_ranges(position, chains).unwrap_or(SelectionRange {
                    range: Range {
                        start: position,
                        end: position,
                    },
                    parent: None,
                }),
            );
        }
        Ok(Some(out))
    }

    pub async fn semantic_tokens(
        &self,
        ctx: &RequestContext,
        uri: &Url,
    ) -> YosegiResult<Option<SemanticTokens>> {
        self.run::<SemanticTokensRequest>(ctx, uri, ()).await
    }

    pub async fn code_actions(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        args: CodeActionArgs,
    ) -> YosegiResult<Option<Vec<CodeActionOrCommand>>> {
        self.run::<CodeActionRequest>(ctx, uri, args).await
    }

    pub async fn code_lenses(
        &self,
        ctx: &RequestContext,
        uri: &Url,
    ) -> YosegiResult<Option<Vec<CodeLens>>> {
        self.run::<CodeLensRequest>(ctx, uri, ()).await
    }

    pub async fn document_links(
        &self,
        ctx: &RequestContext,
        uri: &Url,
    ) -> YosegiResult<Option<Vec<DocumentLink>>> {
        self.run::<DocumentLinkRequest>(ctx, uri, ()).await
    }

    pub async fn document_symbols(
        &self,
        ctx: &RequestContext,
        uri: &Url,
    ) -> YosegiResult<Option<Vec<DocumentSymbol>>> {
        self.run::<DocumentSymbolRequest>(ctx, uri, ()).await
    }

    pub async fn prepare_call_hierarchy(
        &self,
        ctx: &RequestContext,
        uri: &Url,
        position: Position,
    ) -> YosegiResult<Option<Vec<CallHierarchyItem>>> {
        self.run::<PrepareCallHierarchyRequest>(ctx, uri, position).await
    }

    pub async fn incoming_calls(
        &self,
        ctx: &RequestContext,
        item: CallHierarchyItem,
    ) -> YosegiResult<Option<Vec<CallHierarchyIncomingCall>>> {
        let origin = Self::required_origin(&item)?;
        self.routed::<IncomingCallsRequest>(ctx, &origin).await
    }

    pub async fn outgoing_calls(
        &self,
        ctx: &RequestContext,
        item: CallHierarchyItem,
    ) -> YosegiResult<Option<Vec<CallHierarchyOutgoingCall>>> {
        let origin = Self::required_origin(&item)?;
        self.routed::<OutgoingCallsRequest>(ctx, &origin).await
    }

    fn required_origin(item: &CallHierarchyItem) -> YosegiResult<Origin> {
        Origin::unwrap(item.data.as_ref())?.ok_or_else(|| {
            YosegiError::invalid_request(format!(
                "call hierarchy item {} carries no origin",
                item.name
            ))
        })
    }

    /// Resolve the document an origin envelope points at.
    fn locate(&self, ctx: &RequestContext, document: &str) -> YosegiResult<DocumentMap> {
        let url = Url::parse(document)
            .map_err(|e| YosegiError::invalid_request(format!("bad origin document {document}: {e}")))?;
        if let Some((snapshot, node)) = ctx.registry().find_virtual(&url) {
            return Ok(DocumentMap::node(snapshot, node));
        }
        ctx.registry()
            .snapshot(&url)
            .map(DocumentMap::host)
            .ok_or_else(|| YosegiError::document_not_found(document))
    }

    /// Send a follow-up request straight to the plugin and document recorded
    /// in `origin`, with the plugin's own original item as argument.
    async fn routed<F>(&self, ctx: &RequestContext, origin: &Origin) -> YosegiResult<Option<F::Output>>
    where
        F: Feature,
        F::Arg: DeserializeOwned,
    {
        let plugin = ctx.plugin(&origin.plugin).cloned().ok_or_else(|| {
            YosegiError::invalid_request(format!("unknown plugin {} in origin", origin.plugin))
        })?;
        let map = self.locate(ctx, &origin.document)?;
        let arg: F::Arg = serde_json::from_value(origin.original.clone())
            .map_err(|e| YosegiError::invalid_request(format!("malformed origin item: {e}")))?;
        let Some(handler) = F::handler(&plugin) else {
            return Ok(None);
        };
        let Some(document) = PluginDocument::from_map(&map) else {
            return Ok(None);
        };

        let Some(output) = run_handler::<F>(ctx, &plugin, handler, document, arg).await else {
            return Ok(None);
        };
        let mapper = ResultMapper::new(&map, F::FILTER, &plugin);
        Ok(F::transform_result(output, &mapper, ctx).filter(|o| !F::is_empty(o)))
    }
}
