use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use log::{debug, info, warn};
use tokio_util::sync::{CancellationToken, DropGuard};
use tower_lsp_server::jsonrpc::{Error, Result};
use tower_lsp_server::ls_types::*;
use tower_lsp_server::{Client, LanguageServer};
use url::Url;

use super::progress::partial_result_reporter;
use super::settings::{SettingsEventKind, SettingsSource, load_settings};
use super::text_sync::apply_content_changes;
use super::uri_to_url;
use crate::config::YosegiSettings;
use crate::document::{DocumentRegistry, SfcLanguage};
use crate::engine::{LanguageService, RequestContext, legend};
use crate::error::{LockResultExt, YosegiError, YosegiResult};
use crate::plugin::{
    CodeActionArgs, CompletionArgs, Handlers, Plugin, RangeFormattingArgs, ReferencesArgs,
    RenameArgs, SignatureHelpArgs,
};
use crate::plugins;
use crate::sidecar::SidecarLocator;

const LOG_TARGET: &str = "yosegi::lsp";

/// The language server: LSP plumbing around a [`LanguageService`].
///
/// The service is rebuilt whenever settings change; open documents are
/// carried over into the new registry.
pub struct YosegiLs {
    client: Client,
    service: ArcSwap<LanguageService>,
    settings: Arc<ArcSwap<YosegiSettings>>,
    plugins: Vec<Arc<Plugin>>,
    root_path: Mutex<Option<PathBuf>>,
}

/// Build a service for the current settings, re-opening the documents of
/// `previous` if given.
fn build_service(
    settings: &Arc<ArcSwap<YosegiSettings>>,
    plugins: &[Arc<Plugin>],
    previous: Option<&DocumentRegistry>,
) -> LanguageService {
    let current = settings.load_full();
    let generator = SfcLanguage::new(current.languages.clone())
        .with_expression_language(current.expression_language.clone());
    let registry = Arc::new(DocumentRegistry::new(vec![Arc::new(generator)]));
    if let Some(previous) = previous {
        for uri in previous.uris() {
            if let Some(snapshot) = previous.snapshot(&uri) {
                registry.open(&uri, snapshot.language_id(), snapshot.version(), snapshot.text());
            }
        }
    }

    let service = LanguageService::new(registry, plugins.to_vec(), Arc::clone(settings));
    if current.sidecar.enabled {
        service.with_sidecar(Arc::new(SidecarLocator::new(current.sidecar.clone())))
    } else {
        service
    }
}

/// Advertise only request kinds some plugin handles.
pub(crate) fn server_capabilities(plugins: &[Arc<Plugin>]) -> ServerCapabilities {
    let has = |kind: fn(&Handlers) -> bool| plugins.iter().any(|p| kind(p.handlers()));
    let triggers: BTreeSet<String> = plugins
        .iter()
        .filter(|p| p.handlers().completion.is_some())
        .filter_map(|p| p.trigger_characters())
        .flatten()
        .cloned()
        .collect();
    let signature_triggers: BTreeSet<String> = plugins
        .iter()
        .filter(|p| p.handlers().signature_help.is_some())
        .filter_map(|p| p.trigger_characters())
        .flatten()
        .cloned()
        .collect();
    let non_empty = |set: BTreeSet<String>| -> Option<Vec<String>> {
        (!set.is_empty()).then(|| set.into_iter().collect())
    };

    ServerCapabilities {
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                ..Default::default()
            },
        )),
        completion_provider: has(|h| h.completion.is_some()).then(|| CompletionOptions {
            trigger_characters: non_empty(triggers),
            resolve_provider: Some(has(|h| h.completion_resolve.is_some())),
            ..Default::default()
        }),
        hover_provider: has(|h| h.hover.is_some()).then_some(HoverProviderCapability::Simple(true)),
        signature_help_provider: has(|h| h.signature_help.is_some()).then(|| SignatureHelpOptions {
            trigger_characters: non_empty(signature_triggers),
            ..Default::default()
        }),
        definition_provider: has(|h| h.definition.is_some()).then_some(OneOf::Left(true)),
        type_definition_provider: has(|h| h.type_definition.is_some())
            .then_some(TypeDefinitionProviderCapability::Simple(true)),
        implementation_provider: has(|h| h.implementation.is_some())
            .then_some(ImplementationProviderCapability::Simple(true)),
        references_provider: has(|h| h.references.is_some()).then_some(OneOf::Left(true)),
        rename_provider: has(|h| h.rename.is_some()).then(|| {
            OneOf::Right(RenameOptions {
                prepare_provider: Some(has(|h| h.prepare_rename.is_some())),
                work_done_progress_options: Default::default(),
            })
        }),
        diagnostic_provider: has(|h| h.diagnostics.is_some()).then(|| {
            DiagnosticServerCapabilities::Options(DiagnosticOptions {
                identifier: Some("yosegi".to_string()),
                inter_file_dependencies: true,
                workspace_diagnostics: false,
                ..Default::default()
            })
        }),
        document_formatting_provider: has(|h| h.formatting.is_some()).then_some(OneOf::Left(true)),
        document_range_formatting_provider: has(|h| h.range_formatting.is_some())
            .then_some(OneOf::Left(true)),
        folding_range_provider: has(|h| h.folding_ranges.is_some())
            .then_some(FoldingRangeProviderCapability::Simple(true)),
        selection_range_provider: has(|h| h.selection_ranges.is_some())
            .then_some(SelectionRangeProviderCapability::Simple(true)),
        semantic_tokens_provider: has(|h| h.semantic_tokens.is_some()).then(|| {
            SemanticTokensServerCapabilities::SemanticTokensOptions(SemanticTokensOptions {
                legend: legend(),
                full: Some(SemanticTokensFullOptions::Bool(true)),
                range: None,
                ..Default::default()
            })
        }),
        code_action_provider: has(|h| h.code_actions.is_some())
            .then_some(CodeActionProviderCapability::Simple(true)),
        code_lens_provider: has(|h| h.code_lenses.is_some()).then_some(CodeLensOptions {
            resolve_provider: Some(false),
        }),
        document_link_provider: has(|h| h.document_links.is_some()).then(|| DocumentLinkOptions {
            resolve_provider: Some(false),
            work_done_progress_options: Default::default(),
        }),
        document_symbol_provider: has(|h| h.document_symbols.is_some()).then_some(OneOf::Left(true)),
        call_hierarchy_provider: has(|h| h.prepare_call_hierarchy.is_some())
            .then_some(CallHierarchyServerCapability::Simple(true)),
        ..ServerCapabilities::default()
    }
}

fn root_path(params: &InitializeParams) -> Option<PathBuf> {
    let to_path = |uri: &Uri| uri_to_url(uri).ok()?.to_file_path().ok();
    if let Some(folder) = params.workspace_folders.as_ref().and_then(|f| f.first()) {
        return to_path(&folder.uri);
    }
    #[allow(deprecated)]
    let root_uri = params.root_uri.as_ref();
    root_uri
        .and_then(to_path)
        .or_else(|| std::env::current_dir().ok())
}

fn rpc_error(error: YosegiError) -> Error {
    match error {
        YosegiError::InvalidRequest { message } => Error::invalid_params(message),
        other => {
            warn!(target: LOG_TARGET, "request failed: {}", other);
            Error::internal_error()
        }
    }
}

/// Unknown documents are "no result"; malformed requests are errors.
fn respond<T>(result: YosegiResult<Option<T>>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(value),
        Err(YosegiError::DocumentNotFound { uri }) => {
            debug!(target: LOG_TARGET, "request for unknown document {}", uri);
            Ok(None)
        }
        Err(e) => Err(rpc_error(e)),
    }
}

fn document_url(uri: &Uri) -> Result<Url> {
    uri_to_url(uri).map_err(rpc_error)
}

impl YosegiLs {
    pub fn new(client: Client) -> Self {
        Self::with_plugins(client, Vec::new())
    }

    /// Serve with backend plugins in addition to the built-in ones.
    pub fn with_plugins(client: Client, backends: Vec<Arc<Plugin>>) -> Self {
        let settings = Arc::new(ArcSwap::from_pointee(YosegiSettings::default()));
        let plugins: Vec<Arc<Plugin>> = backends.into_iter().chain(plugins::builtin()).collect();
        let service = build_service(&settings, &plugins, None);
        Self {
            client,
            service: ArcSwap::from_pointee(service),
            settings,
            plugins,
            root_path: Mutex::new(None),
        }
    }

    fn service(&self) -> Arc<LanguageService> {
        self.service.load_full()
    }

    /// A request context cancelled when the returned guard drops, i.e. when
    /// the request finishes or the client cancels it.
    fn context(
        &self,
        service: &LanguageService,
        partial_result_token: Option<ProgressToken>,
    ) -> (RequestContext, DropGuard) {
        let cancel = CancellationToken::new();
        let mut ctx = service.context().with_cancellation(cancel.clone());
        if let Some(reporter) = partial_result_reporter(&self.client, partial_result_token) {
            ctx = ctx.with_progress(reporter);
        }
        (ctx, cancel.drop_guard())
    }

    async fn apply_settings(&self, source: Option<(SettingsSource, serde_json::Value)>) {
        let root = self.root_path.lock().recover_poison("root_path").clone();
        let outcome = load_settings(root.as_deref(), source);
        for event in outcome.events {
            let level = match event.kind {
                SettingsEventKind::Info => MessageType::INFO,
                SettingsEventKind::Warning => MessageType::WARNING,
            };
            info!(target: LOG_TARGET, "{}", event.message);
            self.client.log_message(level, event.message).await;
        }

        self.settings.store(Arc::new(outcome.settings));
        let previous = self.service();
        let service = build_service(&self.settings, &self.plugins, Some(previous.registry()));
        self.service.store(Arc::new(service));
    }

    fn invalidate_sidecar(&self, service: &LanguageService, url: &Url) {
        if let (Some(sidecar), Ok(path)) = (service.sidecar(), url.to_file_path()) {
            sidecar.invalidate(&path);
        }
    }
}

impl LanguageServer for YosegiLs {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        let root = root_path(&params);
        if let Some(path) = &root {
            self.client
                .log_message(
                    MessageType::INFO,
                    format!("Using workspace root {}", path.display()),
                )
                .await;
        }
        *self.root_path.lock().recover_poison("root_path") = root;

        let overrides = params
            .initialization_options
            .map(|options| (SettingsSource::InitializationOptions, options));
        self.apply_settings(overrides).await;

        Ok(InitializeResult {
            server_info: Some(ServerInfo {
                name: "yosegi".to_string(),
                version: Some(env!("CARGO_PKG_VERSION").to_string()),
            }),
            capabilities: server_capabilities(&self.plugins),
            offset_encoding: None,
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        self.client
            .log_message(MessageType::INFO, "yosegi initialized")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let document = params.text_document;
        let Ok(url) = uri_to_url(&document.uri) else {
            warn!(target: LOG_TARGET, "ignoring didOpen for {}", document.uri.as_str());
            return;
        };
        let service = self.service();
        let update = service.registry().open(
            &url,
            &document.language_id,
            document.version,
            &document.text,
        );
        info!(
            target: LOG_TARGET,
            "opened {} with {} virtual documents",
            url,
            update.changed.len()
        );
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        let Ok(url) = uri_to_url(&params.text_document.uri) else {
            return;
        };
        let service = self.service();
        let Some(previous) = service.registry().snapshot(&url) else {
            warn!(target: LOG_TARGET, "didChange for unopened {}", url);
            return;
        };
        let text = apply_content_changes(previous.text(), params.content_changes);
        let update = service
            .registry()
            .get(&url, params.text_document.version, &text);
        debug!(
            target: LOG_TARGET,
            "{} v{}: {} changed, {} removed",
            url,
            params.text_document.version,
            update.changed.len(),
            update.removed.len()
        );
        self.invalidate_sidecar(&service, &url);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        let Ok(url) = uri_to_url(&params.text_document.uri) else {
            return;
        };
        let service = self.service();
        let dropped = service.registry().close(&url);
        debug!(target: LOG_TARGET, "closed {} ({} virtual documents)", url, dropped.len());
        self.invalidate_sidecar(&service, &url);
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        self.apply_settings(Some((SettingsSource::ClientConfiguration, params.settings)))
            .await;
    }

    async fn completion(&self, params: CompletionParams) -> Result<Option<CompletionResponse>> {
        let position = params.text_document_position;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        let args = CompletionArgs {
            position: position.position,
            context: params.context,
        };
        respond(service.completion(&ctx, &url, args).await)
            .map(|list| list.map(CompletionResponse::List))
    }

    async fn completion_resolve(&self, item: CompletionItem) -> Result<CompletionItem> {
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        service
            .completion_resolve(&ctx, item)
            .await
            .map_err(rpc_error)
    }

    async fn hover(&self, params: HoverParams) -> Result<Option<Hover>> {
        let position = params.text_document_position_params;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        respond(service.hover(&ctx, &url, position.position).await)
    }

    async fn signature_help(&self, params: SignatureHelpParams) -> Result<Option<SignatureHelp>> {
        let position = params.text_document_position_params;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        let args = SignatureHelpArgs {
            position: position.position,
            context: params.context,
        };
        respond(service.signature_help(&ctx, &url, args).await)
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let position = params.text_document_position_params;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.definition(&ctx, &url, position.position).await)
            .map(|links| links.map(GotoDefinitionResponse::Link))
    }

    async fn goto_type_definition(
        &self,
        params: request::GotoTypeDefinitionParams,
    ) -> Result<Option<request::GotoTypeDefinitionResponse>> {
        let position = params.text_document_position_params;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.type_definition(&ctx, &url, position.position).await)
            .map(|links| links.map(GotoDefinitionResponse::Link))
    }

    async fn goto_implementation(
        &self,
        params: request::GotoImplementationParams,
    ) -> Result<Option<request::GotoImplementationResponse>> {
        let position = params.text_document_position_params;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.implementation(&ctx, &url, position.position).await)
            .map(|links| links.map(GotoDefinitionResponse::Link))
    }

    async fn references(&self, params: ReferenceParams) -> Result<Option<Vec<Location>>> {
        let position = params.text_document_position;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        let args = ReferencesArgs {
            position: position.position,
            include_declaration: params.context.include_declaration,
        };
        respond(service.references(&ctx, &url, args).await)
    }

    async fn prepare_rename(
        &self,
        params: TextDocumentPositionParams,
    ) -> Result<Option<PrepareRenameResponse>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        respond(service.prepare_rename(&ctx, &url, params.position).await)
    }

    async fn rename(&self, params: RenameParams) -> Result<Option<WorkspaceEdit>> {
        let position = params.text_document_position;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        let args = RenameArgs {
            position: position.position,
            new_name: params.new_name,
        };
        respond(service.rename(&ctx, &url, args).await)
    }

    async fn diagnostic(
        &self,
        params: DocumentDiagnosticParams,
    ) -> Result<DocumentDiagnosticReportResult> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        let items = respond(service.diagnostics(&ctx, &url).await)?.unwrap_or_default();
        Ok(DocumentDiagnosticReportResult::Report(
            DocumentDiagnosticReport::Full(RelatedFullDocumentDiagnosticReport {
                related_documents: None,
                full_document_diagnostic_report: FullDocumentDiagnosticReport {
                    result_id: None,
                    items,
                },
            }),
        ))
    }

    async fn formatting(&self, params: DocumentFormattingParams) -> Result<Option<Vec<TextEdit>>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        respond(service.formatting(&ctx, &url, params.options).await)
    }

    async fn range_formatting(
        &self,
        params: DocumentRangeFormattingParams,
    ) -> Result<Option<Vec<TextEdit>>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        let args = RangeFormattingArgs {
            range: params.range,
            options: params.options,
        };
        respond(service.range_formatting(&ctx, &url, args).await)
    }

    async fn folding_range(&self, params: FoldingRangeParams) -> Result<Option<Vec<FoldingRange>>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.folding_ranges(&ctx, &url).await)
    }

    async fn selection_range(
        &self,
        params: SelectionRangeParams,
    ) -> Result<Option<Vec<SelectionRange>>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        respond(service.selection_ranges(&ctx, &url, params.positions).await)
    }

    async fn semantic_tokens_full(
        &self,
        params: SemanticTokensParams,
    ) -> Result<Option<SemanticTokensResult>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.semantic_tokens(&ctx, &url).await)
            .map(|tokens| tokens.map(SemanticTokensResult::Tokens))
    }

    async fn code_action(&self, params: CodeActionParams) -> Result<Option<CodeActionResponse>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        let args = CodeActionArgs {
            range: params.range,
            context: params.context,
        };
        respond(service.code_actions(&ctx, &url, args).await)
    }

    async fn code_lens(&self, params: CodeLensParams) -> Result<Option<Vec<CodeLens>>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.code_lenses(&ctx, &url).await)
    }

    async fn document_link(&self, params: DocumentLinkParams) -> Result<Option<Vec<DocumentLink>>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.document_links(&ctx, &url).await)
    }

    async fn document_symbol(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Option<DocumentSymbolResponse>> {
        let url = document_url(&params.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.document_symbols(&ctx, &url).await)
            .map(|symbols| symbols.map(DocumentSymbolResponse::Nested))
    }

    async fn prepare_call_hierarchy(
        &self,
        params: CallHierarchyPrepareParams,
    ) -> Result<Option<Vec<CallHierarchyItem>>> {
        let position = params.text_document_position_params;
        let url = document_url(&position.text_document.uri)?;
        let service = self.service();
        let (ctx, _guard) = self.context(&service, None);
        respond(service.prepare_call_hierarchy(&ctx, &url, position.position).await)
    }

    async fn incoming_calls(
        &self,
        params: CallHierarchyIncomingCallsParams,
    ) -> Result<Option<Vec<CallHierarchyIncomingCall>>> {
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.incoming_calls(&ctx, params.item).await)
    }

    async fn outgoing_calls(
        &self,
        params: CallHierarchyOutgoingCallsParams,
    ) -> Result<Option<Vec<CallHierarchyOutgoingCall>>> {
        let service = self.service();
        let (ctx, _guard) = self.context(&service, params.partial_result_params.partial_result_token);
        respond(service.outgoing_calls(&ctx, params.item).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_plugins_advertise_only_what_they_handle() {
        let caps = server_capabilities(&plugins::builtin());

        let completion = caps.completion_provider.unwrap();
        assert_eq!(completion.trigger_characters, Some(vec!["<".to_string()]));
        assert_eq!(completion.resolve_provider, Some(false));
        assert!(caps.diagnostic_provider.is_some());
        assert!(caps.folding_range_provider.is_some());
        assert!(caps.document_symbol_provider.is_some());
        assert!(caps.hover_provider.is_none());
        assert!(caps.rename_provider.is_none());
    }

    #[test]
    fn trigger_characters_are_the_union_over_completion_plugins() {
        let plugins = vec![
            Arc::new(
                Plugin::builder("ts")
                    .trigger_characters([".", "@"])
                    .on_completion(|_, _, _| async { Ok(None) })
                    .build(),
            ),
            Arc::new(
                Plugin::builder("css")
                    .trigger_characters([":", "."])
                    .on_completion(|_, _, _| async { Ok(None) })
                    .on_hover(|_, _, _| async { Ok(None) })
                    .build(),
            ),
            // no completion handler: its triggers are not advertised
            Arc::new(Plugin::builder("lint").trigger_characters(["#"]).build()),
        ];
        let caps = server_capabilities(&plugins);

        let triggers = caps.completion_provider.unwrap().trigger_characters.unwrap();
        assert_eq!(triggers, vec![".", ":", "@"]);
        assert!(caps.hover_provider.is_some());
    }

    #[test]
    fn unknown_documents_are_empty_results_and_bad_requests_are_errors() {
        assert_eq!(
            respond::<u8>(Err(YosegiError::document_not_found("file:///x.vue"))).unwrap(),
            None
        );
        let error = respond::<u8>(Err(YosegiError::invalid_request("no origin"))).unwrap_err();
        assert_eq!(error.code, tower_lsp_server::jsonrpc::ErrorCode::InvalidParams);
    }
}
