//! Plugin contract.
//!
//! A plugin is a plain record: an id, an optional trigger character set, an
//! optional language selector, and one optional async handler per request
//! kind. The dispatch engine checks whether a handler is present with a
//! simple `Option` test.
//!
//! ```no_run
//! use yosegi::plugin::Plugin;
//! use tower_lsp_server::ls_types::{Hover, HoverContents, MarkupContent, MarkupKind};
//!
//! let plugin = Plugin::builder("hello")
//!     .languages(["html"])
//!     .on_hover(|_doc, _position, _ctx| async move {
//!         Ok(Some(Hover {
//!             contents: HoverContents::Markup(MarkupContent {
//!                 kind: MarkupKind::Markdown,
//!                 value: "hello".to_string(),
//!             }),
//!             range: None,
//!         }))
//!     })
//!     .build();
//! ```

pub mod args;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tower_lsp_server::ls_types::{
    CallHierarchyIncomingCall, CallHierarchyItem, CallHierarchyOutgoingCall, CodeActionOrCommand,
    CodeLens, CompletionItem, CompletionList, Diagnostic, DocumentLink, DocumentSymbol,
    FoldingRange, FormattingOptions, Hover, Location, LocationLink, Position,
    PrepareRenameResponse, SelectionRange, SemanticTokens, SignatureHelp, TextEdit, Uri,
    WorkspaceEdit,
};
use url::Url;

pub use args::{
    CodeActionArgs, CompletionArgs, RangeFormattingArgs, ReferencesArgs, RenameArgs,
    SignatureHelpArgs,
};

use crate::document::DocumentMap;
use crate::engine::RequestContext;
use crate::error::PluginError;
use crate::lsp::url_to_uri;
use crate::text::LineIndex;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// `Ok(None)` means "nothing to contribute".
pub type PluginResult<T> = Result<Option<T>, PluginError>;

pub type Handler<A, T> =
    Arc<dyn Fn(PluginDocument, A, RequestContext) -> BoxFuture<PluginResult<T>> + Send + Sync>;

/// Owned view of the document a handler runs against.
///
/// Either a virtual document or the host itself; handlers do not need to
/// know which.
#[derive(Debug, Clone)]
pub struct PluginDocument {
    uri: Url,
    lsp_uri: Uri,
    host_uri: Url,
    language_id: String,
    version: i32,
    text: Arc<str>,
    line_index: LineIndex,
}

impl PluginDocument {
    pub(crate) fn from_map(map: &DocumentMap) -> Option<Self> {
        Some(Self {
            uri: map.uri().clone(),
            lsp_uri: url_to_uri(map.uri()).ok()?,
            host_uri: map.snapshot().uri().clone(),
            language_id: map.language_id().to_string(),
            version: map.version(),
            text: map.shared_text(),
            line_index: map.line_index().clone(),
        })
    }

    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// The same URI as an LSP `Uri`, for building results.
    pub fn lsp_uri(&self) -> &Uri {
        &self.lsp_uri
    }

    pub fn host_uri(&self) -> &Url {
        &self.host_uri
    }

    pub fn is_host(&self) -> bool {
        self.uri == self.host_uri
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn offset_at(&self, position: Position) -> Option<usize> {
        self.line_index.offset(&self.text, position)
    }

    pub fn position_at(&self, offset: usize) -> Option<Position> {
        self.line_index.position(&self.text, offset)
    }

    pub fn range_of(&self, start: usize, end: usize) -> Option<tower_lsp_server::ls_types::Range> {
        self.line_index.range(&self.text, start, end)
    }
}

macro_rules! plugin_handlers {
    ($($field:ident, $setter:ident: $arg:ty => $out:ty;)*) => {
        /// Handlers per request kind; `None` means the kind is not supported.
        #[derive(Clone, Default)]
        pub struct Handlers {
            $(pub $field: Option<Handler<$arg, $out>>,)*
        }

        impl Handlers {
            /// Names of the request kinds with a handler installed.
            pub fn kinds(&self) -> Vec<&'static str> {
                let mut kinds = Vec::new();
                $(if self.$field.is_some() {
                    kinds.push(stringify!($field));
                })*
                kinds
            }
        }

        impl PluginBuilder {
            $(
                pub fn $setter<F, Fut>(mut self, handler: F) -> Self
                where
                    F: Fn(PluginDocument, $arg, RequestContext) -> Fut + Send + Sync + 'static,
                    Fut: Future<Output = PluginResult<$out>> + Send + 'static,
                {
                    self.plugin.handlers.$field =
                        Some(Arc::new(move |doc, arg, ctx| Box::pin(handler(doc, arg, ctx))));
                    self
                }
            )*
        }
    };
}

plugin_handlers! {
    completion, on_completion: CompletionArgs => CompletionList;
    completion_resolve, on_completion_resolve: CompletionItem => CompletionItem;
    hover, on_hover: Position => Hover;
    signature_help, on_signature_help: SignatureHelpArgs => SignatureHelp;
    definition, on_definition: Position => Vec<LocationLink>;
    type_definition, on_type_definition: Position => Vec<LocationLink>;
    implementation, on_implementation: Position => Vec<LocationLink>;
    references, on_references: ReferencesArgs => Vec<Location>;
    prepare_rename, on_prepare_rename: Position => PrepareRenameResponse;
    rename, on_rename: RenameArgs => WorkspaceEdit;
    diagnostics, on_diagnostics: () => Vec<Diagnostic>;
    formatting, on_formatting: FormattingOptions => Vec<TextEdit>;
    range_formatting, on_range_formatting: RangeFormattingArgs => Vec<TextEdit>;
    folding_ranges, on_folding_ranges: () => Vec<FoldingRange>;
    selection_ranges, on_selection_ranges: Position => Vec<SelectionRange>;
    semantic_tokens, on_semantic_tokens: () => SemanticTokens;
    code_actions, on_code_actions: CodeActionArgs => Vec<CodeActionOrCommand>;
    code_lenses, on_code_lenses: () => Vec<CodeLens>;
    document_links, on_document_links: () => Vec<DocumentLink>;
    document_symbols, on_document_symbols: () => Vec<DocumentSymbol>;
    prepare_call_hierarchy, on_prepare_call_hierarchy: Position => Vec<CallHierarchyItem>;
    incoming_calls, on_incoming_calls: CallHierarchyItem => Vec<CallHierarchyIncomingCall>;
    outgoing_calls, on_outgoing_calls: CallHierarchyItem => Vec<CallHierarchyOutgoingCall>;
}

/// A backend language service.
#[derive(Clone)]
pub struct Plugin {
    id: String,
    trigger_characters: Option<Vec<String>>,
    languages: Option<Vec<String>>,
    is_additional: bool,
    handlers: Handlers,
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("id", &self.id)
            .field("trigger_characters", &self.trigger_characters)
            .field("languages", &self.languages)
            .field("is_additional", &self.is_additional)
            .field("handlers", &self.handlers.kinds())
            .finish()
    }
}

impl Plugin {
    pub fn builder(id: impl Into<String>) -> PluginBuilder {
        PluginBuilder {
            plugin: Plugin {
                id: id.into(),
                trigger_characters: None,
                languages: None,
                is_additional: false,
                handlers: Handlers::default(),
            },
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_additional(&self) -> bool {
        self.is_additional
    }

    pub fn trigger_characters(&self) -> Option<&[String]> {
        self.trigger_characters.as_deref()
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Whether a request carrying `trigger` may be sent to this plugin.
    ///
    /// Requests without a trigger character reach every plugin; plugins
    /// without a declared set accept every trigger.
    pub fn accepts_trigger(&self, trigger: Option<&str>) -> bool {
        match (trigger, &self.trigger_characters) {
            (None, _) | (_, None) => true,
            (Some(trigger), Some(declared)) => declared.iter().any(|c| c == trigger),
        }
    }

    pub fn accepts_language(&self, language_id: &str) -> bool {
        self.languages
            .as_ref()
            .is_none_or(|languages| languages.iter().any(|l| l == language_id))
    }
}

pub struct PluginBuilder {
    plugin: Plugin,
}

impl PluginBuilder {
    pub fn trigger_characters<I, S>(mut self, characters: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugin.trigger_characters = Some(characters.into_iter().map(Into::into).collect());
        self
    }

    /// Restrict the plugin to documents of these language ids.
    pub fn languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plugin.languages = Some(languages.into_iter().map(Into::into).collect());
        self
    }

    /// Additional plugins only ever add to what main plugins produce.
    pub fn additional(mut self) -> Self {
        self.plugin.is_additional = true;
        self
    }

    pub fn build(self) -> Plugin {
        self.plugin
    }
}
