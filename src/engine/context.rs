//! Per-request bundle threaded through every dispatch call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::DEFAULT_INTERNAL_ITEM_PREFIX;
use crate::document::DocumentRegistry;
use crate::plugin::Plugin;
use crate::sidecar::SidecarLocator;

/// Called with the JSON of the merged accumulation after each non-empty
/// contribution of a combine-policy request.
pub type ProgressReporter = Arc<dyn Fn(serde_json::Value) + Send + Sync>;

/// Explicit request context: registry handle, plugin list, cancellation,
/// progress and the optional sidecar. Built per request from the owning
/// [`LanguageService`] and never stored globally.
///
/// [`LanguageService`]: super::LanguageService
#[derive(Clone)]
pub struct RequestContext {
    registry: Arc<DocumentRegistry>,
    /// Main plugins first, then additional ones, each in registration order
    plugins: Arc<[Arc<Plugin>]>,
    cancel: CancellationToken,
    progress: Option<ProgressReporter>,
    sidecar: Option<Arc<SidecarLocator>>,
    internal_item_prefix: Arc<str>,
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("plugins", &self.plugins.iter().map(|p| p.id()).collect::<Vec<_>>())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("progress", &self.progress.is_some())
            .field("sidecar", &self.sidecar.is_some())
            .finish()
    }
}

/// Order plugins for dispatch: main before additional, stable otherwise.
pub(crate) fn dispatch_order(plugins: Vec<Arc<Plugin>>) -> Arc<[Arc<Plugin>]> {
    let (main, additional): (Vec<_>, Vec<_>) =
        plugins.into_iter().partition(|p| !p.is_additional());
    main.into_iter().chain(additional).collect()
}

impl RequestContext {
    pub fn new(registry: Arc<DocumentRegistry>, plugins: Arc<[Arc<Plugin>]>) -> Self {
        Self {
            registry,
            plugins,
            cancel: CancellationToken::new(),
            progress: None,
            sidecar: None,
            internal_item_prefix: Arc::from(DEFAULT_INTERNAL_ITEM_PREFIX),
        }
    }

    pub fn with_internal_item_prefix(mut self, prefix: &str) -> Self {
        self.internal_item_prefix = Arc::from(prefix);
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_sidecar(mut self, sidecar: Arc<SidecarLocator>) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// `None` when the sidecar is disabled.
    pub fn sidecar(&self) -> Option<&Arc<SidecarLocator>> {
        self.sidecar.as_ref()
    }

    /// Completion labels starting with this are never shown; empty keeps all.
    pub fn internal_item_prefix(&self) -> &str {
        &self.internal_item_prefix
    }

    pub fn registry(&self) -> &Arc<DocumentRegistry> {
        &self.registry
    }

    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    pub fn plugin(&self, id: &str) -> Option<&Arc<Plugin>> {
        self.plugins.iter().find(|p| p.id() == id)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn report<T: serde::Serialize>(&self, accumulation: &T) {
        let Some(progress) = &self.progress else {
            return;
        };
        match serde_json::to_value(accumulation) {
            Ok(value) => progress(value),
            Err(e) => log::debug!(target: "yosegi::dispatch", "progress not serializable: {}", e),
        }
    }
}
