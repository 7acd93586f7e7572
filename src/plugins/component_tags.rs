//! Component tag completion backed by the sidecar.
//!
//! Component names are whole-program data, so they come from the sidecar
//! serving the host file. Without a reachable sidecar the plugin simply
//! contributes nothing.

use tower_lsp_server::ls_types::{CompletionItem, CompletionItemKind, CompletionList};

use crate::engine::RequestContext;
use crate::plugin::{CompletionArgs, Plugin, PluginDocument};

pub const ID: &str = "component-tags";

/// Sidecar request type listing the components usable in a file.
pub const COMPONENT_NAMES: &str = "componentNames";

async fn component_names(document: &PluginDocument, ctx: &RequestContext) -> Option<Vec<String>> {
    let sidecar = ctx.sidecar()?;
    let file = document.host_uri().to_file_path().ok()?;
    let names = sidecar.request(COMPONENT_NAMES, &file, Vec::new()).await?;
    serde_json::from_value(names)
        .inspect_err(|e| log::debug!(target: "yosegi::sidecar", "bad component list: {}", e))
        .ok()
}

fn completion_list(names: Vec<String>) -> Option<CompletionList> {
    if names.is_empty() {
        return None;
    }
    let items = names
        .into_iter()
        .map(|name| CompletionItem {
            label: name,
            kind: Some(CompletionItemKind::CLASS),
            detail: Some("component".to_string()),
            ..Default::default()
        })
        .collect();
    Some(CompletionList {
        is_incomplete: false,
        items,
    })
}

/// Additional plugin for html documents, triggered by `<`.
pub fn plugin() -> Plugin {
    Plugin::builder(ID)
        .languages(["html"])
        .trigger_characters(["<"])
        .additional()
        .on_completion(|doc, _args: CompletionArgs, ctx| async move {
            if ctx.is_cancelled() {
                return Ok(None);
            }
            Ok(component_names(&doc, &ctx).await.and_then(completion_list))
        })
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use tempfile::TempDir;
    use tower_lsp_server::ls_types::Position;
    use url::Url;

    use crate::config::YosegiSettings;
    use crate::document::{DocumentMap, DocumentRegistry, SfcLanguage};
    use crate::sidecar::SidecarLocator;

    #[test]
    fn names_become_component_items() {
        let list = completion_list(vec!["MyButton".to_string(), "MyCard".to_string()]).unwrap();

        let labels: Vec<&str> = list.items.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["MyButton", "MyCard"]);
        assert!(!list.is_incomplete);
        assert!(completion_list(Vec::new()).is_none());
    }

    #[tokio::test]
    async fn degrades_to_nothing_without_a_reachable_sidecar() {
        let registry = Arc::new(DocumentRegistry::new(vec![Arc::new(SfcLanguage::default())]));
        let uri = Url::parse("file:///app/App.vue").unwrap();
        let snapshot = registry
            .open(&uri, "vue", 1, "<template>\n<\n</template>\n")
            .snapshot;
        let template = snapshot.tree().unwrap().walk()[0];
        let doc = PluginDocument::from_map(&DocumentMap::node(snapshot, template)).unwrap();

        let plugin = plugin();
        let handler = plugin.handlers().completion.clone().unwrap();
        let args = CompletionArgs {
            position: Position::new(1, 1),
            context: None,
        };

        let ctx = RequestContext::new(Arc::clone(&registry), Arc::from(vec![Arc::new(plugin.clone())]));
        assert!(handler(doc.clone(), args.clone(), ctx.clone()).await.unwrap().is_none());

        // a socket directory nobody listens in
        let dir = TempDir::new().unwrap();
        let mut settings = YosegiSettings::default().sidecar;
        settings.socket_dir = dir.path().to_path_buf();
        let ctx = ctx.with_sidecar(Arc::new(SidecarLocator::new(settings)));
        assert!(handler(doc, args, ctx).await.unwrap().is_none());
    }
}
