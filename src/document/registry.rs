//! Host document registry with incremental virtual tree updates.
//!
//! The registry is the single writer of document state. Every update builds
//! a new [`DocumentSnapshot`] and swaps it in, so requests that already hold
//! an `Arc` to the previous snapshot keep a consistent view across awaits.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::debug;
use url::Url;

use super::generator::VirtualCodeGenerator;
use super::virtual_doc::{NodeId, VirtualDocument, VirtualTree};
use crate::text::LineIndex;

/// Immutable view of one host document and its virtual tree.
#[derive(Debug, Clone)]
pub struct DocumentSnapshot {
    uri: Url,
    version: i32,
    language_id: String,
    text: Arc<str>,
    line_index: LineIndex,
    tree: Option<Arc<VirtualTree>>,
}

impl DocumentSnapshot {
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    pub fn version(&self) -> i32 {
        self.version
    }

    pub fn language_id(&self) -> &str {
        &self.language_id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn shared_text(&self) -> Arc<str> {
        Arc::clone(&self.text)
    }

    pub fn line_index(&self) -> &LineIndex {
        &self.line_index
    }

    pub fn tree(&self) -> Option<&VirtualTree> {
        self.tree.as_deref()
    }

    /// Look up a virtual document of this host by URI.
    pub fn virtual_document(&self, uri: &Url) -> Option<(NodeId, &Arc<VirtualDocument>)> {
        let tree = self.tree()?;
        let id = tree.find_by_uri(uri)?;
        Some((id, tree.document(id)))
    }
}

/// Result of [`DocumentRegistry::get`].
#[derive(Debug, Clone)]
pub struct RegistryUpdate {
    pub snapshot: Arc<DocumentSnapshot>,
    /// Virtual documents whose text is new or changed since the last snapshot
    pub changed: Vec<Url>,
    /// Virtual documents that disappeared
    pub removed: Vec<Url>,
}

pub struct DocumentRegistry {
    documents: DashMap<Url, Arc<DocumentSnapshot>>,
    generators: Vec<Arc<dyn VirtualCodeGenerator>>,
}

impl std::fmt::Debug for DocumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentRegistry")
            .field("documents", &self.documents.len())
            .field(
                "generators",
                &self.generators.iter().map(|g| g.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

fn all_uris(tree: Option<&VirtualTree>) -> Vec<Url> {
    tree.map(|t| {
        t.walk()
            .into_iter()
            .map(|id| t.document(id).uri().clone())
            .collect()
    })
    .unwrap_or_default()
}

impl DocumentRegistry {
    pub fn new(generators: Vec<Arc<dyn VirtualCodeGenerator>>) -> Self {
        Self {
            documents: DashMap::new(),
            generators,
        }
    }

    fn generator_for(&self, language_id: &str, uri: &Url) -> Option<&Arc<dyn VirtualCodeGenerator>> {
        self.generators.iter().find(|g| g.accepts(language_id, uri))
    }

    /// Register or refresh a document with an explicit language id.
    pub fn open(&self, uri: &Url, language_id: &str, version: i32, text: &str) -> RegistryUpdate {
        self.apply(uri, Some(language_id), version, text)
    }

    /// Return the snapshot for `version`, regenerating from `text` if the
    /// cached version differs.
    pub fn get(&self, uri: &Url, version: i32, text: &str) -> RegistryUpdate {
        self.apply(uri, None, version, text)
    }

    fn apply(
        &self,
        uri: &Url,
        language_id: Option<&str>,
        version: i32,
        text: &str,
    ) -> RegistryUpdate {
        match self.documents.entry(uri.clone()) {
            Entry::Occupied(mut entry) => {
                let previous = Arc::clone(entry.get());
                let language_changed =
                    language_id.is_some_and(|lang| lang != previous.language_id);
                if previous.version == version && !language_changed {
                    return RegistryUpdate {
                        snapshot: previous,
                        changed: Vec::new(),
                        removed: Vec::new(),
                    };
                }

                let language_id = language_id.unwrap_or(&previous.language_id).to_string();
                let generator = self.generator_for(&language_id, uri);
                let (tree, changed, removed) = match (generator, previous.tree()) {
                    (Some(generator), Some(old_tree)) if !language_changed => {
                        let update = old_tree.update(generator.as_ref(), previous.text(), text);
                        (Some(update.tree), update.changed, update.removed)
                    }
                    (Some(generator), old_tree) => {
                        let tree = VirtualTree::create(generator.as_ref(), uri, text);
                        let changed = all_uris(Some(&tree));
                        let removed = all_uris(old_tree)
                            .into_iter()
                            .filter(|u| !changed.contains(u))
                            .collect();
                        (Some(tree), changed, removed)
                    }
                    (None, old_tree) => (None, Vec::new(), all_uris(old_tree)),
                };

                debug!(
                    target: "yosegi::registry",
                    "{} v{} -> v{}: {} changed, {} removed",
                    uri,
                    previous.version,
                    version,
                    changed.len(),
                    removed.len()
                );

                let snapshot = Arc::new(DocumentSnapshot {
                    uri: uri.clone(),
                    version,
                    language_id,
                    line_index: LineIndex::new(text),
                    text: Arc::from(text),
                    tree: tree.map(Arc::new),
                });
                entry.insert(Arc::clone(&snapshot));
                RegistryUpdate {
                    snapshot,
                    changed,
                    removed,
                }
            }
            Entry::Vacant(entry) => {
                let language_id = language_id.unwrap_or_default().to_string();
                let tree = self
                    .generator_for(&language_id, uri)
                    .map(|g| VirtualTree::create(g.as_ref(), uri, text));
                let changed = all_uris(tree.as_ref());

                debug!(
                    target: "yosegi::registry",
                    "{} opened at v{} with {} virtual documents",
                    uri,
                    version,
                    changed.len()
                );

                let snapshot = Arc::new(DocumentSnapshot {
                    uri: uri.clone(),
                    version,
                    language_id,
                    line_index: LineIndex::new(text),
                    text: Arc::from(text),
                    tree: tree.map(Arc::new),
                });
                entry.insert(Arc::clone(&snapshot));
                RegistryUpdate {
                    snapshot,
                    changed,
                    removed: Vec::new(),
                }
            }
        }
    }

    /// Latest snapshot of a host document.
    pub fn snapshot(&self, uri: &Url) -> Option<Arc<DocumentSnapshot>> {
        self.documents.get(uri).map(|s| Arc::clone(s.value()))
    }

    /// Forget a host document; returns the virtual documents that were dropped.
    pub fn close(&self, uri: &Url) -> Vec<Url> {
        self.documents
            .remove(uri)
            .map(|(_, snapshot)| all_uris(snapshot.tree()))
            .unwrap_or_default()
    }

    /// Find the host snapshot owning a virtual document URI.
    pub fn find_virtual(&self, uri: &Url) -> Option<(Arc<DocumentSnapshot>, NodeId)> {
        self.documents.iter().find_map(|entry| {
            let snapshot = entry.value();
            let id = snapshot.tree()?.find_by_uri(uri)?;
            Some((Arc::clone(snapshot), id))
        })
    }

    pub fn uris(&self) -> Vec<Url> {
        self.documents.iter().map(|e| e.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::sfc::SfcLanguage;

    fn registry() -> DocumentRegistry {
        DocumentRegistry::new(vec![Arc::new(SfcLanguage::default())])
    }

    fn uri() -> Url {
        Url::parse("file:///app/App.vue").unwrap()
    }

    const TEXT: &str = "<script>\nlet a\n</script>\n<style>\np{}\n</style>\n";

    #[test]
    fn same_version_returns_cached_snapshot() {
        let registry = registry();
        let first = registry.open(&uri(), "vue", 1, TEXT);
        assert_eq!(first.changed.len(), 2);

        let second = registry.get(&uri(), 1, "ignored because version matches");
        assert!(Arc::ptr_eq(&first.snapshot, &second.snapshot));
        assert!(second.changed.is_empty());
    }

    #[test]
    fn new_version_publishes_a_new_snapshot_and_keeps_the_old_one_intact() {
        let registry = registry();
        let first = registry.open(&uri(), "vue", 1, TEXT);

        let edited = TEXT.replace("let a", "let ab");
        let second = registry.get(&uri(), 2, &edited);

        assert_eq!(second.changed.len(), 1);
        assert!(second.changed[0].as_str().ends_with("-script.js"));
        assert_eq!(first.snapshot.text(), TEXT);
        assert_eq!(second.snapshot.text(), edited);
        assert_eq!(second.snapshot.version(), 2);
    }

    #[test]
    fn documents_without_a_generator_have_no_tree() {
        let registry = registry();
        let plain = Url::parse("file:///app/readme.txt").unwrap();
        let update = registry.open(&plain, "plaintext", 1, "hello");

        assert!(update.snapshot.tree().is_none());
        assert!(update.changed.is_empty());
    }

    #[test]
    fn close_reports_dropped_virtual_documents() {
        let registry = registry();
        registry.open(&uri(), "vue", 1, TEXT);

        assert_eq!(registry.close(&uri()).len(), 2);
        assert!(registry.snapshot(&uri()).is_none());
        assert!(registry.close(&uri()).is_empty());
    }

    #[test]
    fn find_virtual_locates_the_owning_host() {
        let registry = registry();
        let update = registry.open(&uri(), "vue", 1, TEXT);
        let virtual_uri = update.changed[1].clone();

        let (snapshot, node) = registry.find_virtual(&virtual_uri).unwrap();
        assert_eq!(snapshot.uri(), &uri());
        assert_eq!(snapshot.tree().unwrap().document(node).id(), "style");
    }
}
