//! Virtual documents and the per-host tree that owns them.
//!
//! The tree is an arena of nodes with explicit parent/child indices. Every
//! node holds an immutable [`VirtualDocument`] behind an `Arc`, so a snapshot
//! handed to a request stays valid while the registry builds the next one.

use std::sync::Arc;

use log::{debug, warn};
use url::Url;

use super::generator::{BlockSlice, EmbeddedCode, GeneratedCode, VirtualCodeGenerator};
use super::mapping::MappingTable;
use super::teleport::TeleportTable;
use super::virtual_uri::VirtualDocumentUri;
use crate::text::LineIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

/// A derived single-language document.
#[derive(Debug, Clone, PartialEq)]
pub struct VirtualDocument {
    id: String,
    uri: Url,
    language_id: String,
    text: Arc<str>,
    line_index: LineIndex,
    version: i32,
    mappings: MappingTable,
    teleports: TeleportTable,
}

impl VirtualDocument {
    fn from_code(id: &str, uri: Url, language_id: &str, code: &GeneratedCode, version: i32) -> Self {
        Self {
            id: id.to_string(),
            uri,
            language_id: language_id.to_string(),
            line_index: LineIndex::new(&code.text),
            text: Arc::from(code.text.as_str()),
            version,
            mappings: MappingTable::new(code.mappings.clone()),
            teleports: TeleportTable::new(code.teleports.clone()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn uri(&self) -> &Url {
        &self.uri
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

    pub fn version(&self) -> i32 {
        self.version
    }

    /// Mappings relating this document to its parent.
    pub fn mappings(&self) -> &MappingTable {
        &self.mappings
    }

    pub fn teleports(&self) -> &TeleportTable {
        &self.teleports
    }

    fn rebased(&self, delta: isize) -> Self {
        Self {
            mappings: self.mappings.rebased(delta),
            ..self.clone()
        }
    }
}

#[derive(Debug, Clone)]
pub struct VirtualNode {
    pub document: Arc<VirtualDocument>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Block {
    slice: BlockSlice,
    root: NodeId,
}

/// Result of [`VirtualTree::update`].
#[derive(Debug, Clone)]
pub struct TreeUpdate {
    pub tree: VirtualTree,
    /// Virtual documents whose text is new or changed
    pub changed: Vec<Url>,
    /// Virtual documents that no longer exist
    pub removed: Vec<Url>,
}

/// Host document decomposed into virtual documents.
#[derive(Debug, Clone)]
pub struct VirtualTree {
    host_uri: Url,
    nodes: Vec<VirtualNode>,
    blocks: Vec<Block>,
}

/// Merged edit reconstructed from two texts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EditInfo {
    pub(crate) start: usize,
    pub(crate) old_end: usize,
    pub(crate) new_end: usize,
}

impl EditInfo {
    fn touches(&self, outer: super::mapping::Span) -> bool {
        // An insertion exactly at a block boundary only moves it.
        if self.start == self.old_end {
            return outer.start < self.start && self.start < outer.end;
        }
        outer.start < self.old_end && self.start < outer.end
    }
}

/// Reconstruct a single merged edit from a character diff.
///
/// Returns `None` if the texts are identical.
pub(crate) fn reconstruct_merged_edit(old_text: &str, new_text: &str) -> Option<EditInfo> {
    use similar::{ChangeTag, TextDiff};

    if old_text == new_text {
        return None;
    }

    let diff = TextDiff::from_chars(old_text, new_text);
    let mut first_change_start: Option<usize> = None;
    let mut last_old_end = 0;
    let mut last_new_end = 0;
    let mut old_byte = 0;
    let mut new_byte = 0;

    for change in diff.iter_all_changes() {
        let len = change.value().len();
        match change.tag() {
            ChangeTag::Equal => {
                old_byte += len;
                new_byte += len;
            }
            ChangeTag::Delete => {
                first_change_start.get_or_insert(old_byte);
                old_byte += len;
                last_old_end = old_byte;
                last_new_end = new_byte;
            }
            ChangeTag::Insert => {
                first_change_start.get_or_insert(old_byte);
                new_byte += len;
                last_old_end = old_byte;
                last_new_end = new_byte;
            }
        }
    }

    first_change_start.map(|start| EditInfo {
        start,
        old_end: last_old_end,
        new_end: last_new_end,
    })
}

/// Generate a block, degrading to an empty document when the generator fails.
fn generate_or_empty(
    generator: &dyn VirtualCodeGenerator,
    slice: &BlockSlice,
    host_text: &str,
) -> GeneratedCode {
    match generator.generate(slice, host_text) {
        Ok(code) => code,
        Err(e) => {
            warn!(
                target: "yosegi::virtual_doc",
                "{}: {}, serving an empty virtual document",
                generator.name(),
                e
            );
            GeneratedCode::default()
        }
    }
}

impl VirtualTree {
    /// Build the tree for a host document from scratch.
    pub fn create(generator: &dyn VirtualCodeGenerator, host_uri: &Url, host_text: &str) -> Self {
        let mut tree = Self {
            host_uri: host_uri.clone(),
            nodes: Vec::new(),
            blocks: Vec::new(),
        };
        for slice in generator.scan(host_text) {
            let code = generate_or_empty(generator, &slice, host_text);
            let root = tree.insert_code(None, &slice.id, &slice.language_id, &code, 1);
            tree.blocks.push(Block { slice, root });
        }
        tree
    }

    /// Bring the tree up to date with a new host text.
    ///
    /// Each block independently takes the cheapest route: reuse (possibly
    /// rebased), in-place patch by the generator, or regeneration.
    pub fn update(
        &self,
        generator: &dyn VirtualCodeGenerator,
        old_text: &str,
        new_text: &str,
    ) -> TreeUpdate {
        let edit = reconstruct_merged_edit(old_text, new_text);
        if let Some(edit) = &edit {
            debug!(
                target: "yosegi::virtual_doc",
                "host edit {}..{} -> {}..{}",
                edit.start,
                edit.old_end,
                edit.start,
                edit.new_end
            );
        }
        let mut next = Self {
            host_uri: self.host_uri.clone(),
            nodes: Vec::new(),
            blocks: Vec::new(),
        };
        let mut changed = Vec::new();

        for slice in generator.scan(new_text) {
            let previous = self.blocks.iter().find(|b| b.slice.id == slice.id);

            let Some(previous) = previous else {
                let code = generate_or_empty(generator, &slice, new_text);
                let root = next.insert_code(None, &slice.id, &slice.language_id, &code, 1);
                next.collect_uris(root, &mut changed);
                next.blocks.push(Block { slice, root });
                continue;
            };

            let same_shape = previous.slice.same_shape(&slice);
            let untouched = edit.is_none_or(|e| !e.touches(previous.slice.outer));
            let reusable = same_shape
                && previous.slice.content.len() == slice.content.len()
                && (untouched || previous.slice.content(old_text) == slice.content(new_text));

            if reusable {
                let delta = slice.content.start as isize - previous.slice.content.start as isize;
                let root = next.copy_subtree(self, previous.root, None, delta);
                next.blocks.push(Block { slice, root });
                continue;
            }

            let old_document = &self.nodes[previous.root.0].document;
            let version = old_document.version() + 1;
            let code = if same_shape {
                generator.patch(old_document, &slice, new_text)
            } else {
                None
            };
            let code = match code {
                Some(code) => {
                    debug!(target: "yosegi::virtual_doc", "patched block {} in place", slice.id);
                    code
                }
                None => {
                    debug!(target: "yosegi::virtual_doc", "regenerating block {}", slice.id);
                    generate_or_empty(generator, &slice, new_text)
                }
            };
            let root = next.insert_code(None, &slice.id, &slice.language_id, &code, version);
            next.collect_uris(root, &mut changed);
            next.blocks.push(Block { slice, root });
        }

        let mut removed = Vec::new();
        for node in &self.nodes {
            let uri = node.document.uri();
            if !next.nodes.iter().any(|n| n.document.uri() == uri) {
                removed.push(uri.clone());
            }
        }

        TreeUpdate {
            tree: next,
            changed,
            removed,
        }
    }

    fn insert_code(
        &mut self,
        parent: Option<NodeId>,
        id: &str,
        language_id: &str,
        code: &GeneratedCode,
        version: i32,
    ) -> NodeId {
        let uri = VirtualDocumentUri::new(&self.host_uri, id, language_id).to_url();
        let node_id = NodeId(self.nodes.len());
        self.nodes.push(VirtualNode {
            document: Arc::new(VirtualDocument::from_code(id, uri, language_id, code, version)),
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(node_id);
        }
        for EmbeddedCode {
            id: child_id,
            language_id,
            code,
        } in &code.embedded
        {
            let nested_id = format!("{id}.{child_id}");
            self.insert_code(Some(node_id), &nested_id, language_id, code, version);
        }
        node_id
    }

    /// Copy a subtree from `source`, rebasing only its root onto the host.
    fn copy_subtree(
        &mut self,
        source: &VirtualTree,
        node: NodeId,
        parent: Option<NodeId>,
        delta: isize,
    ) -> NodeId {
        let original = &source.nodes[node.0];
        let document = if parent.is_none() && delta != 0 {
            Arc::new(original.document.rebased(delta))
        } else {
            Arc::clone(&original.document)
        };
        let node_id = NodeId(self.nodes.len());
        self.nodes.push(VirtualNode {
            document,
            parent,
            children: Vec::new(),
        });
        if let Some(parent) = parent {
            self.nodes[parent.0].children.push(node_id);
        }
        for child in &original.children {
            self.copy_subtree(source, *child, Some(node_id), 0);
        }
        node_id
    }

    fn collect_uris(&self, root: NodeId, out: &mut Vec<Url>) {
        for id in self.subtree(root) {
            out.push(self.nodes[id.0].document.uri().clone());
        }
    }

    pub fn host_uri(&self) -> &Url {
        &self.host_uri
    }

    pub fn node(&self, id: NodeId) -> &VirtualNode {
        &self.nodes[id.0]
    }

    pub fn document(&self, id: NodeId) -> &Arc<VirtualDocument> {
        &self.nodes[id.0].document
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn slices(&self) -> impl Iterator<Item = &BlockSlice> {
        self.blocks.iter().map(|b| &b.slice)
    }

    pub fn find_by_uri(&self, uri: &Url) -> Option<NodeId> {
        self.nodes
            .iter()
            .position(|n| n.document.uri() == uri)
            .map(NodeId)
    }

    fn subtree(&self, root: NodeId) -> Vec<NodeId> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    /// Nodes in pre-order: each block, then its descendants, blocks in host order.
    pub fn walk(&self) -> Vec<NodeId> {
        self.blocks
            .iter()
            .flat_map(|block| self.subtree(block.root))
            .collect()
    }

    /// Path from the top-level block down to `id`, inclusive.
    pub fn path_from_root(&self, id: NodeId) -> Vec<NodeId> {
        let mut path = vec![id];
        let mut current = id;
        while let Some(parent) = self.nodes[current.0].parent {
            path.push(parent);
            current = parent;
        }
        path.reverse();
        path
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::document::mapping::{CodeInformation, Mapping, Span};
    use crate::error::{YosegiError, YosegiResult};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Blocks are lines of the form `name:lang:content`; the content of a
    /// `nested` block also gets a child document. `fail` blocks do not parse.
    #[derive(Default)]
    pub(crate) struct LineGenerator {
        pub(crate) generated: AtomicUsize,
        pub(crate) patched: AtomicUsize,
    }

    impl VirtualCodeGenerator for LineGenerator {
        fn name(&self) -> &str {
            "lines"
        }

        fn accepts(&self, language_id: &str, _uri: &Url) -> bool {
            language_id == "lines"
        }

        fn scan(&self, host_text: &str) -> Vec<BlockSlice> {
            let mut offset = 0;
            let mut slices = Vec::new();
            for line in host_text.split_inclusive('\n') {
                let body = line.trim_end_matches('\n');
                let mut parts = body.splitn(3, ':');
                if let (Some(name), Some(lang), Some(content)) =
                    (parts.next(), parts.next(), parts.next())
                {
                    let content_start = offset + name.len() + lang.len() + 2;
                    slices.push(BlockSlice {
                        id: name.to_string(),
                        kind: name.to_string(),
                        language_id: lang.to_string(),
                        outer: Span::new(offset, offset + body.len()),
                        content: Span::new(content_start, content_start + content.len()),
                        header: format!("{name}:{lang}:"),
                        terminated: true,
                    });
                }
                offset += line.len();
            }
            slices
        }

        fn generate(&self, slice: &BlockSlice, host_text: &str) -> YosegiResult<GeneratedCode> {
            self.generated.fetch_add(1, Ordering::SeqCst);
            if slice.kind == "fail" {
                return Err(YosegiError::parse_failure(&slice.id, "broken"));
            }
            let content = slice.content(host_text);
            let mut code = GeneratedCode::verbatim(content, slice.content, CodeInformation::all());
            if slice.kind == "nested" {
                code.embedded.push(EmbeddedCode {
                    id: "inner".to_string(),
                    language_id: "css".to_string(),
                    code: GeneratedCode {
                        text: format!("x{{{content}}}"),
                        mappings: vec![Mapping::offset(0, 2, content.len(), CodeInformation::all())],
                        ..Default::default()
                    },
                });
            }
            Ok(code)
        }

        fn patch(
            &self,
            _previous: &VirtualDocument,
            slice: &BlockSlice,
            host_text: &str,
        ) -> Option<GeneratedCode> {
            if slice.kind == "nested" {
                return None;
            }
            self.patched.fetch_add(1, Ordering::SeqCst);
            Some(GeneratedCode::verbatim(
                slice.content(host_text),
                slice.content,
                CodeInformation::all(),
            ))
        }
    }

    pub(crate) fn host_uri() -> Url {
        Url::parse("file:///project/page.lines").unwrap()
    }

    #[test]
    fn create_builds_one_document_per_block_in_host_order() {
        let generator = LineGenerator::default();
        let tree = VirtualTree::create(&generator, &host_uri(), "a:html:<p>\nb:ts:let x\n");

        let ids: Vec<&str> = tree.walk().iter().map(|n| tree.document(*n).id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(tree.document(NodeId(1)).text(), "let x");
        assert_eq!(tree.document(NodeId(1)).language_id(), "ts");
    }

    #[test]
    fn nested_documents_follow_their_parent_in_walk_order() {
        let generator = LineGenerator::default();
        let tree = VirtualTree::create(&generator, &host_uri(), "nested:html:abc\nz:ts:q\n");

        let ids: Vec<&str> = tree.walk().iter().map(|n| tree.document(*n).id()).collect();
        assert_eq!(ids, vec!["nested", "nested.inner", "z"]);
        let inner = tree.find_by_uri(tree.document(NodeId(1)).uri()).unwrap();
        assert_eq!(tree.path_from_root(inner), vec![NodeId(0), NodeId(1)]);
    }

    #[test]
    fn parse_failure_degrades_to_empty_document_only_for_that_block() {
        let generator = LineGenerator::default();
        let tree = VirtualTree::create(&generator, &host_uri(), "fail:ts:oops\nok:css:a{}\n");

        assert_eq!(tree.len(), 2);
        assert_eq!(tree.document(NodeId(0)).text(), "");
        assert!(tree.document(NodeId(0)).mappings().is_empty());
        assert_eq!(tree.document(NodeId(1)).text(), "a{}");
    }

    #[test]
    fn update_regenerates_only_the_edited_block() {
        let generator = LineGenerator::default();
        let old = "a:html:<p>\nn:ts:let x\n";
        let tree = VirtualTree::create(&generator, &host_uri(), old);
        let before = generator.generated.load(Ordering::SeqCst);

        let new = "a:html:<p>\nn:ts:let xy\n";
        let update = tree.update(&generator, old, new);

        assert_eq!(generator.patched.load(Ordering::SeqCst), 1);
        assert_eq!(generator.generated.load(Ordering::SeqCst), before);
        assert_eq!(update.changed.len(), 1);
        assert!(update.changed[0].as_str().ends_with("-n.ts"));
        assert!(update.removed.is_empty());
        // untouched sibling is the same allocation
        assert!(Arc::ptr_eq(
            tree.document(NodeId(0)),
            update.tree.document(NodeId(0))
        ));
        assert_eq!(update.tree.document(NodeId(1)).version(), 2);
        assert_eq!(update.tree.document(NodeId(1)).text(), "let xy");
    }

    #[test]
    fn moved_block_is_rebased_without_regeneration() {
        let generator = LineGenerator::default();
        let old = "a:html:<p>\nb:css:a{}\n";
        let tree = VirtualTree::create(&generator, &host_uri(), old);
        let before = generator.generated.load(Ordering::SeqCst);

        let new = "a:html:<p></p>\nb:css:a{}\n";
        let update = tree.update(&generator, old, new);

        assert_eq!(generator.generated.load(Ordering::SeqCst), before);
        let moved = update.tree.document(NodeId(1));
        assert_eq!(moved.version(), 1);
        assert_eq!(moved.mappings().to_source_offsets(0, |_| true), vec![21]);
        assert_eq!(update.changed.len(), 1);
    }

    #[test]
    fn shape_change_regenerates_and_removed_blocks_are_reported() {
        let generator = LineGenerator::default();
        let old = "nested:html:abc\nb:css:a{}\n";
        let tree = VirtualTree::create(&generator, &host_uri(), old);

        let new = "nested:pug:abc\n";
        let update = tree.update(&generator, old, new);

        assert_eq!(update.tree.walk().len(), 2);
        assert_eq!(update.tree.document(NodeId(0)).language_id(), "pug");
        // the html root (its URI carries the extension) and block b are gone;
        // the regenerated child keeps its URI and is reported as changed
        assert_eq!(update.removed.len(), 2);
        assert_eq!(update.changed.len(), 2);
    }

    #[test]
    fn merged_edit_spans_first_to_last_change() {
        let edit = reconstruct_merged_edit("abcdef", "aXcdeYf").unwrap();
        assert_eq!(
            edit,
            EditInfo {
                start: 1,
                old_end: 5,
                new_end: 6
            }
        );
        assert!(reconstruct_merged_edit("same", "same").is_none());
    }
}
