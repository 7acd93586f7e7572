//! Position translation between a host document and one of its virtual documents.
//!
//! A nested document is mapped in hops: host → top-level block → ... → node.
//! Each hop may fan out when mappings overlap, so every conversion returns a
//! list. Converting for the host itself is the identity.

use std::sync::Arc;

use tower_lsp_server::ls_types::{Position, Range};
use url::Url;

use super::mapping::CodeInformation;
use super::registry::DocumentSnapshot;
use super::virtual_doc::{NodeId, VirtualDocument};
use crate::text::LineIndex;

/// Capability predicate used to select mappings for one request kind.
pub type CodeFilter = fn(&CodeInformation) -> bool;

fn push_unique<T: PartialEq>(out: &mut Vec<T>, value: T) {
    if !out.contains(&value) {
        out.push(value);
    }
}

/// Mapping between the host of `snapshot` and one target document.
#[derive(Debug, Clone)]
pub struct DocumentMap {
    snapshot: Arc<DocumentSnapshot>,
    /// Nodes from the top-level block down to the target; empty for the host
    path: Vec<NodeId>,
}

impl DocumentMap {
    /// Map for the host document itself.
    pub fn host(snapshot: Arc<DocumentSnapshot>) -> Self {
        Self {
            snapshot,
            path: Vec::new(),
        }
    }

    /// Map for a virtual document of `snapshot`.
    pub fn node(snapshot: Arc<DocumentSnapshot>, node: NodeId) -> Self {
        let path = snapshot
            .tree()
            .map(|tree| tree.path_from_root(node))
            .unwrap_or_default();
        Self { snapshot, path }
    }

    pub fn snapshot(&self) -> &Arc<DocumentSnapshot> {
        &self.snapshot
    }

    pub fn is_host(&self) -> bool {
        self.path.is_empty()
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.path.last().copied()
    }

    /// Virtual document targeted by this map, `None` for the host.
    pub fn virtual_document(&self) -> Option<&Arc<VirtualDocument>> {
        let node = self.node_id()?;
        Some(self.snapshot.tree()?.document(node))
    }

    fn chain(&self) -> Vec<&Arc<VirtualDocument>> {
        let Some(tree) = self.snapshot.tree() else {
            return Vec::new();
        };
        self.path.iter().map(|id| tree.document(*id)).collect()
    }

    pub fn uri(&self) -> &Url {
        match self.virtual_document() {
            Some(doc) => doc.uri(),
            None => self.snapshot.uri(),
        }
    }

    pub fn language_id(&self) -> &str {
        match self.virtual_document() {
            Some(doc) => doc.language_id(),
            None => self.snapshot.language_id(),
        }
    }

    pub fn text(&self) -> &str {
        match self.virtual_document() {
            Some(doc) => doc.text(),
            None => self.snapshot.text(),
        }
    }

    pub fn shared_text(&self) -> Arc<str> {
        match self.virtual_document() {
            Some(doc) => doc.shared_text(),
            None => self.snapshot.shared_text(),
        }
    }

    pub fn line_index(&self) -> &LineIndex {
        match self.virtual_document() {
            Some(doc) => doc.line_index(),
            None => self.snapshot.line_index(),
        }
    }

    pub fn version(&self) -> i32 {
        match self.virtual_document() {
            Some(doc) => doc.version(),
            None => self.snapshot.version(),
        }
    }

    pub fn to_virtual_offsets(&self, host_offset: usize, filter: CodeFilter) -> Vec<usize> {
        let mut current = vec![host_offset];
        for doc in self.chain() {
            let mut next = Vec::new();
            for offset in current {
                for mapped in doc.mappings().to_generated_offsets(offset, filter) {
                    push_unique(&mut next, mapped);
                }
            }
            current = next;
        }
        current
    }

    pub fn to_host_offsets(&self, virtual_offset: usize, filter: CodeFilter) -> Vec<usize> {
        let mut current = vec![virtual_offset];
        for doc in self.chain().into_iter().rev() {
            let mut next = Vec::new();
            for offset in current {
                for mapped in doc.mappings().to_source_offsets(offset, filter) {
                    push_unique(&mut next, mapped);
                }
            }
            current = next;
        }
        current
    }

    pub fn to_virtual_ranges(&self, host_start: usize, host_end: usize, filter: CodeFilter) -> Vec<(usize, usize)> {
        let mut current = vec![(host_start, host_end)];
        for doc in self.chain() {
            let mut next = Vec::new();
            for (start, end) in current {
                for mapped in doc.mappings().to_generated_ranges(start, end, filter) {
                    push_unique(&mut next, mapped);
                }
            }
            current = next;
        }
        current
    }

    pub fn to_host_ranges(&self, start: usize, end: usize, filter: CodeFilter) -> Vec<(usize, usize)> {
        let mut current = vec![(start, end)];
        for doc in self.chain().into_iter().rev() {
            let mut next = Vec::new();
            for (s, e) in current {
                for mapped in doc.mappings().to_source_ranges(s, e, filter) {
                    push_unique(&mut next, mapped);
                }
            }
            current = next;
        }
        current
    }

    /// Host position → positions in the target document.
    pub fn to_virtual_positions(&self, host_position: Position, filter: CodeFilter) -> Vec<Position> {
        let host_text = self.snapshot.text();
        let Some(offset) = self.snapshot.line_index().offset(host_text, host_position) else {
            return Vec::new();
        };
        let (text, index) = (self.text(), self.line_index());
        self.to_virtual_offsets(offset, filter)
            .into_iter()
            .filter_map(|o| index.position(text, o))
            .collect()
    }

    /// Target document position → host positions.
    pub fn to_host_positions(&self, position: Position, filter: CodeFilter) -> Vec<Position> {
        let Some(offset) = self.line_index().offset(self.text(), position) else {
            return Vec::new();
        };
        let host_text = self.snapshot.text();
        let host_index = self.snapshot.line_index();
        self.to_host_offsets(offset, filter)
            .into_iter()
            .filter_map(|o| host_index.position(host_text, o))
            .collect()
    }

    pub fn to_virtual_lsp_ranges(&self, host_range: Range, filter: CodeFilter) -> Vec<Range> {
        let host_text = self.snapshot.text();
        let Some((start, end)) = self.snapshot.line_index().offsets(host_text, host_range) else {
            return Vec::new();
        };
        let (text, index) = (self.text(), self.line_index());
        self.to_virtual_ranges(start, end, filter)
            .into_iter()
            .filter_map(|(s, e)| index.range(text, s, e))
            .collect()
    }

    pub fn to_host_lsp_ranges(&self, range: Range, filter: CodeFilter) -> Vec<Range> {
        let Some((start, end)) = self.line_index().offsets(self.text(), range) else {
            return Vec::new();
        };
        let host_text = self.snapshot.text();
        let host_index = self.snapshot.line_index();
        self.to_host_ranges(start, end, filter)
            .into_iter()
            .filter_map(|(s, e)| host_index.range(host_text, s, e))
            .collect()
    }

    /// First host range, the usual choice when a result carries one range.
    pub fn to_host_lsp_range(&self, range: Range, filter: CodeFilter) -> Option<Range> {
        self.to_host_lsp_ranges(range, filter).into_iter().next()
    }

    /// Range covering the whole target document mapped back to the host.
    pub fn full_host_range(&self, filter: CodeFilter) -> Option<Range> {
        let end = self.line_index().end_position(self.text());
        self.to_host_lsp_range(
            Range {
                start: Position::default(),
                end,
            },
            filter,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::registry::DocumentRegistry;
    use crate::document::sfc::SfcLanguage;

    const HOST: &str = "<template>\n<p>{{ msg }}</p>\n</template>\n<script>\nlet msg = 1\n</script>\n";

    fn snapshot() -> Arc<DocumentSnapshot> {
        let registry = DocumentRegistry::new(vec![Arc::new(SfcLanguage::default())]);
        let uri = Url::parse("file:///app/App.vue").unwrap();
        registry.open(&uri, "vue", 1, HOST).snapshot
    }

    fn pos(line: u32, character: u32) -> Position {
        Position { line, character }
    }

    fn any(_: &CodeInformation) -> bool {
        true
    }

    #[test]
    fn host_map_is_identity() {
        let map = DocumentMap::host(snapshot());

        assert!(map.is_host());
        assert_eq!(map.to_virtual_positions(pos(1, 4), any), vec![pos(1, 4)]);
        assert_eq!(map.to_host_positions(pos(4, 2), any), vec![pos(4, 2)]);
    }

    #[test]
    fn top_level_block_positions_round_trip() {
        let snapshot = snapshot();
        // script is the third node: template, template.expressions, script
        let map = DocumentMap::node(Arc::clone(&snapshot), NodeId(2));

        assert_eq!(map.language_id(), "javascript");
        // host line 4 "let msg = 1" is virtual line 1
        assert_eq!(map.to_virtual_positions(pos(4, 4), any), vec![pos(1, 4)]);
        assert_eq!(map.to_host_positions(pos(1, 4), any), vec![pos(4, 4)]);
    }

    #[test]
    fn nested_document_maps_through_its_parent() {
        let map = DocumentMap::node(snapshot(), NodeId(1));

        assert_eq!(map.text(), "( msg );\n");
        // "msg" at host line 1 column 6
        assert_eq!(map.to_virtual_positions(pos(1, 6), any), vec![pos(0, 2)]);
        assert_eq!(map.to_host_positions(pos(0, 2), any), vec![pos(1, 6)]);
    }

    #[test]
    fn unmapped_positions_produce_nothing() {
        let map = DocumentMap::node(snapshot(), NodeId(1));

        // the wrapping parenthesis is synthetic
        assert!(map.to_host_positions(pos(0, 0), any).is_empty());
        // host text outside the interpolation
        assert!(map.to_virtual_positions(pos(1, 1), any).is_empty());
    }

    #[test]
    fn filter_applies_at_every_hop() {
        let map = DocumentMap::node(snapshot(), NodeId(1));

        assert!(map.to_host_positions(pos(0, 2), |c| c.formatting).is_empty());
        assert_eq!(
            map.to_host_lsp_range(
                Range {
                    start: pos(0, 2),
                    end: pos(0, 5)
                },
                |c| c.rename
            ),
            Some(Range {
                start: pos(1, 6),
                end: pos(1, 9)
            })
        );
    }
}
