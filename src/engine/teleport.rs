//! Following same-document teleport links found in plugin results.

use std::collections::{HashSet, VecDeque};

use tower_lsp_server::ls_types::{Position, Range};

use super::context::RequestContext;
use super::feature::{Feature, TeleportMode};
use super::worker::run_handler;
use crate::document::{DocumentMap, VirtualDocument};
use crate::plugin::{Handler, Plugin, PluginDocument};

const LOG_TARGET: &str = "yosegi::teleport";

type Visited = HashSet<(String, (u32, u32))>;

/// Teleport destinations of every candidate of `output` in `doc`.
fn destinations<F: Feature>(output: &F::Output, doc: &VirtualDocument) -> Vec<Position> {
    let uri = doc.uri().as_str();
    let mut out = Vec::new();
    for range in F::ranges_in(output, uri) {
        let Some(offset) = doc.line_index().offset(doc.text(), range.start) else {
            continue;
        };
        for target in doc.teleports().targets_from(offset, F::FILTER) {
            if let Some(position) = doc.line_index().position(doc.text(), target.start)
                && !out.contains(&position)
            {
                out.push(position);
            }
        }
    }
    out
}

fn is_teleported<F: Feature>(doc: &VirtualDocument, range: &Range) -> bool {
    doc.line_index()
        .offset(doc.text(), range.start)
        .is_some_and(|offset| !doc.teleports().targets_from(offset, F::FILTER).is_empty())
}

fn visit(visited: &mut Visited, uri: &str, position: Position) -> bool {
    visited.insert((uri.to_string(), (position.line, position.character)))
}

/// Expand `output` by querying the same plugin again at teleport targets.
///
/// Positions are tracked in a visited set keyed by (document, position);
/// a revisit is pruned with a warning and whatever has accumulated is kept.
pub(crate) async fn resolve<F: Feature>(
    ctx: &RequestContext,
    map: &DocumentMap,
    plugin: &Plugin,
    handler: &Handler<F::Arg, F::Output>,
    document: &PluginDocument,
    arg: &F::Arg,
    output: F::Output,
) -> F::Output {
    let Some(doc) = map.virtual_document() else {
        return output;
    };
    if doc.teleports().is_empty() || F::TELEPORT == TeleportMode::Off {
        return output;
    }
    let uri = doc.uri().as_str().to_string();

    let mut visited = Visited::new();
    if let Some(position) = F::position(arg) {
        visit(&mut visited, &uri, position);
    }

    let mut worklist = VecDeque::new();
    let enqueue = |found: &F::Output, visited: &mut Visited, worklist: &mut VecDeque<Position>| {
        for position in destinations::<F>(found, doc) {
            if visit(visited, &uri, position) {
                worklist.push_back(position);
            } else {
                log::warn!(
                    target: LOG_TARGET,
                    "RecursionOverrun: {} already visited {}:{}:{}, pruning",
                    F::NAME,
                    uri,
                    position.line,
                    position.character
                );
            }
        }
    };

    enqueue(&output, &mut visited, &mut worklist);
    if worklist.is_empty() {
        return output;
    }

    let origin = F::origin(&output);
    let teleported = |range: &Range| is_teleported::<F>(doc, range);
    let mut acc = match F::TELEPORT {
        TeleportMode::Replace => F::prune(output, &uri, &teleported),
        _ => output,
    };

    while let Some(position) = worklist.pop_front() {
        if ctx.is_cancelled() {
            break;
        }
        log::debug!(
            target: LOG_TARGET,
            "{} teleports to {}:{}:{}",
            F::NAME,
            uri,
            position.line,
            position.character
        );
        let next_arg = F::at_position(arg, position);
        let Some(found) = run_handler::<F>(ctx, plugin, handler, document.clone(), next_arg).await
        else {
            continue;
        };
        enqueue(&found, &mut visited, &mut worklist);
        let found = match F::TELEPORT {
            TeleportMode::Replace => F::with_origin(F::prune(found, &uri, &teleported), origin),
            _ => found,
        };
        acc = F::combine(acc, found);
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tower_lsp_server::ls_types::{LocationLink, Uri};
    use url::Url;

    use crate::document::{
        BlockSlice, CodeInformation, DocumentRegistry, GeneratedCode, Mapping, NodeId, Span,
        Teleport, VirtualCodeGenerator,
    };
    use crate::engine::feature::DefinitionRequest;
    use crate::error::YosegiResult;

    /// One block spanning the whole host text with the given teleports.
    struct LinkedGenerator {
        teleports: Vec<Teleport>,
    }

    impl LinkedGenerator {
        /// `a b c` where `a` and `b` teleport to each other.
        fn cyclic() -> Self {
            Self {
                teleports: vec![link(0, 2), link(2, 0)],
            }
        }
    }

    fn link(from: usize, to: usize) -> Teleport {
        Teleport {
            from: Span::new(from, from + 1),
            to: Span::new(to, to + 1),
            data: CodeInformation::navigation(),
        }
    }

    impl VirtualCodeGenerator for LinkedGenerator {
        fn name(&self) -> &str {
            "linked"
        }

        fn accepts(&self, language_id: &str, _uri: &Url) -> bool {
            language_id == "linked"
        }

        fn scan(&self, host_text: &str) -> Vec<BlockSlice> {
            vec![BlockSlice {
                id: "main".to_string(),
                kind: "main".to_string(),
                language_id: "plain".to_string(),
                outer: Span::new(0, host_text.len()),
                content: Span::new(0, host_text.len()),
                header: String::new(),
                terminated: true,
            }]
        }

        fn generate(&self, slice: &BlockSlice, host_text: &str) -> YosegiResult<GeneratedCode> {
            let text = slice.content(host_text);
            Ok(GeneratedCode {
                text: text.to_string(),
                mappings: vec![Mapping::offset(0, 0, text.len(), CodeInformation::all())],
                teleports: self.teleports.clone(),
                embedded: Vec::new(),
            })
        }
    }

    fn open(generator: LinkedGenerator, text: &str) -> (Arc<DocumentRegistry>, DocumentMap) {
        let registry = Arc::new(DocumentRegistry::new(vec![Arc::new(generator)]));
        let uri = Url::parse("file:///work/main.linked").unwrap();
        let snapshot = registry.open(&uri, "linked", 1, text).snapshot;
        let map = DocumentMap::node(snapshot, NodeId(0));
        (registry, map)
    }

    fn range_at(position: Position) -> Range {
        Range {
            start: position,
            end: Position {
                character: position.character + 1,
                ..position
            },
        }
    }

    #[tokio::test]
    async fn cycle_terminates_after_visiting_each_position_once() {
        let (registry, map) = open(LinkedGenerator::cyclic(), "a b c");
        let document = PluginDocument::from_map(&map).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let plugin = Plugin::builder("echo")
            .on_definition(move |doc, position, _ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let terminal = Position {
                        line: 0,
                        character: 4,
                    };
                    Ok(Some(vec![
                        LocationLink {
                            origin_selection_range: None,
                            target_uri: doc.lsp_uri().clone(),
                            target_range: range_at(position),
                            target_selection_range: range_at(position),
                        },
                        LocationLink {
                            origin_selection_range: None,
                            target_uri: Uri::from_str("file:///lib/c.d.ts").unwrap(),
                            target_range: range_at(terminal),
                            target_selection_range: range_at(terminal),
                        },
                    ]))
                }
            })
            .build();
        let plugin = Arc::new(plugin);
        let ctx = RequestContext::new(registry, Arc::from(vec![Arc::clone(&plugin)]));
        let handler = plugin.handlers().definition.clone().unwrap();

        let start = Position {
            line: 0,
            character: 0,
        };
        let first = run_handler::<DefinitionRequest>(&ctx, &plugin, &handler, document.clone(), start)
            .await
            .unwrap();
        calls.store(0, Ordering::SeqCst);

        let links =
            resolve::<DefinitionRequest>(&ctx, &map, &plugin, &handler, &document, &start, first)
                .await;

        // only the hop to `b`; `b` points back at the already visited `a`
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // teleported candidates are replaced, the external target survives once
        let targets: Vec<&str> = links.iter().map(|l| l.target_uri.as_str()).collect();
        assert_eq!(targets, vec!["file:///lib/c.d.ts"]);
    }

    #[tokio::test]
    async fn target_right_after_a_teleport_source_is_reported_as_is() {
        // `a` teleports to `d`; `b` sits right after `a` and is a plain target
        let generator = LinkedGenerator {
            teleports: vec![link(0, 5)],
        };
        let (registry, map) = open(generator, "ab c d");
        let document = PluginDocument::from_map(&map).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let plugin = Plugin::builder("to-b")
            .on_definition(move |doc, _position, _ctx| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let b = range_at(Position::new(0, 1));
                    Ok(Some(vec![LocationLink {
                        origin_selection_range: None,
                        target_uri: doc.lsp_uri().clone(),
                        target_range: b,
                        target_selection_range: b,
                    }]))
                }
            })
            .build();
        let plugin = Arc::new(plugin);
        let ctx = RequestContext::new(registry, Arc::from(vec![Arc::clone(&plugin)]));
        let handler = plugin.handlers().definition.clone().unwrap();

        let at_c = Position::new(0, 3);
        let first = run_handler::<DefinitionRequest>(&ctx, &plugin, &handler, document.clone(), at_c)
            .await
            .unwrap();
        let links =
            resolve::<DefinitionRequest>(&ctx, &map, &plugin, &handler, &document, &at_c, first)
                .await;

        let columns: Vec<u32> = links.iter().map(|l| l.target_range.start.character).collect();
        assert_eq!(columns, vec![1]);
        // no hop was taken
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
