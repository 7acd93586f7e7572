// End-to-end dispatch over real virtual trees: trigger routing, capability
// filtering and repeatability.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::ArcSwap;
use tower_lsp_server::ls_types::*;
use url::Url;
use yosegi::document::{
    BlockSlice, CodeInformation, GeneratedCode, Mapping, Span, VirtualCodeGenerator,
};
use yosegi::plugin::{CompletionArgs, RenameArgs};
use yosegi::*;

const SFC: &str = "<template><div @cl></div></template>\n<script lang=\"ts\">\nconst a = 1\n</script>\n";

fn service_with(
    generator: Arc<dyn VirtualCodeGenerator>,
    uri: &Url,
    language_id: &str,
    text: &str,
    plugins: Vec<Plugin>,
) -> LanguageService {
    let registry = Arc::new(DocumentRegistry::new(vec![generator]));
    registry.open(uri, language_id, 1, text);
    LanguageService::new(
        registry,
        plugins.into_iter().map(Arc::new).collect(),
        Arc::new(ArcSwap::from_pointee(YosegiSettings::default())),
    )
}

fn counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

fn edit_item(label: &str, start: u32, end: u32) -> CompletionItem {
    CompletionItem {
        label: label.to_string(),
        text_edit: Some(CompletionTextEdit::Edit(TextEdit {
            range: Range::new(Position::new(0, start), Position::new(0, end)),
            new_text: label.to_string(),
        })),
        ..Default::default()
    }
}

/// Completion plugin for html documents answering with one item over the
/// two characters after the cursor.
fn html_plugin(id: &'static str, triggers: Option<&[&str]>, incomplete: bool, calls: Arc<AtomicUsize>) -> Plugin {
    let builder = Plugin::builder(id).languages(["html"]);
    let builder = match triggers {
        Some(triggers) => builder.trigger_characters(triggers.iter().copied()),
        None => builder,
    };
    builder
        .on_completion(move |doc, args, _ctx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                assert_eq!(doc.text(), "<div @cl></div>");
                let column = args.position.character;
                Ok(Some(CompletionList {
                    is_incomplete: incomplete,
                    items: vec![edit_item(id, column, column + 2)],
                }))
            }
        })
        .build()
}

fn at_trigger() -> Option<CompletionContext> {
    Some(CompletionContext {
        trigger_kind: CompletionTriggerKind::TRIGGER_CHARACTER,
        trigger_character: Some("@".to_string()),
    })
}

#[tokio::test]
async fn trigger_character_routes_completion_to_matching_plugins_only() {
    let uri = Url::parse("file:///app/App.vue").unwrap();
    let (at_calls, dot_calls, any_calls, ts_calls) = (counter(), counter(), counter(), counter());
    let ts_counter = Arc::clone(&ts_calls);
    let plugins = vec![
        html_plugin("at", Some(&["@"]), false, Arc::clone(&at_calls)),
        html_plugin("dot", Some(&["."]), false, Arc::clone(&dot_calls)),
        html_plugin("any", None, true, Arc::clone(&any_calls)),
        Plugin::builder("ts")
            .languages(["typescript"])
            .on_completion(move |_doc, _args, _ctx| {
                let calls = Arc::clone(&ts_counter);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some(CompletionList {
                        is_incomplete: false,
                        items: vec![edit_item("ts", 0, 0)],
                    }))
                }
            })
            .build(),
    ];
    let service = service_with(Arc::new(SfcLanguage::default()), &uri, "vue", SFC, plugins);
    let ctx = service.context();

    // right after `@` in the template, host column 16
    let list = service
        .completion(
            &ctx,
            &uri,
            CompletionArgs {
                position: Position::new(0, 16),
                context: at_trigger(),
            },
        )
        .await
        .unwrap()
        .unwrap();

    let labels: Vec<&str> = list.items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["at", "any"]);
    assert!(list.is_incomplete);
    assert_eq!(at_calls.load(Ordering::SeqCst), 1);
    assert_eq!(any_calls.load(Ordering::SeqCst), 1);
    assert_eq!(dot_calls.load(Ordering::SeqCst), 0);
    // the script block does not contain the position
    assert_eq!(ts_calls.load(Ordering::SeqCst), 0);

    for item in &list.items {
        let Some(CompletionTextEdit::Edit(edit)) = &item.text_edit else {
            panic!("text edit lost for {}", item.label);
        };
        assert_eq!(edit.range, Range::new(Position::new(0, 16), Position::new(0, 18)));
    }
}

#[tokio::test]
async fn repeated_requests_give_identical_results() {
    let uri = Url::parse("file:///app/App.vue").unwrap();
    let plugins = vec![
        html_plugin("at", Some(&["@"]), false, counter()),
        html_plugin("any", None, false, counter()),
    ];
    let service = service_with(Arc::new(SfcLanguage::default()), &uri, "vue", SFC, plugins);

    let mut results = Vec::new();
    for _ in 0..3 {
        let ctx = service.context();
        let args = CompletionArgs {
            position: Position::new(0, 16),
            context: at_trigger(),
        };
        results.push(service.completion(&ctx, &uri, args).await.unwrap());
    }

    assert!(results[0].is_some());
    assert!(results.windows(2).all(|pair| pair[0] == pair[1]));
}

/// A container whose text is one typescript document; each line is mapped
/// on its own with the matching entry of `lines` (missing entries are
/// unmapped).
struct PerLine {
    lines: Vec<CodeInformation>,
}

impl PerLine {
    fn uniform(info: CodeInformation) -> Self {
        Self {
            lines: vec![info; 2],
        }
    }
}

impl VirtualCodeGenerator for PerLine {
    fn name(&self) -> &str {
        "per-line"
    }

    fn accepts(&self, language_id: &str, _uri: &Url) -> bool {
        language_id == "tmpl"
    }

    fn scan(&self, host_text: &str) -> Vec<BlockSlice> {
        vec![BlockSlice {
            id: "body".to_string(),
            kind: "body".to_string(),
            language_id: "typescript".to_string(),
            outer: Span::new(0, host_text.len()),
            content: Span::new(0, host_text.len()),
            header: String::new(),
            terminated: true,
        }]
    }

    fn generate(&self, slice: &BlockSlice, host_text: &str) -> YosegiResult<GeneratedCode> {
        let text = slice.content(host_text);
        let mut mappings = Vec::new();
        let mut offset = 0;
        for (line, info) in text.split_inclusive('\n').zip(&self.lines) {
            let len = line.trim_end_matches('\n').len();
            mappings.push(Mapping::offset(slice.content.start + offset, offset, len, *info));
            offset += line.len();
        }
        Ok(GeneratedCode {
            text: text.to_string(),
            mappings,
            teleports: Vec::new(),
            embedded: Vec::new(),
        })
    }
}

const COUNTER: &str = "let count = 1\ncount += 1\n";

fn count_edits() -> Vec<Range> {
    vec![
        Range::new(Position::new(0, 4), Position::new(0, 9)),
        Range::new(Position::new(1, 0), Position::new(1, 5)),
    ]
}

/// Renames both occurrences of `count` in the virtual document.
fn rename_plugin(calls: Arc<AtomicUsize>) -> Plugin {
    Plugin::builder("ts")
        .languages(["typescript"])
        .on_rename(move |doc, args, _ctx| {
            let calls = Arc::clone(&calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                let edits = count_edits()
                    .into_iter()
                    .map(|range| TextEdit {
                        range,
                        new_text: args.new_name.clone(),
                    })
                    .collect();
                Ok(Some(WorkspaceEdit {
                    changes: Some(HashMap::from([(doc.lsp_uri().clone(), edits)])),
                    ..Default::default()
                }))
            }
        })
        .build()
}

async fn rename_with(generator: PerLine, position: Position) -> (Option<WorkspaceEdit>, usize) {
    let uri = Url::parse("file:///app/main.tmpl").unwrap();
    let calls = counter();
    let service = service_with(
        Arc::new(generator),
        &uri,
        "tmpl",
        COUNTER,
        vec![rename_plugin(Arc::clone(&calls))],
    );
    let ctx = service.context();
    let args = RenameArgs {
        position,
        new_name: "total".to_string(),
    };
    let edit = service.rename(&ctx, &uri, args).await.unwrap();
    (edit, calls.load(Ordering::SeqCst))
}

fn host_edits(edit: WorkspaceEdit) -> Vec<TextEdit> {
    let changes = edit.changes.unwrap();
    assert_eq!(changes.len(), 1);
    let (uri, edits) = changes.into_iter().next().unwrap();
    assert_eq!(uri.as_str(), "file:///app/main.tmpl");
    edits
}

#[tokio::test]
async fn rename_on_a_mapping_without_rename_capability_returns_no_edit() {
    let frozen = CodeInformation {
        rename: false,
        ..CodeInformation::all()
    };
    let (edit, calls) = rename_with(PerLine::uniform(frozen), Position::new(0, 5)).await;

    assert_eq!(edit, None);
    assert_eq!(calls, 0);
}

#[tokio::test]
async fn rename_on_a_renamable_mapping_edits_the_host() {
    let (edit, calls) =
        rename_with(PerLine::uniform(CodeInformation::navigation()), Position::new(0, 5)).await;

    assert_eq!(calls, 1);
    let edits = host_edits(edit.unwrap());
    let ranges: Vec<Range> = edits.iter().map(|e| e.range).collect();
    assert_eq!(ranges, count_edits());
    assert!(edits.iter().all(|e| e.new_text == "total"));
}

#[tokio::test]
async fn rename_skips_occurrences_under_a_mapping_without_rename_capability() {
    // `count` on line 0 is renamable, the same text on line 1 is not
    let generator = PerLine {
        lines: vec![
            CodeInformation::navigation(),
            CodeInformation {
                rename: false,
                ..CodeInformation::all()
            },
        ],
    };

    let (edit, calls) = rename_with(generator, Position::new(0, 5)).await;
    assert_eq!(calls, 1);
    let edits = host_edits(edit.unwrap());
    let ranges: Vec<Range> = edits.iter().map(|e| e.range).collect();
    assert_eq!(ranges, vec![Range::new(Position::new(0, 4), Position::new(0, 9))]);
}

#[tokio::test]
async fn rename_from_the_frozen_occurrence_never_reaches_the_plugin() {
    let generator = PerLine {
        lines: vec![
            CodeInformation::navigation(),
            CodeInformation {
                rename: false,
                ..CodeInformation::all()
            },
        ],
    };

    let (edit, calls) = rename_with(generator, Position::new(1, 2)).await;
    assert_eq!(edit, None);
    assert_eq!(calls, 0);
}
