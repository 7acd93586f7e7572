// Drives YosegiLs in-process through the LanguageServer trait.
use std::str::FromStr;
use std::sync::Arc;

use serde_json::json;
use tower_lsp_server::ls_types::*;
use tower_lsp_server::{LanguageServer, LspService};
use yosegi::{Plugin, YosegiLs};

const APP: &str = "<template>\n<p></p>\n</template>\n<style>\np{}\n";

fn uri() -> Uri {
    Uri::from_str("file:///workspace/App.vue").unwrap()
}

fn doc_id() -> TextDocumentIdentifier {
    TextDocumentIdentifier { uri: uri() }
}

/// Echoes `@click` for html documents so completion has a main plugin.
fn html_events() -> Arc<Plugin> {
    Arc::new(
        Plugin::builder("html-events")
            .languages(["html"])
            .trigger_characters(["@"])
            .on_completion(|_doc, _args, _ctx| async {
                Ok(Some(CompletionList {
                    is_incomplete: false,
                    items: vec![CompletionItem {
                        label: "@click".to_string(),
                        ..Default::default()
                    }],
                }))
            })
            .build(),
    )
}

async fn initialized_server() -> LspService<YosegiLs> {
    let (service, socket) = LspService::new(|client| YosegiLs::with_plugins(client, vec![html_events()]));
    // nobody reads client notifications here
    drop(socket);

    let init = InitializeParams {
        initialization_options: Some(json!({ "sidecar": { "enabled": false } })),
        ..Default::default()
    };
    let result = service.inner().initialize(init).await.unwrap();
    assert_eq!(result.server_info.unwrap().name, "yosegi");

    service
        .inner()
        .did_open(DidOpenTextDocumentParams {
            text_document: TextDocumentItem {
                uri: uri(),
                language_id: "vue".to_string(),
                version: 1,
                text: APP.to_string(),
            },
        })
        .await;
    service
}

async fn diagnostics(server: &YosegiLs) -> Vec<Diagnostic> {
    let report = server
        .diagnostic(DocumentDiagnosticParams {
            text_document: doc_id(),
            identifier: None,
            previous_result_id: None,
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await
        .unwrap();
    match report {
        DocumentDiagnosticReportResult::Report(DocumentDiagnosticReport::Full(full)) => {
            full.full_document_diagnostic_report.items
        }
        other => panic!("unexpected report {:?}", other),
    }
}

#[tokio::test]
async fn initialize_advertises_plugin_capabilities() {
    let (service, socket) = LspService::new(|client| YosegiLs::with_plugins(client, vec![html_events()]));
    drop(socket);

    let result = service
        .inner()
        .initialize(InitializeParams::default())
        .await
        .unwrap();

    let completion = result.capabilities.completion_provider.unwrap();
    assert_eq!(
        completion.trigger_characters,
        Some(vec!["<".to_string(), "@".to_string()])
    );
    assert!(result.capabilities.diagnostic_provider.is_some());
    assert!(result.capabilities.hover_provider.is_none());
}

#[tokio::test]
async fn edits_flow_through_text_sync_into_diagnostics() {
    let service = initialized_server().await;
    let server = service.inner();

    let unterminated = diagnostics(server).await;
    assert_eq!(unterminated.len(), 1);
    assert_eq!(unterminated[0].range.start, Position::new(3, 0));

    server
        .did_change(DidChangeTextDocumentParams {
            text_document: VersionedTextDocumentIdentifier {
                uri: uri(),
                version: 2,
            },
            content_changes: vec![TextDocumentContentChangeEvent {
                range: Some(Range::new(Position::new(5, 0), Position::new(5, 0))),
                range_length: None,
                text: "</style>\n".to_string(),
            }],
        })
        .await;

    assert!(diagnostics(server).await.is_empty());
}

#[tokio::test]
async fn completion_and_symbols_answer_in_host_coordinates() {
    let service = initialized_server().await;
    let server = service.inner();

    let completion = server
        .completion(CompletionParams {
            text_document_position: TextDocumentPositionParams {
                text_document: doc_id(),
                position: Position::new(1, 3),
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
            context: None,
        })
        .await
        .unwrap();
    let Some(CompletionResponse::List(list)) = completion else {
        panic!("expected a completion list");
    };
    assert_eq!(list.items[0].label, "@click");

    let symbols = server
        .document_symbol(DocumentSymbolParams {
            text_document: doc_id(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await
        .unwrap();
    let Some(DocumentSymbolResponse::Nested(symbols)) = symbols else {
        panic!("expected nested symbols");
    };
    let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["template", "style"]);
}

#[tokio::test]
async fn unknown_documents_get_empty_answers() {
    let service = initialized_server().await;

    let folds = service
        .inner()
        .folding_range(FoldingRangeParams {
            text_document: TextDocumentIdentifier {
                uri: Uri::from_str("file:///workspace/Other.vue").unwrap(),
            },
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await
        .unwrap();
    assert_eq!(folds, None);
}

#[tokio::test]
async fn configuration_change_keeps_open_documents() {
    let service = initialized_server().await;
    let server = service.inner();

    server
        .did_change_configuration(DidChangeConfigurationParams {
            settings: json!({ "sidecar": { "enabled": false }, "languages": { "style": "scss" } }),
        })
        .await;

    let symbols = server
        .document_symbol(DocumentSymbolParams {
            text_document: doc_id(),
            work_done_progress_params: WorkDoneProgressParams::default(),
            partial_result_params: PartialResultParams::default(),
        })
        .await
        .unwrap();
    let Some(DocumentSymbolResponse::Nested(symbols)) = symbols else {
        panic!("expected nested symbols");
    };
    assert_eq!(symbols[1].detail.as_deref(), Some("scss"));
}
