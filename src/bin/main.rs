use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use tokio::io::{stdin, stdout};
use tower_lsp_server::{LspService, Server};
use url::Url;
use yosegi::YosegiLs;
use yosegi::document::{DocumentRegistry, SfcLanguage};
use yosegi::lsp::{SettingsEventKind, load_settings};

/// Language server for single-file component documents
#[derive(Parser)]
#[command(name = "yosegi")]
#[command(version)]
#[command(about = "Language server for single-file component documents")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve LSP over stdio (the default)
    Serve,
    /// Print the virtual documents and mappings of a file as JSON
    Inspect {
        /// The host document to decompose
        file: PathBuf,

        /// Language id to open the file with
        #[arg(long, default_value = "vue")]
        language_id: String,
    },
}

fn inspect(file: PathBuf, language_id: &str) -> Result<(), String> {
    let file = std::fs::canonicalize(&file).map_err(|e| format!("{}: {}", file.display(), e))?;
    let text = std::fs::read_to_string(&file).map_err(|e| format!("{}: {}", file.display(), e))?;
    let uri = Url::from_file_path(&file)
        .map_err(|_| format!("{} is not an absolute path", file.display()))?;

    let outcome = load_settings(file.parent(), None);
    for event in &outcome.events {
        if event.kind == SettingsEventKind::Warning {
            eprintln!("Warning: {}", event.message);
        }
    }
    let settings = outcome.settings;
    let generator = SfcLanguage::new(settings.languages)
        .with_expression_language(settings.expression_language);
    let registry = DocumentRegistry::new(vec![std::sync::Arc::new(generator)]);
    let update = registry.open(&uri, language_id, 0, &text);

    let documents: Vec<_> = update
        .snapshot
        .tree()
        .map(|tree| {
            tree.walk()
                .into_iter()
                .map(|id| {
                    let node = tree.node(id);
                    let doc = &node.document;
                    json!({
                        "uri": doc.uri().as_str(),
                        "id": doc.id(),
                        "languageId": doc.language_id(),
                        "parent": node.parent.map(|p| tree.document(p).uri().as_str().to_string()),
                        "text": doc.text(),
                        "mappings": doc.mappings().mappings(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let report = json!({ "uri": uri.as_str(), "documents": documents });
    let rendered = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
    println!("{}", rendered);
    Ok(())
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol
    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Inspect { file, language_id }) => {
            if let Err(e) = inspect(file, &language_id) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve) | None => {
            let stdin = stdin();
            let stdout = stdout();

            let (service, socket) = LspService::new(YosegiLs::new);
            Server::new(stdin, stdout, socket).serve(service).await;
        }
    }
}
