// Sidecar discovery and requests over real Unix domain sockets.
#![cfg(unix)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use arc_swap::ArcSwap;
use serde_json::{Value, json};
use tempfile::TempDir;
use tokio::net::UnixListener;
use tower_lsp_server::ls_types::{CompletionContext, CompletionTriggerKind, Position};
use url::Url;
use yosegi::config::SidecarSettings;
use yosegi::plugin::CompletionArgs;
use yosegi::sidecar::{PROJECT_INFO, Request, RequestHandler, SidecarLocator, serve, socket_paths};
use yosegi::{DocumentRegistry, LanguageService, SfcLanguage, YosegiSettings, plugins};

const KIND: &str = "tsserver";

struct Project {
    _dir: TempDir,
    sockets: PathBuf,
    root: PathBuf,
    file: PathBuf,
}

fn project() -> Project {
    let dir = TempDir::new().unwrap();
    let base = dir.path().canonicalize().unwrap();
    let sockets = base.join("run");
    let root = base.join("app");
    std::fs::create_dir_all(&sockets).unwrap();
    std::fs::create_dir_all(root.join("src")).unwrap();
    let file = root.join("src").join("App.vue");
    Project {
        _dir: dir,
        sockets,
        root,
        file,
    }
}

/// Start a sidecar at `{sockets}/tsserver-0.sock` owning `project`.
fn start_sidecar(project: &Project, executed: Arc<AtomicUsize>) {
    let socket = socket_paths(&project.sockets, KIND, 1).remove(0);
    let listener = UnixListener::bind(&socket).unwrap();
    let config_file = project.root.join("tsconfig.json");
    let file = project.file.clone();

    let handler: RequestHandler = Arc::new(move |request: Request| {
        let executed = Arc::clone(&executed);
        let info = json!({ "configFile": config_file, "files": [file] });
        Box::pin(async move {
            executed.fetch_add(1, Ordering::SeqCst);
            match request.kind.as_str() {
                PROJECT_INFO => Some(info),
                "componentNames" => Some(json!(["MyButton", "MyCard"])),
                _ => None,
            }
        })
    });

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let (reader, writer) = stream.into_split();
            let handler = Arc::clone(&handler);
            tokio::spawn(serve(reader, writer, handler, Duration::from_secs(5)));
        }
    });
}

fn settings(sockets: &Path) -> SidecarSettings {
    SidecarSettings {
        enabled: true,
        socket_dir: sockets.to_path_buf(),
        project_kind: KIND.to_string(),
        probe_count: 2,
        retry_interval_ms: 100,
        request_timeout_ms: 2000,
        dedup_window_ms: 5000,
    }
}

#[tokio::test]
async fn locator_probes_sockets_and_reuses_the_chosen_connection() {
    let project = project();
    let executed = Arc::new(AtomicUsize::new(0));
    start_sidecar(&project, Arc::clone(&executed));
    let locator = SidecarLocator::new(settings(&project.sockets));

    let names = locator
        .request("componentNames", &project.file, Vec::new())
        .await;
    assert_eq!(names, Some(json!(["MyButton", "MyCard"])));

    // second call goes straight to the assigned server, no new probe
    let again = locator
        .request("componentNames", &project.file, Vec::new())
        .await;
    assert_eq!(again, names);
    assert_eq!(executed.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn missing_sidecar_gives_no_data() {
    let project = project();
    let locator = SidecarLocator::new(settings(&project.sockets));

    let result: Option<Value> = locator
        .request("componentNames", &project.file, Vec::new())
        .await;
    assert_eq!(result, None);
}

#[tokio::test]
async fn component_tags_complete_from_the_sidecar() {
    let project = project();
    start_sidecar(&project, Arc::new(AtomicUsize::new(0)));

    let registry = Arc::new(DocumentRegistry::new(vec![Arc::new(SfcLanguage::default())]));
    let uri = Url::from_file_path(&project.file).unwrap();
    registry.open(&uri, "vue", 1, "<template>\n<\n</template>\n");
    let service = LanguageService::new(
        registry,
        plugins::builtin(),
        Arc::new(ArcSwap::from_pointee(YosegiSettings::default())),
    )
    .with_sidecar(Arc::new(SidecarLocator::new(settings(&project.sockets))));
    let ctx = service.context();

    let args = CompletionArgs {
        position: Position::new(1, 1),
        context: Some(CompletionContext {
            trigger_kind: CompletionTriggerKind::TRIGGER_CHARACTER,
            trigger_character: Some("<".to_string()),
        }),
    };
    let list = service.completion(&ctx, &uri, args).await.unwrap().unwrap();

    let labels: Vec<&str> = list.items.iter().map(|i| i.label.as_str()).collect();
    assert_eq!(labels, vec!["MyButton", "MyCard"]);
}
