//! Finding the sidecar server responsible for a file.
//!
//! Servers listen on `{socket_dir}/{project_kind}-{n}.sock` for
//! `n in 0..probe_count`. Each is asked for its project; the one whose
//! project lists the file wins, ties going to the most specific config
//! directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use log::debug;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::client::{ClientConfig, SidecarClient};
use crate::config::SidecarSettings;

const LOG_TARGET: &str = "yosegi::sidecar";

/// Request type answered with a [`ProjectInfo`].
pub const PROJECT_INFO: &str = "projectInfo";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectInfo {
    pub config_file: PathBuf,
    #[serde(default)]
    pub files: Vec<PathBuf>,
}

impl ProjectInfo {
    fn contains(&self, file: &Path) -> bool {
        self.files.iter().any(|f| f.clean() == file)
    }

    fn root(&self) -> PathBuf {
        self.config_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
            .clean()
    }
}

pub fn socket_paths(dir: &Path, kind: &str, count: u32) -> Vec<PathBuf> {
    (0..count)
        .map(|n| dir.join(format!("{kind}-{n}.sock")))
        .collect()
}

/// Index of the best candidate for `file`.
///
/// Projects listing the file come first; among those, and failing that
/// among projects whose root is an ancestor of the file, the deepest root
/// wins. Earlier candidates win ties.
pub fn select(candidates: &[ProjectInfo], file: &Path) -> Option<usize> {
    let file = file.clean();
    deepest(candidates, |info| info.contains(&file))
        .or_else(|| deepest(candidates, |info| file.starts_with(info.root())))
}

fn deepest(candidates: &[ProjectInfo], eligible: impl Fn(&ProjectInfo) -> bool) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .filter(|(_, info)| eligible(info))
        .fold(None::<(usize, usize)>, |best, (index, info)| {
            let depth = info.root().components().count();
            match best {
                Some((_, best_depth)) if best_depth >= depth => best,
                _ => Some((index, depth)),
            }
        })
        .map(|(index, _)| index)
}

/// Connects lazily to sidecar servers and remembers which one serves
/// which file.
pub struct SidecarLocator {
    settings: SidecarSettings,
    clients: DashMap<PathBuf, Arc<SidecarClient>>,
    assignments: DashMap<PathBuf, PathBuf>,
}

impl std::fmt::Debug for SidecarLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SidecarLocator")
            .field("socket_dir", &self.settings.socket_dir)
            .field("clients", &self.clients.len())
            .finish()
    }
}

impl SidecarLocator {
    pub fn new(settings: SidecarSettings) -> Self {
        Self {
            settings,
            clients: DashMap::new(),
            assignments: DashMap::new(),
        }
    }

    pub fn socket_paths(&self) -> Vec<PathBuf> {
        socket_paths(
            &self.settings.socket_dir,
            &self.settings.project_kind,
            self.settings.probe_count,
        )
    }

    async fn connection(&self, socket: &Path) -> Option<Arc<SidecarClient>> {
        if let Some(client) = self.clients.get(socket).map(|c| Arc::clone(c.value()))
            && !client.is_closed()
        {
            return Some(client);
        }
        self.clients.remove(socket);
        match SidecarClient::connect(socket, ClientConfig::from(&self.settings)).await {
            Ok(client) => {
                let client = Arc::new(client);
                self.clients.insert(socket.to_path_buf(), Arc::clone(&client));
                Some(client)
            }
            Err(e) => {
                debug!(target: LOG_TARGET, "probe {}: {}", socket.display(), e);
                None
            }
        }
    }

    /// The client serving `file`, probing servers on first use.
    pub async fn client_for(&self, file: &Path) -> Option<Arc<SidecarClient>> {
        if !self.settings.enabled {
            return None;
        }
        let file = file.clean();
        if let Some(socket) = self.assignments.get(&file).map(|s| s.value().clone()) {
            if let Some(client) = self.connection(&socket).await {
                return Some(client);
            }
            self.assignments.remove(&file);
        }

        let file_name = file.to_string_lossy().into_owned();
        let mut sockets = Vec::new();
        let mut projects = Vec::new();
        for socket in self.socket_paths() {
            let Some(client) = self.connection(&socket).await else {
                continue;
            };
            if let Some(info) = client
                .request_as::<ProjectInfo>(PROJECT_INFO, &file_name, Vec::new())
                .await
            {
                sockets.push(socket);
                projects.push(info);
            }
        }

        let chosen = sockets.swap_remove(select(&projects, &file)?);
        debug!(target: LOG_TARGET, "{} served by {}", file.display(), chosen.display());
        self.assignments.insert(file, chosen.clone());
        self.connection(&chosen).await
    }

    /// Drop cached sidecar data for `file` on every connection.
    pub fn invalidate(&self, file: &Path) {
        let name = file.clean().to_string_lossy().into_owned();
        for client in self.clients.iter() {
            client.value().invalidate(&name);
        }
    }

    /// Ask the server responsible for `file`; `None` when no server is
    /// reachable or the request fails.
    pub async fn request(&self, kind: &str, file: &Path, args: Vec<Value>) -> Option<Value> {
        let client = self.client_for(file).await?;
        client
            .request(kind, &file.clean().to_string_lossy(), args)
            .await
    }
}
