//! Configuration layers and their merge.
//!
//! Precedence, lowest first: programmed defaults, user config
//! (`$XDG_CONFIG_HOME/yosegi/yosegi.toml` or the platform config dir),
//! project `yosegi.toml`, then the editor's initialization options or
//! `workspace/didChangeConfiguration` payload.

pub mod settings;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub use settings::{SettingsLayer, SidecarLayer, SidecarSettings, YosegiSettings};

use crate::error::{YosegiError, YosegiResult};

pub const CONFIG_FILE_NAME: &str = "yosegi.toml";

pub(crate) const DEFAULT_INTERNAL_ITEM_PREFIX: &str = "__";
const DEFAULT_EXPRESSION_LANGUAGE: &str = "javascript";
const DEFAULT_PROJECT_KIND: &str = "tsserver";
const DEFAULT_PROBE_COUNT: u32 = 8;
const DEFAULT_RETRY_INTERVAL_MS: u64 = 1000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5000;
const DEFAULT_DEDUP_WINDOW_MS: u64 = 10_000;

/// Directory sidecar servers create their sockets in.
pub fn default_socket_dir() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("yosegi")
}

/// The defaults as a layer, so the merge treats them like any other.
pub fn default_layer() -> SettingsLayer {
    SettingsLayer {
        internal_item_prefix: Some(DEFAULT_INTERNAL_ITEM_PREFIX.to_string()),
        expression_language: Some(DEFAULT_EXPRESSION_LANGUAGE.to_string()),
        languages: Some(HashMap::new()),
        sidecar: Some(SidecarLayer {
            enabled: Some(true),
            socket_dir: Some(default_socket_dir()),
            project_kind: Some(DEFAULT_PROJECT_KIND.to_string()),
            probe_count: Some(DEFAULT_PROBE_COUNT),
            retry_interval_ms: Some(DEFAULT_RETRY_INTERVAL_MS),
            request_timeout_ms: Some(DEFAULT_REQUEST_TIMEOUT_MS),
            dedup_window_ms: Some(DEFAULT_DEDUP_WINDOW_MS),
        }),
    }
}

/// Path of the user-wide configuration file.
///
/// `$XDG_CONFIG_HOME` wins over the platform config directory.
pub fn user_config_path() -> Option<PathBuf> {
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(dirs::config_dir)?;
    Some(base.join("yosegi").join(CONFIG_FILE_NAME))
}

/// Parse one TOML layer from disk.
pub fn load_toml_layer(path: &Path) -> YosegiResult<SettingsLayer> {
    let contents = fs::read_to_string(path)?;
    toml::from_str(&contents)
        .map_err(|e| YosegiError::config(format!("{}: {}", path.display(), e)))
}

/// `Ok(None)` when no user config exists.
pub fn load_user_config() -> YosegiResult<Option<SettingsLayer>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    load_toml_layer(&path).map(Some)
}

fn merge_sidecar(fallback: Option<SidecarLayer>, primary: Option<SidecarLayer>) -> Option<SidecarLayer> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(layer), None) | (None, Some(layer)) => Some(layer),
        (Some(fallback), Some(primary)) => Some(SidecarLayer {
            enabled: primary.enabled.or(fallback.enabled),
            socket_dir: primary.socket_dir.or(fallback.socket_dir),
            project_kind: primary.project_kind.or(fallback.project_kind),
            probe_count: primary.probe_count.or(fallback.probe_count),
            retry_interval_ms: primary.retry_interval_ms.or(fallback.retry_interval_ms),
            request_timeout_ms: primary.request_timeout_ms.or(fallback.request_timeout_ms),
            dedup_window_ms: primary.dedup_window_ms.or(fallback.dedup_window_ms),
        }),
    }
}

fn merge_languages(
    fallback: Option<HashMap<String, String>>,
    primary: Option<HashMap<String, String>>,
) -> Option<HashMap<String, String>> {
    match (fallback, primary) {
        (None, None) => None,
        (Some(map), None) | (None, Some(map)) => Some(map),
        (Some(mut fallback), Some(primary)) => {
            fallback.extend(primary);
            Some(fallback)
        }
    }
}

/// Merge two layers, preferring values from `primary`.
pub fn merge_settings(fallback: SettingsLayer, primary: SettingsLayer) -> SettingsLayer {
    SettingsLayer {
        internal_item_prefix: primary.internal_item_prefix.or(fallback.internal_item_prefix),
        expression_language: primary.expression_language.or(fallback.expression_language),
        languages: merge_languages(fallback.languages, primary.languages),
        sidecar: merge_sidecar(fallback.sidecar, primary.sidecar),
    }
}

/// Merge layers in order; later layers override earlier ones.
pub fn merge_all(layers: &[Option<SettingsLayer>]) -> SettingsLayer {
    layers
        .iter()
        .flatten()
        .cloned()
        .fold(SettingsLayer::default(), merge_settings)
}

impl From<SettingsLayer> for YosegiSettings {
    fn from(layer: SettingsLayer) -> Self {
        let sidecar = layer.sidecar.unwrap_or_default();
        YosegiSettings {
            internal_item_prefix: layer
                .internal_item_prefix
                .unwrap_or_else(|| DEFAULT_INTERNAL_ITEM_PREFIX.to_string()),
            expression_language: layer
                .expression_language
                .unwrap_or_else(|| DEFAULT_EXPRESSION_LANGUAGE.to_string()),
            languages: layer.languages.unwrap_or_default(),
            sidecar: SidecarSettings {
                enabled: sidecar.enabled.unwrap_or(true),
                socket_dir: sidecar.socket_dir.unwrap_or_else(default_socket_dir),
                project_kind: sidecar
                    .project_kind
                    .unwrap_or_else(|| DEFAULT_PROJECT_KIND.to_string()),
                probe_count: sidecar.probe_count.unwrap_or(DEFAULT_PROBE_COUNT),
                retry_interval_ms: sidecar
                    .retry_interval_ms
                    .unwrap_or(DEFAULT_RETRY_INTERVAL_MS),
                request_timeout_ms: sidecar
                    .request_timeout_ms
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
                dedup_window_ms: sidecar.dedup_window_ms.unwrap_or(DEFAULT_DEDUP_WINDOW_MS),
            },
        }
    }
}

impl Default for YosegiSettings {
    fn default() -> Self {
        default_layer().into()
    }
}

impl Default for SidecarSettings {
    fn default() -> Self {
        YosegiSettings::default().sidecar
    }
}
