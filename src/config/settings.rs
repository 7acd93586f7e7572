use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One configuration layer as written by the user.
///
/// Every field is optional so layers can be merged; see
/// [`merge_all`](super::merge_all).
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsLayer {
    /// Completion labels with this prefix are implementation details
    pub internal_item_prefix: Option<String>,
    /// Language id of template interpolation documents
    pub expression_language: Option<String>,
    /// Block tag → language id, for blocks without a `lang` attribute
    pub languages: Option<HashMap<String, String>>,
    pub sidecar: Option<SidecarLayer>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarLayer {
    pub enabled: Option<bool>,
    pub socket_dir: Option<PathBuf>,
    pub project_kind: Option<String>,
    pub probe_count: Option<u32>,
    pub retry_interval_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub dedup_window_ms: Option<u64>,
}

/// Resolved settings with defaults applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YosegiSettings {
    pub internal_item_prefix: String,
    pub expression_language: String,
    pub languages: HashMap<String, String>,
    pub sidecar: SidecarSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SidecarSettings {
    pub enabled: bool,
    pub socket_dir: PathBuf,
    /// Socket name prefix, as in `{socket_dir}/{project_kind}-{n}.sock`
    pub project_kind: String,
    pub probe_count: u32,
    pub retry_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub dedup_window_ms: u64,
}

impl SidecarSettings {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn dedup_window(&self) -> Duration {
        Duration::from_millis(self.dedup_window_ms)
    }
}
