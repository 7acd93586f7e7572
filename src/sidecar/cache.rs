//! Client-side cache folded from notifications and responses.

use dashmap::DashMap;
use serde_json::Value;

use super::protocol::Notification;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedValue {
    pub data: Value,
    /// Set when the value came from a response to our own request
    pub authoritative: bool,
}

/// Values keyed by (type, file name).
///
/// Pushed notifications are placeholders; an authoritative response for the
/// same key overwrites them, and later pushes do not overwrite an
/// authoritative value.
#[derive(Debug, Default)]
pub struct NotificationCache {
    entries: DashMap<(String, String), CachedValue>,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold_notification(&self, notification: &Notification) {
        let key = (notification.kind.clone(), notification.file.clone());
        self.entries
            .entry(key)
            .and_modify(|cached| {
                if !cached.authoritative {
                    cached.data = notification.data.clone();
                }
            })
            .or_insert_with(|| CachedValue {
                data: notification.data.clone(),
                authoritative: false,
            });
    }

    pub fn record_response(&self, kind: &str, file: &str, data: Value) {
        self.entries.insert(
            (kind.to_string(), file.to_string()),
            CachedValue {
                data,
                authoritative: true,
            },
        );
    }

    pub fn get(&self, kind: &str, file: &str) -> Option<CachedValue> {
        self.entries
            .get(&(kind.to_string(), file.to_string()))
            .map(|entry| entry.value().clone())
    }

    /// Drop every entry for `file`, e.g. after the file changed.
    pub fn invalidate_file(&self, file: &str) {
        self.entries.retain(|(_, f), _| f != file);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
