use serde_json::Value;
use std::path::Path;

use crate::config::{
    CONFIG_FILE_NAME, SettingsLayer, YosegiSettings, default_layer, load_toml_layer,
    load_user_config, merge_all,
};
use crate::error::YosegiResult;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsEventKind {
    Info,
    Warning,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingsEvent {
    pub kind: SettingsEventKind,
    pub message: String,
}

impl SettingsEvent {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            kind: SettingsEventKind::Warning,
            message: message.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsSource {
    InitializationOptions,
    ClientConfiguration,
}

impl SettingsSource {
    fn description(self) -> &'static str {
        match self {
            SettingsSource::InitializationOptions => "initialization options",
            SettingsSource::ClientConfiguration => "client configuration",
        }
    }
}

#[derive(Debug)]
pub struct SettingsLoadOutcome {
    pub settings: YosegiSettings,
    pub events: Vec<SettingsEvent>,
}

/// Load and merge every layer: defaults < user < project < override.
///
/// Broken layers are skipped with a warning event; loading never fails.
pub fn load_settings(
    root_path: Option<&Path>,
    override_settings: Option<(SettingsSource, Value)>,
) -> SettingsLoadOutcome {
    load_settings_with_user(load_user_config(), root_path, override_settings)
}

fn load_settings_with_user(
    user_config: YosegiResult<Option<SettingsLayer>>,
    root_path: Option<&Path>,
    override_settings: Option<(SettingsSource, Value)>,
) -> SettingsLoadOutcome {
    let mut events = Vec::new();

    let user = match user_config {
        Ok(Some(layer)) => {
            events.push(SettingsEvent::info("Loaded user config"));
            Some(layer)
        }
        Ok(None) => None,
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load user config: {}",
                err
            )));
            None
        }
    };
    let project = load_project_layer(root_path, &mut events);
    let overrides = override_settings
        .and_then(|(source, value)| parse_override_settings(source, value, &mut events));

    let merged = merge_all(&[Some(default_layer()), user, project, overrides]);
    SettingsLoadOutcome {
        settings: YosegiSettings::from(merged),
        events,
    }
}

fn load_project_layer(root_path: Option<&Path>, events: &mut Vec<SettingsEvent>) -> Option<SettingsLayer> {
    let config_path = root_path?.join(CONFIG_FILE_NAME);
    if !config_path.exists() {
        return None;
    }
    match load_toml_layer(&config_path) {
        Ok(layer) => {
            events.push(SettingsEvent::info(format!(
                "Loaded {}",
                config_path.display()
            )));
            Some(layer)
        }
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to load {}: {}",
                CONFIG_FILE_NAME, err
            )));
            None
        }
    }
}

fn parse_override_settings(
    source: SettingsSource,
    value: Value,
    events: &mut Vec<SettingsEvent>,
) -> Option<SettingsLayer> {
    if value.is_null() {
        return None;
    }
    match serde_json::from_value::<SettingsLayer>(value) {
        Ok(layer) => {
            events.push(SettingsEvent::info(format!(
                "Parsed {}",
                source.description()
            )));
            Some(layer)
        }
        Err(err) => {
            events.push(SettingsEvent::warning(format!(
                "Failed to parse {}: {}",
                source.description(),
                err
            )));
            None
        }
    }
}
