pub mod config;
pub mod document;
pub mod engine;
pub mod error;
pub mod lsp;
pub mod plugin;
pub mod plugins;
pub mod sidecar;
pub mod text;

pub use config::YosegiSettings;
pub use document::{DocumentRegistry, SfcLanguage, VirtualCodeGenerator};
pub use engine::{LanguageService, RequestContext};
pub use error::{YosegiError, YosegiResult};
pub use plugin::{Plugin, PluginDocument};

// Re-export the main server implementation
pub use lsp::YosegiLs;
