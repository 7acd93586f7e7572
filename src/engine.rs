//! Dispatch engine: fans an editor request out over every (virtual document,
//! plugin) pair of a host, translates coordinates both ways and merges the
//! answers.

mod blocking;
pub mod capability;
pub(crate) mod context;
pub(crate) mod feature;
pub(crate) mod merge;
pub mod semantic;
mod service;
mod teleport;
pub(crate) mod transform;
mod worker;

pub use blocking::BlockingQueue;
pub use context::{ProgressReporter, RequestContext};
pub use feature::Policy;
pub use semantic::{LEGEND_MODIFIERS, LEGEND_TYPES, legend};
pub use service::LanguageService;
