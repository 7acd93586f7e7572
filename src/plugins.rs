//! Plugins shipped with the server.
//!
//! Backend language services for the block languages are external; these
//! cover what only the container format knows about.

pub mod component_tags;
pub mod sfc_structure;

use std::sync::Arc;

use crate::plugin::Plugin;

/// The built-in plugin set, in dispatch order.
pub fn builtin() -> Vec<Arc<Plugin>> {
    vec![
        Arc::new(sfc_structure::plugin()),
        Arc::new(component_tags::plugin()),
    ]
}
