//! Out-of-process metadata cache.
//!
//! The dispatch engine never depends on the sidecar. Plugins that want
//! type-derived data reach it through the [`SidecarLocator`] carried in the
//! request context and treat every failure as "no data".

pub mod cache;
pub mod client;
pub mod discovery;
pub mod pending;
pub mod protocol;
pub mod server;

pub use cache::{CachedValue, NotificationCache};
pub use client::{ClientConfig, SidecarClient};
pub use discovery::{PROJECT_INFO, ProjectInfo, SidecarLocator, select, socket_paths};
pub use pending::{Delivery, PendingTable, RequestState};
pub use protocol::{Frame, FrameReader, Notification, Request, Response, write_frame};
pub use server::{RequestHandler, SeqDeduper, Seen, serve};
