//! Host documents, their virtual documents, and the mappings between them.

pub mod generator;
pub mod map;
pub mod mapping;
pub mod registry;
pub mod sfc;
pub mod teleport;
pub mod virtual_doc;
pub mod virtual_uri;

pub use generator::{BlockSlice, EmbeddedCode, GeneratedCode, VirtualCodeGenerator};
pub use map::{CodeFilter, DocumentMap};
pub use mapping::{CodeInformation, Mapping, MappingTable, SegmentMode, Span};
pub use registry::{DocumentRegistry, DocumentSnapshot, RegistryUpdate};
pub use sfc::SfcLanguage;
pub use teleport::{Teleport, TeleportTable};
pub use virtual_doc::{NodeId, TreeUpdate, VirtualDocument, VirtualNode, VirtualTree};
pub use virtual_uri::VirtualDocumentUri;
