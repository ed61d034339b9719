//! Type-erased archival: a registry of per-type codecs and a record that
//! carries a payload together with the identifier of the type it came from.

pub mod archivable;
pub mod coder;
pub mod registry;

pub use archivable::Archivable;
pub use coder::{ArchiveCoder, Decoded, TypeTag};
pub use registry::{LazyLoader, Resolution, TypeDescriptor, TypeRegistry, TypeResolver};
pub use shared::{Error, Result};
