pub mod document;
pub mod tree;
pub mod xml;

pub use document::MetsDocument;
pub use tree::{EntryId, EntryKind, FsEntry, FsTree, MetadataRef, MetadataSection};
