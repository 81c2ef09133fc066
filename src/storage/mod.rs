pub mod document;
pub mod memory;
pub mod persistence;

pub use document::{Collection, Document, DocumentRef};
pub use memory::{InMemoryDocumentStore, MemoryTx, VersionedDocument};
pub use persistence::{SnapshotEntry, StoreSnapshot};
