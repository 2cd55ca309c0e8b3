#![warn(missing_docs)]

//! BucketFS namespace layer: maps a POSIX-like hierarchy onto a flat object store

pub mod config;
pub mod handle_key;
pub mod memstore;
pub mod node;
pub mod store;
pub mod tree;
pub mod types;

pub use config::{NamespaceConfig, RenameMode};
pub use handle_key::HandleKey;
pub use memstore::{MemoryObjectStore, MemoryStoreStats, StoreVerb};
pub use node::NamespaceNode;
pub use store::{ObjectPath, ObjectStore, StoreContext, StoreError};
pub use tree::{DirEntry, DirPage, NamespaceTree};
pub use types::{AttrMask, MetaError, MetaResult, NodeAttr, NodeKind, Stat, Timestamp};
