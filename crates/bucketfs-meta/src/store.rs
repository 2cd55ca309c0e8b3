//! Object-store adapter.
//!
//! The namespace layer only needs four verbs from the backend: HEAD, PUT
//! (optionally as a server-side copy), LIST with a delimiter and marker, and
//! DELETE. Failures are reported as [`StoreError`] and never retried here.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::types::{MetaError, MetaResult, Timestamp};

/// Content type marking a zero-length object as a directory.
pub const DIRECTORY_CONTENT_TYPE: &str = "application/x-directory";

/// Delimiter used for every hierarchical listing.
pub const DELIMITER: &str = "/";

/// Address of an object. An empty container addresses the account (bucket
/// listing); an empty key addresses the container itself.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectPath {
    /// Bucket name.
    pub container: String,
    /// Key within the bucket, without a leading slash.
    pub key: String,
}

impl ObjectPath {
    /// Creates a path from container and key.
    pub fn new(container: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            key: key.into(),
        }
    }

    /// Path naming a container.
    pub fn container(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    /// Returns true if this names a container rather than an object.
    pub fn is_container(&self) -> bool {
        self.key.is_empty()
    }
}

impl std::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.key.is_empty() {
            write!(f, "{}", self.container)
        } else {
            write!(f, "{}/{}", self.container, self.key)
        }
    }
}

/// Metadata returned by a successful HEAD.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Content length in bytes.
    pub size: u64,
    /// Last-modified time.
    pub mtime: Timestamp,
    /// Content type, when the backend reports one.
    pub content_type: Option<String>,
}

impl ObjectMeta {
    /// Returns true for zero-length directory markers.
    pub fn is_directory_marker(&self) -> bool {
        self.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE)
    }
}

/// Result of a HEAD.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HeadOutcome {
    /// Nothing stored at the path.
    NotFound,
    /// Object or container exists.
    Found(ObjectMeta),
}

/// Body-less PUT: either a zero-length marker or a server-side copy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PutRequest {
    /// Content length; always zero for markers and copies.
    pub content_length: u64,
    /// Content type to store.
    pub content_type: Option<String>,
    /// When set, copy this object instead of uploading.
    pub copy_source: Option<ObjectPath>,
}

impl PutRequest {
    /// Zero-length marker; directories get the directory content type.
    pub fn marker(directory: bool) -> Self {
        Self {
            content_length: 0,
            content_type: directory.then(|| DIRECTORY_CONTENT_TYPE.to_string()),
            copy_source: None,
        }
    }

    /// Server-side copy from `source`.
    pub fn copy_from(source: ObjectPath) -> Self {
        Self {
            content_length: 0,
            content_type: None,
            copy_source: Some(source),
        }
    }
}

/// One page request for a delimited listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRequest {
    /// Bucket to list; empty lists the buckets themselves.
    pub container: String,
    /// Key prefix, ending with the delimiter unless empty.
    pub prefix: String,
    /// Hierarchy delimiter.
    pub delimiter: String,
    /// Resume strictly after this key.
    pub marker: Option<String>,
    /// Page size cap.
    pub max_keys: usize,
}

/// One child reported by a listing, relative to the listed prefix.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListEntry {
    /// Raw backend key (or common prefix) of the entry.
    pub key: String,
    /// Leaf name below the listed prefix.
    pub name: String,
    /// Common prefix or directory marker.
    pub is_dir: bool,
    /// Content length for objects.
    pub size: u64,
    /// Last-modified time for objects.
    pub mtime: Timestamp,
}

/// One page of a listing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Entries in name order, one per distinct child name.
    pub entries: Vec<ListEntry>,
    /// Marker to pass for the following page.
    pub next_marker: Option<String>,
    /// True when more entries remain after this page.
    pub is_truncated: bool,
}

/// Failures reported by an object store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Network or transport failure.
    #[error("transport error: {0}")]
    Transport(String),
    /// The service answered with a non-success status.
    #[error("request rejected with status {status}")]
    Rejected {
        /// HTTP-style status code
        status: u16,
    },
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for MetaError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Transport(msg) => MetaError::BackendUnavailable(msg),
            StoreError::Rejected { status: 404 } => {
                MetaError::NoSuchEntry("object vanished".to_string())
            }
            StoreError::Rejected { status } => MetaError::Unknown(format!("status {status}")),
        }
    }
}

/// Flat object store the namespace is mapped onto.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Looks up an object or container.
    async fn head(&self, path: &ObjectPath) -> StoreResult<HeadOutcome>;

    /// Writes a zero-length object, creates a container, or copies an object.
    async fn put(&self, path: &ObjectPath, req: PutRequest) -> StoreResult<()>;

    /// Lists one page of direct children under a prefix.
    async fn list(&self, req: &ListRequest) -> StoreResult<ListPage>;

    /// Removes an object. Removing a missing object succeeds.
    async fn delete(&self, path: &ObjectPath) -> StoreResult<()>;
}

/// Backend service context shared by every mount on it.
///
/// Hands out filesystem instance numbers and owns the shutdown switch. After
/// [`StoreContext::shutdown`] every call fails with
/// [`MetaError::BackendUnavailable`].
pub struct StoreContext {
    store: Arc<dyn ObjectStore>,
    next_instance: AtomicU32,
    shut_down: AtomicBool,
}

impl StoreContext {
    /// Wraps a store.
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            next_instance: AtomicU32::new(0),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Allocates the next filesystem instance number, starting at 1.
    pub fn new_instance(&self) -> MetaResult<u32> {
        self.check()?;
        Ok(self.next_instance.fetch_add(1, Ordering::Relaxed) + 1)
    }

    /// Stops serving requests through this context.
    pub fn shutdown(&self) {
        if !self.shut_down.swap(true, Ordering::SeqCst) {
            info!("object store context shut down");
        }
    }

    /// Returns true once shut down.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    fn check(&self) -> MetaResult<()> {
        if self.is_shut_down() {
            return Err(MetaError::BackendUnavailable(
                "store context is shut down".to_string(),
            ));
        }
        Ok(())
    }

    /// HEAD through the context.
    pub async fn head(&self, path: &ObjectPath) -> MetaResult<HeadOutcome> {
        self.check()?;
        debug!(%path, "head");
        self.store.head(path).await.map_err(|e| {
            warn!(%path, error = %e, "head failed");
            MetaError::from(e)
        })
    }

    /// PUT through the context.
    pub async fn put(&self, path: &ObjectPath, req: PutRequest) -> MetaResult<()> {
        self.check()?;
        debug!(%path, copy = req.copy_source.is_some(), "put");
        self.store.put(path, req).await.map_err(|e| {
            warn!(%path, error = %e, "put failed");
            MetaError::from(e)
        })
    }

    /// LIST through the context.
    pub async fn list(&self, req: &ListRequest) -> MetaResult<ListPage> {
        self.check()?;
        debug!(container = %req.container, prefix = %req.prefix, marker = ?req.marker, "list");
        self.store.list(req).await.map_err(|e| {
            warn!(container = %req.container, prefix = %req.prefix, error = %e, "list failed");
            MetaError::from(e)
        })
    }

    /// DELETE through the context.
    pub async fn delete(&self, path: &ObjectPath) -> MetaResult<()> {
        self.check()?;
        debug!(%path, "delete");
        self.store.delete(path).await.map_err(|e| {
            warn!(%path, error = %e, "delete failed");
            MetaError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::MemoryObjectStore;

    #[test]
    fn test_object_path_display() {
        assert_eq!(ObjectPath::container("b").to_string(), "b");
        assert_eq!(ObjectPath::new("b", "d/f").to_string(), "b/d/f");
        assert!(ObjectPath::container("b").is_container());
    }

    #[test]
    fn test_put_request_builders() {
        let dir = PutRequest::marker(true);
        assert_eq!(dir.content_length, 0);
        assert_eq!(dir.content_type.as_deref(), Some(DIRECTORY_CONTENT_TYPE));
        assert_eq!(PutRequest::marker(false).content_type, None);
        let copy = PutRequest::copy_from(ObjectPath::new("b", "k"));
        assert_eq!(copy.copy_source, Some(ObjectPath::new("b", "k")));
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            MetaError::from(StoreError::Transport("down".into())),
            MetaError::BackendUnavailable(_)
        ));
        assert!(matches!(
            MetaError::from(StoreError::Rejected { status: 500 }),
            MetaError::Unknown(_)
        ));
    }

    #[test]
    fn test_instances_are_monotonic() {
        let ctx = StoreContext::new(Arc::new(MemoryObjectStore::new()));
        assert_eq!(ctx.new_instance().unwrap(), 1);
        assert_eq!(ctx.new_instance().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_calls() {
        let store = Arc::new(MemoryObjectStore::new());
        store.create_bucket("b");
        let ctx = StoreContext::new(store.clone());
        assert!(matches!(
            ctx.head(&ObjectPath::container("b")).await.unwrap(),
            HeadOutcome::Found(_)
        ));

        ctx.shutdown();
        assert!(ctx.is_shut_down());
        assert!(matches!(
            ctx.head(&ObjectPath::container("b")).await,
            Err(MetaError::BackendUnavailable(_))
        ));
        assert!(ctx.new_instance().is_err());
        assert_eq!(store.stats().heads, 1);
    }
}
