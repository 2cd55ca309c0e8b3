//! In-memory object store.
//!
//! Backs tests and the standalone gateway. Buckets hold flat keys; listings
//! roll keys up at the delimiter the way an S3-style service does.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::store::*;
use crate::types::Timestamp;

/// The four store verbs, for counters and fault injection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreVerb {
    /// HEAD
    Head,
    /// PUT (upload, bucket create, copy)
    Put,
    /// LIST
    List,
    /// DELETE
    Delete,
}

/// Call counters for the in-memory store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryStoreStats {
    /// Number of head calls.
    pub heads: u64,
    /// Number of put calls, copies included.
    pub puts: u64,
    /// Number of put calls that were copies.
    pub copies: u64,
    /// Number of list calls.
    pub lists: u64,
    /// Number of delete calls.
    pub deletes: u64,
}

#[derive(Clone, Debug)]
struct StoredObject {
    size: u64,
    mtime: Timestamp,
    content_type: Option<String>,
}

#[derive(Clone, Debug)]
struct Bucket {
    created: Timestamp,
    objects: BTreeMap<String, StoredObject>,
}

/// Thread-safe in-memory object store.
pub struct MemoryObjectStore {
    buckets: Mutex<BTreeMap<String, Bucket>>,
    stats: Mutex<MemoryStoreStats>,
    faults: Mutex<HashMap<StoreVerb, Vec<StoreError>>>,
    offline: Mutex<bool>,
}

impl MemoryObjectStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(BTreeMap::new()),
            stats: Mutex::new(MemoryStoreStats::default()),
            faults: Mutex::new(HashMap::new()),
            offline: Mutex::new(false),
        }
    }

    /// Creates a bucket if it does not exist.
    pub fn create_bucket(&self, name: &str) {
        self.buckets
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| Bucket {
                created: Timestamp::now(),
                objects: BTreeMap::new(),
            });
    }

    /// Stores an object of `size` bytes, creating the bucket if needed.
    pub fn insert_object(&self, container: &str, key: &str, size: u64) {
        self.create_bucket(container);
        let mut buckets = self.buckets.lock();
        if let Some(bucket) = buckets.get_mut(container) {
            bucket.objects.insert(
                key.to_string(),
                StoredObject {
                    size,
                    mtime: Timestamp::now(),
                    content_type: None,
                },
            );
        }
    }

    /// Returns true if the object exists.
    pub fn contains(&self, container: &str, key: &str) -> bool {
        self.buckets
            .lock()
            .get(container)
            .map(|b| b.objects.contains_key(key))
            .unwrap_or(false)
    }

    /// Number of objects in a bucket.
    pub fn object_count(&self, container: &str) -> usize {
        self.buckets
            .lock()
            .get(container)
            .map(|b| b.objects.len())
            .unwrap_or(0)
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> MemoryStoreStats {
        self.stats.lock().clone()
    }

    /// Makes the next call of `verb` fail with `err`. Queued faults fire in
    /// order.
    pub fn fail_next(&self, verb: StoreVerb, err: StoreError) {
        self.faults.lock().entry(verb).or_default().push(err);
    }

    /// While offline every call fails with a transport error.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock() = offline;
    }

    fn record(&self, verb: StoreVerb) -> StoreResult<()> {
        {
            let mut stats = self.stats.lock();
            match verb {
                StoreVerb::Head => stats.heads += 1,
                StoreVerb::Put => stats.puts += 1,
                StoreVerb::List => stats.lists += 1,
                StoreVerb::Delete => stats.deletes += 1,
            }
        }
        if *self.offline.lock() {
            return Err(StoreError::Transport("store offline".to_string()));
        }
        let mut faults = self.faults.lock();
        if let Some(queue) = faults.get_mut(&verb) {
            if !queue.is_empty() {
                return Err(queue.remove(0));
            }
        }
        Ok(())
    }

    fn list_buckets(&self, req: &ListRequest) -> ListPage {
        let buckets = self.buckets.lock();
        let entries = buckets.iter().map(|(name, b)| ListEntry {
            key: name.clone(),
            name: name.clone(),
            is_dir: true,
            size: 0,
            mtime: b.created,
        });
        paginate(entries.collect(), "", req.marker.as_deref(), req.max_keys)
    }
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolls raw keys up into one entry per child name below `prefix`.
fn roll_up(objects: &BTreeMap<String, StoredObject>, prefix: &str, delimiter: &str) -> Vec<ListEntry> {
    let mut by_name: BTreeMap<String, ListEntry> = BTreeMap::new();
    for (key, obj) in objects.range(prefix.to_string()..) {
        let Some(rest) = key.strip_prefix(prefix) else {
            break;
        };
        match rest.split_once(delimiter) {
            Some((name, _)) => {
                if name.is_empty() {
                    continue;
                }
                let entry = by_name.entry(name.to_string()).or_insert_with(|| ListEntry {
                    key: format!("{prefix}{name}{delimiter}"),
                    name: name.to_string(),
                    is_dir: true,
                    size: 0,
                    mtime: obj.mtime,
                });
                entry.is_dir = true;
            }
            None => {
                if rest.is_empty() {
                    continue;
                }
                let is_marker = obj.content_type.as_deref() == Some(DIRECTORY_CONTENT_TYPE);
                let entry = by_name.entry(rest.to_string()).or_insert_with(|| ListEntry {
                    key: key.clone(),
                    name: rest.to_string(),
                    is_dir: is_marker,
                    size: obj.size,
                    mtime: obj.mtime,
                });
                // An object under the name wins over the common prefix.
                entry.key = key.clone();
                entry.is_dir |= is_marker;
            }
        }
    }
    by_name.into_values().collect()
}

/// Cuts one page out of name-ordered entries. A marker resumes strictly after
/// the entry it names, whether it is an object key or a common prefix.
fn paginate(entries: Vec<ListEntry>, prefix: &str, marker: Option<&str>, max_keys: usize) -> ListPage {
    let start = match marker {
        Some(m) => {
            let after = m.strip_prefix(prefix).unwrap_or(m).trim_end_matches(DELIMITER);
            entries
                .iter()
                .position(|e| e.name.as_str() > after)
                .unwrap_or(entries.len())
        }
        None => 0,
    };
    let max_keys = max_keys.max(1);
    let remaining = &entries[start..];
    let take = remaining.len().min(max_keys);
    let page: Vec<ListEntry> = remaining[..take].to_vec();
    let is_truncated = remaining.len() > take;
    ListPage {
        next_marker: page.last().map(|e| e.key.clone()),
        entries: page,
        is_truncated,
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn head(&self, path: &ObjectPath) -> StoreResult<HeadOutcome> {
        self.record(StoreVerb::Head)?;
        let buckets = self.buckets.lock();
        let Some(bucket) = buckets.get(&path.container) else {
            return Ok(HeadOutcome::NotFound);
        };
        if path.is_container() {
            return Ok(HeadOutcome::Found(ObjectMeta {
                size: 0,
                mtime: bucket.created,
                content_type: Some(DIRECTORY_CONTENT_TYPE.to_string()),
            }));
        }
        Ok(match bucket.objects.get(&path.key) {
            Some(obj) => HeadOutcome::Found(ObjectMeta {
                size: obj.size,
                mtime: obj.mtime,
                content_type: obj.content_type.clone(),
            }),
            None => HeadOutcome::NotFound,
        })
    }

    async fn put(&self, path: &ObjectPath, req: PutRequest) -> StoreResult<()> {
        self.record(StoreVerb::Put)?;
        if path.container.is_empty() {
            return Err(StoreError::Rejected { status: 400 });
        }
        let mut buckets = self.buckets.lock();
        if path.is_container() {
            buckets.entry(path.container.clone()).or_insert_with(|| Bucket {
                created: Timestamp::now(),
                objects: BTreeMap::new(),
            });
            return Ok(());
        }

        let stored = match &req.copy_source {
            Some(src) => {
                self.stats.lock().copies += 1;
                let source = buckets
                    .get(&src.container)
                    .and_then(|b| b.objects.get(&src.key))
                    .ok_or(StoreError::Rejected { status: 404 })?;
                StoredObject {
                    mtime: Timestamp::now(),
                    ..source.clone()
                }
            }
            None => StoredObject {
                size: req.content_length,
                mtime: Timestamp::now(),
                content_type: req.content_type.clone(),
            },
        };
        let bucket = buckets
            .get_mut(&path.container)
            .ok_or(StoreError::Rejected { status: 404 })?;
        bucket.objects.insert(path.key.clone(), stored);
        Ok(())
    }

    async fn list(&self, req: &ListRequest) -> StoreResult<ListPage> {
        self.record(StoreVerb::List)?;
        if req.container.is_empty() {
            return Ok(self.list_buckets(req));
        }
        let buckets = self.buckets.lock();
        let bucket = buckets
            .get(&req.container)
            .ok_or(StoreError::Rejected { status: 404 })?;
        let entries = roll_up(&bucket.objects, &req.prefix, &req.delimiter);
        Ok(paginate(entries, &req.prefix, req.marker.as_deref(), req.max_keys))
    }

    async fn delete(&self, path: &ObjectPath) -> StoreResult<()> {
        self.record(StoreVerb::Delete)?;
        let mut buckets = self.buckets.lock();
        if path.is_container() {
            if let Some(bucket) = buckets.get(&path.container) {
                if !bucket.objects.is_empty() {
                    return Err(StoreError::Rejected { status: 409 });
                }
            }
            buckets.remove(&path.container);
            return Ok(());
        }
        if let Some(bucket) = buckets.get_mut(&path.container) {
            bucket.objects.remove(&path.key);
        }
        Ok(())
    }
}
