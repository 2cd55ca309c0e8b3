//! Core types shared across the namespace layer.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest accepted leaf name, in bytes.
pub const MAX_NAME_LEN: usize = 1024;

/// Longest accepted object key, in bytes.
pub const MAX_PATH_LEN: usize = 1024;

/// POSIX directory type bits.
pub const S_IFDIR: u32 = 0o040000;
/// POSIX regular file type bits.
pub const S_IFREG: u32 = 0o100000;
/// Mask covering the POSIX type bits.
pub const S_IFMT: u32 = 0o170000;

/// Permission bits given to directories that carry no explicit mode.
pub const DEFAULT_DIR_PERMS: u32 = 0o777;
/// Permission bits given to files that carry no explicit mode.
pub const DEFAULT_FILE_PERMS: u32 = 0o666;

/// Block size reported for regular files.
pub const STAT_BLKSIZE: u32 = 4096;

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// Returns the current timestamp
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }

    /// Builds a timestamp from whole seconds.
    pub fn from_secs(secs: u64) -> Self {
        Self { secs, nanos: 0 }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// What a namespace node stands for. Root is always a directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// The mount root; its children are containers (buckets).
    Root,
    /// A container or a directory marker inside one.
    Directory,
    /// A regular object.
    File,
}

impl NodeKind {
    /// Returns true for Root and Directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Directory)
    }

    /// Returns the POSIX S_IFMT bits for this kind
    pub fn mode_bits(&self) -> u32 {
        if self.is_dir() {
            S_IFDIR
        } else {
            S_IFREG
        }
    }

    /// Default permission bits for a freshly resolved node of this kind.
    pub fn default_perms(&self) -> u32 {
        if self.is_dir() {
            DEFAULT_DIR_PERMS
        } else {
            DEFAULT_FILE_PERMS
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Root => write!(f, "root"),
            NodeKind::Directory => write!(f, "directory"),
            NodeKind::File => write!(f, "file"),
        }
    }
}

/// Stat-like attributes carried by every namespace node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAttr {
    /// Device id (the filesystem instance number)
    pub dev: u64,
    /// Size in bytes
    pub size: u64,
    /// Link count
    pub nlink: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Mode, type bits included
    pub mode: u32,
    /// Last access time
    pub atime: Timestamp,
    /// Last modification time
    pub mtime: Timestamp,
    /// Last status change time
    pub ctime: Timestamp,
}

impl NodeAttr {
    /// Attributes of a newly resolved node of the given kind.
    pub fn new(kind: NodeKind, dev: u64) -> Self {
        let now = Timestamp::now();
        Self {
            dev,
            size: 0,
            nlink: 1,
            uid: 0,
            gid: 0,
            mode: kind.default_perms() | kind.mode_bits(),
            atime: now,
            mtime: now,
            ctime: now,
        }
    }
}

/// Selects which fields of a [`NodeAttr`] a setattr-style call touches.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AttrMask(u32);

impl AttrMask {
    /// No fields.
    pub const NONE: AttrMask = AttrMask(0);
    /// Permission bits.
    pub const MODE: AttrMask = AttrMask(0x01);
    /// Owner.
    pub const UID: AttrMask = AttrMask(0x02);
    /// Group.
    pub const GID: AttrMask = AttrMask(0x04);
    /// Modification time.
    pub const MTIME: AttrMask = AttrMask(0x08);
    /// Access time.
    pub const ATIME: AttrMask = AttrMask(0x10);
    /// Size (truncate); not supported by the object backend.
    pub const SIZE: AttrMask = AttrMask(0x20);
    /// Change time.
    pub const CTIME: AttrMask = AttrMask(0x40);

    /// Creates a mask from raw bits.
    pub fn from_bits(bits: u32) -> Self {
        AttrMask(bits)
    }

    /// Returns the raw bits.
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Checks if this mask contains another mask.
    pub fn contains(&self, other: AttrMask) -> bool {
        (self.0 & other.0) != 0
    }

    /// Returns true when no field is selected.
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for AttrMask {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        AttrMask(self.0 | rhs.0)
    }
}

/// Transient state bits of a namespace node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeFlags(u32);

impl NodeFlags {
    /// No flag set.
    pub const NONE: NodeFlags = NodeFlags(0);
    /// The protocol layer holds the node open.
    pub const OPEN: NodeFlags = NodeFlags(0x01);
    /// A rename is copying this node.
    pub const LOCKED: NodeFlags = NodeFlags(0x40);
    /// The backing object was moved or removed.
    pub const DELETED: NodeFlags = NodeFlags(0x80);

    /// Checks if this flags contains another flags.
    pub fn contains(&self, other: NodeFlags) -> bool {
        (self.0 & other.0) != 0
    }

    /// Sets the given bits.
    pub fn insert(&mut self, other: NodeFlags) {
        self.0 |= other.0;
    }

    /// Clears the given bits.
    pub fn remove(&mut self, other: NodeFlags) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        NodeFlags(self.0 | rhs.0)
    }
}

/// POSIX stat projection of a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Device id
    pub dev: u64,
    /// Inode number (object hash of the handle key)
    pub ino: u64,
    /// Mode, type bits included
    pub mode: u32,
    /// Link count
    pub nlink: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Size in bytes
    pub size: u64,
    /// Preferred I/O block size
    pub blksize: u32,
    /// 512-byte blocks
    pub blocks: u64,
    /// Last access time
    pub atime: Timestamp,
    /// Last modification time
    pub mtime: Timestamp,
    /// Last status change time
    pub ctime: Timestamp,
}

impl Stat {
    /// Returns true if the mode carries the directory type bits.
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }
}

/// Error types for namespace operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetaError {
    /// No object exists at the resolved path.
    #[error("no such entry: {0}")]
    NoSuchEntry(String),

    /// An object already exists at the target path.
    #[error("entry already exists: {0}")]
    AlreadyExists(String),

    /// Bad parent, empty or malformed name, or bad cursor.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Name or object key exceeds the fixed maximum.
    #[error("path too long: {len} bytes (max {max})")]
    PathTooLong {
        /// Offending length in bytes
        len: usize,
        /// Configured maximum
        max: usize,
    },

    /// Operation denied, e.g. directory rename or rename of an open node.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The object store could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The object store answered with an unexpected status.
    #[error("unexpected backend response: {0}")]
    Unknown(String),

    /// Destination buffer is smaller than the handle digest.
    #[error("buffer too small: need {needed} bytes, got {got}")]
    TooSmall {
        /// Bytes required
        needed: usize,
        /// Bytes supplied
        got: usize,
    },

    /// Operation is outside what the object backend can do.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// The handle no longer names a live node.
    #[error("stale handle")]
    StaleHandle,

    /// Attempted to remove a directory that still has entries.
    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),
}

/// Result alias for namespace operations.
pub type MetaResult<T> = Result<T, MetaError>;

/// Checks a leaf name: non-empty, no separator, within [`MAX_NAME_LEN`].
pub fn validate_name(name: &str) -> MetaResult<()> {
    if name.is_empty() {
        return Err(MetaError::InvalidArgument("empty name".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(MetaError::PathTooLong {
            len: name.len(),
            max: MAX_NAME_LEN,
        });
    }
    if name == "." || name == ".." {
        return Err(MetaError::InvalidArgument(format!("reserved name: {name}")));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(MetaError::InvalidArgument(format!(
            "name contains a separator: {name}"
        )));
    }
    Ok(())
}
