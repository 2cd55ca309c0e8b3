//! Content-addressed handle identity.
//!
//! A [`HandleKey`] is a pair of XXH64 hashes: the container component and the
//! object component. Top-level containers form their own hash namespace, so
//! direct children of a container hash only their name, while deeper nodes hash
//! their full container-qualified path under the container's component.

use serde::{Deserialize, Serialize};
use std::fmt;
use xxhash_rust::xxh64::xxh64;

use crate::types::{MetaError, MetaResult};

/// Seed shared by every key derivation. Changing it invalidates all handles
/// already given out to clients.
pub const HASH_SEED: u64 = 8675309;

/// Name the root node hashes as its object component.
pub const ROOT_NAME: &str = "/";

/// Width of the wire form of a key.
pub const WIRE_LEN: usize = 16;

/// Two-component identity of a namespace path.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleKey {
    /// Hash identifying the container namespace.
    pub container: u64,
    /// Hash identifying the object within that namespace.
    pub object: u64,
}

/// Hashes a UTF-8 string with the fixed seed.
pub fn hash_str(s: &str) -> u64 {
    xxh64(s.as_bytes(), HASH_SEED)
}

impl HandleKey {
    /// Creates a key from raw components.
    pub fn new(container: u64, object: u64) -> Self {
        Self { container, object }
    }

    /// Key of a mount root, from the filesystem identifier string.
    pub fn root(fsid: &str) -> Self {
        Self {
            container: hash_str(fsid),
            object: hash_str(ROOT_NAME),
        }
    }

    /// Derives the key of `name` below a parent.
    ///
    /// `parent_path` is the parent's container-qualified object key, and is only
    /// consulted when the parent sits deeper than a container.
    pub fn derive_child(parent: &HandleKey, parent_depth: u32, parent_path: &str, name: &str) -> Self {
        if parent_depth <= 1 {
            Self {
                container: parent.object,
                object: hash_str(name),
            }
        } else {
            let mut path = String::with_capacity(parent_path.len() + 1 + name.len());
            path.push_str(parent_path);
            path.push('/');
            path.push_str(name);
            Self {
                container: parent.container,
                object: hash_str(&path),
            }
        }
    }

    /// Fixed-width wire form: container then object, little-endian.
    pub fn to_wire(&self) -> [u8; WIRE_LEN] {
        let mut out = [0u8; WIRE_LEN];
        out[..8].copy_from_slice(&self.container.to_le_bytes());
        out[8..].copy_from_slice(&self.object.to_le_bytes());
        out
    }

    /// Writes the wire form into `buf`, returning the number of bytes written.
    pub fn write_wire(&self, buf: &mut [u8]) -> MetaResult<usize> {
        if buf.len() < WIRE_LEN {
            return Err(MetaError::TooSmall {
                needed: WIRE_LEN,
                got: buf.len(),
            });
        }
        buf[..WIRE_LEN].copy_from_slice(&self.to_wire());
        Ok(WIRE_LEN)
    }

    /// Parses the wire form. The slice must be exactly [`WIRE_LEN`] bytes.
    pub fn from_wire(bytes: &[u8]) -> MetaResult<Self> {
        if bytes.len() != WIRE_LEN {
            return Err(MetaError::InvalidArgument(format!(
                "handle must be {} bytes, got {}",
                WIRE_LEN,
                bytes.len()
            )));
        }
        let mut container = [0u8; 8];
        let mut object = [0u8; 8];
        container.copy_from_slice(&bytes[..8]);
        object.copy_from_slice(&bytes[8..]);
        Ok(Self {
            container: u64::from_le_bytes(container),
            object: u64::from_le_bytes(object),
        })
    }
}

impl fmt::Display for HandleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}:{:016x}", self.container, self.object)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_key_uses_fsid_and_root_name() {
        let key = HandleKey::root("/qs_fs-1");
        assert_eq!(key.container, hash_str("/qs_fs-1"));
        assert_eq!(key.object, hash_str("/"));
        assert_ne!(HandleKey::root("/qs_fs-1"), HandleKey::root("/qs_fs-2"));
    }

    #[test]
    fn test_container_children_hash_name_only() {
        let root = HandleKey::root("/qs_fs-1");
        let bucket = HandleKey::derive_child(&root, 0, "", "bucket1");
        assert_eq!(bucket.container, root.object);
        assert_eq!(bucket.object, hash_str("bucket1"));

        let dir = HandleKey::derive_child(&bucket, 1, "bucket1", "dir1");
        assert_eq!(dir.container, bucket.object);
        assert_eq!(dir.object, hash_str("dir1"));
    }

    #[test]
    fn test_nested_children_hash_full_path() {
        let root = HandleKey::root("/qs_fs-1");
        let bucket = HandleKey::derive_child(&root, 0, "", "bucket1");
        let dir = HandleKey::derive_child(&bucket, 1, "bucket1", "dir1");
        let file = HandleKey::derive_child(&dir, 2, "bucket1/dir1", "file1");
        assert_eq!(file.container, dir.container);
        assert_eq!(file.container, bucket.object);
        assert_eq!(file.object, hash_str("bucket1/dir1/file1"));
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let parent = HandleKey::new(11, 22);
        let a = HandleKey::derive_child(&parent, 3, "b/x/y", "z");
        let b = HandleKey::derive_child(&parent, 3, "b/x/y", "z");
        assert_eq!(a, b);
    }

    #[test]
    fn test_wire_roundtrip_extremes() {
        for key in [
            HandleKey::new(0, 0),
            HandleKey::new(u64::MAX, u64::MAX),
            HandleKey::new(0, u64::MAX),
            HandleKey::new(0x0102030405060708, 0x1112131415161718),
        ] {
            let wire = key.to_wire();
            assert_eq!(wire.len(), WIRE_LEN);
            assert_eq!(HandleKey::from_wire(&wire).unwrap(), key);
        }
    }

    #[test]
    fn test_wire_layout_container_first() {
        let key = HandleKey::new(1, 2);
        let wire = key.to_wire();
        assert_eq!(&wire[..8], &1u64.to_le_bytes());
        assert_eq!(&wire[8..], &2u64.to_le_bytes());
    }

    #[test]
    fn test_write_wire_too_small() {
        let key = HandleKey::new(5, 6);
        let mut small = [0u8; 15];
        assert_eq!(
            key.write_wire(&mut small),
            Err(MetaError::TooSmall { needed: 16, got: 15 })
        );
        let mut big = [0u8; 64];
        assert_eq!(key.write_wire(&mut big).unwrap(), 16);
        assert_eq!(HandleKey::from_wire(&big[..16]).unwrap(), key);
    }

    #[test]
    fn test_from_wire_rejects_bad_length() {
        assert!(matches!(
            HandleKey::from_wire(&[0u8; 8]),
            Err(MetaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_display() {
        let key = HandleKey::new(1, 255);
        assert_eq!(key.to_string(), "0000000000000001:00000000000000ff");
    }
}
