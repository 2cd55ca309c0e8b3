//! NFSv3-shaped handle and attribute types handed to the protocol front-end

use bucketfs_meta::handle_key::WIRE_LEN;
use bucketfs_meta::types::{MAX_NAME_LEN, MAX_PATH_LEN, S_IFMT};
use bucketfs_meta::{HandleKey, Stat, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Largest handle the NFSv3 wire format carries.
pub const NFS3_FHSIZE: usize = 64;

/// Opaque file handle as seen by clients.
///
/// BucketFS handles are always the 16-byte [`HandleKey`] wire form,
/// whatever the length of the path they name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileHandle3 {
    pub data: Vec<u8>,
}

impl FileHandle3 {
    pub fn new(data: Vec<u8>) -> Result<Self> {
        if data.is_empty() || data.len() > NFS3_FHSIZE {
            return Err(GatewayError::Nfs3BadHandle);
        }
        Ok(Self { data })
    }

    pub fn from_key(key: HandleKey) -> Self {
        Self {
            data: key.to_wire().to_vec(),
        }
    }

    /// Decodes the handle back into a key; anything but 16 bytes is a bad handle.
    pub fn as_key(&self) -> Result<HandleKey> {
        if self.data.len() != WIRE_LEN {
            return Err(GatewayError::Nfs3BadHandle);
        }
        Ok(HandleKey::from_wire(&self.data)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nfstime3 {
    pub seconds: u32,
    pub nseconds: u32,
}

impl From<Timestamp> for Nfstime3 {
    fn from(ts: Timestamp) -> Self {
        Self {
            seconds: ts.secs as u32,
            nseconds: ts.nanos,
        }
    }
}

impl From<Nfstime3> for Timestamp {
    fn from(t: Nfstime3) -> Self {
        Timestamp {
            secs: t.seconds as u64,
            nanos: t.nseconds,
        }
    }
}

/// Object types an object store can back: plain objects and directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum Ftype3 {
    Reg = 1,
    Dir = 2,
}

impl Ftype3 {
    pub fn from_mode(mode: u32) -> Self {
        if mode & S_IFMT == bucketfs_meta::types::S_IFDIR {
            Ftype3::Dir
        } else {
            Ftype3::Reg
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fattr3 {
    pub ftype: Ftype3,
    /// Permission bits only; the type lives in `ftype`.
    pub mode: u32,
    pub nlink: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub used: u64,
    pub rdev: (u32, u32),
    pub fsid: u64,
    pub fileid: u64,
    pub atime: Nfstime3,
    pub mtime: Nfstime3,
    pub ctime: Nfstime3,
}

impl Fattr3 {
    pub fn from_stat(stat: &Stat) -> Self {
        Self {
            ftype: Ftype3::from_mode(stat.mode),
            mode: stat.mode & !S_IFMT,
            nlink: stat.nlink,
            uid: stat.uid,
            gid: stat.gid,
            size: stat.size,
            used: stat.blocks * 512,
            rdev: (0, 0),
            fsid: stat.dev,
            fileid: stat.ino,
            atime: stat.atime.into(),
            mtime: stat.mtime.into(),
            ctime: stat.ctime.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.ftype == Ftype3::Dir
    }
}

/// One readdir-plus entry: name, handle, attributes and resume cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entryplus3 {
    pub fileid: u64,
    pub name: String,
    pub cookie: u64,
    pub name_attributes: Fattr3,
    pub name_handle: FileHandle3,
}

/// Handle digest flavours a front-end may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigestType {
    /// NFSv3 wire handle
    NfsV3,
    /// NFSv4 wire handle
    NfsV4,
    /// Size query only; not produced by this filesystem
    SizeOf,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FsInfoResult {
    pub rtmax: u32,
    pub rtpref: u32,
    pub rtmult: u32,
    pub wtmax: u32,
    pub wtpref: u32,
    pub wtmult: u32,
    pub dtpref: u32,
    pub maxfilesize: u64,
    pub time_delta: Nfstime3,
    pub properties: u32,
}

/// FSINFO property: server can set times via SETATTR
pub const FSF3_CANSETTIME: u32 = 0x0010;
/// FSINFO property: PATHCONF is the same for every file
pub const FSF3_HOMOGENEOUS: u32 = 0x0008;

impl FsInfoResult {
    /// Object stores have no hard links and no symlinks; only the
    /// homogeneous and settable-time properties are advertised.
    pub fn for_object_store() -> Self {
        Self {
            rtmax: 1048576,
            rtpref: 65536,
            rtmult: 4096,
            wtmax: 1048576,
            wtpref: 65536,
            wtmult: 4096,
            dtpref: 65536,
            maxfilesize: u64::MAX,
            time_delta: Nfstime3 {
                seconds: 0,
                nseconds: 1,
            },
            properties: FSF3_HOMOGENEOUS | FSF3_CANSETTIME,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathConfResult {
    pub linkmax: u32,
    pub name_max: u32,
    pub no_trunc: bool,
    pub chown_restricted: bool,
    pub case_insensitive: bool,
    pub case_preserving: bool,
}

impl PathConfResult {
    pub fn for_object_store() -> Self {
        Self {
            linkmax: 1,
            name_max: MAX_NAME_LEN as u32,
            no_trunc: true,
            chown_restricted: true,
            case_insensitive: false,
            case_preserving: true,
        }
    }
}

/// Static capabilities of an export, as the front-end's dynamic-info query
/// reports them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsCapabilities {
    pub max_name_len: u32,
    pub max_path_len: u32,
    pub link_support: bool,
    pub symlink_support: bool,
    pub lock_support: bool,
    pub case_preserving: bool,
    pub unique_handles: bool,
    pub cansettime: bool,
    /// Rename produces a different handle: keys hash the path.
    pub rename_changes_key: bool,
}

impl Default for FsCapabilities {
    fn default() -> Self {
        Self {
            max_name_len: MAX_NAME_LEN as u32,
            max_path_len: MAX_PATH_LEN as u32,
            link_support: false,
            symlink_support: false,
            lock_support: false,
            case_preserving: true,
            unique_handles: true,
            cansettime: true,
            rename_changes_key: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_meta::types::{S_IFDIR, S_IFREG};

    fn stat(mode: u32) -> Stat {
        Stat {
            dev: 3,
            ino: 42,
            mode,
            nlink: 1,
            uid: 1000,
            gid: 100,
            size: 1000,
            blksize: 4096,
            blocks: 2,
            atime: Timestamp::from_secs(10),
            mtime: Timestamp::from_secs(20),
            ctime: Timestamp { secs: 30, nanos: 5 },
        }
    }

    #[test]
    fn test_filehandle_from_key_is_16_bytes() {
        let key = HandleKey::new(1, 2);
        let fh = FileHandle3::from_key(key);
        assert_eq!(fh.data.len(), 16);
        assert_eq!(fh.as_key().unwrap(), key);
    }

    #[test]
    fn test_filehandle_wrong_length_is_bad_handle() {
        let fh = FileHandle3::new(vec![1, 2, 3, 4]).unwrap();
        assert_eq!(fh.as_key(), Err(GatewayError::Nfs3BadHandle));
        assert_eq!(FileHandle3::new(vec![]), Err(GatewayError::Nfs3BadHandle));
        assert_eq!(
            FileHandle3::new(vec![0; NFS3_FHSIZE + 1]),
            Err(GatewayError::Nfs3BadHandle)
        );
    }

    #[test]
    fn test_fattr_from_file_stat() {
        let attr = Fattr3::from_stat(&stat(S_IFREG | 0o640));
        assert_eq!(attr.ftype, Ftype3::Reg);
        assert_eq!(attr.mode, 0o640);
        assert_eq!(attr.fileid, 42);
        assert_eq!(attr.fsid, 3);
        assert_eq!(attr.used, 1024);
        assert_eq!(attr.mtime.seconds, 20);
        assert_eq!(attr.ctime.nseconds, 5);
        assert!(!attr.is_dir());
    }

    #[test]
    fn test_fattr_from_dir_stat() {
        let attr = Fattr3::from_stat(&stat(S_IFDIR | 0o777));
        assert_eq!(attr.ftype, Ftype3::Dir);
        assert_eq!(attr.mode, 0o777);
    }

    #[test]
    fn test_nfstime_timestamp_conversion() {
        let ts = Timestamp {
            secs: 1_700_000_000,
            nanos: 7,
        };
        let t: Nfstime3 = ts.into();
        assert_eq!(Timestamp::from(t), ts);
    }

    #[test]
    fn test_capabilities() {
        let caps = FsCapabilities::default();
        assert_eq!(caps.max_name_len, 1024);
        assert_eq!(caps.max_path_len, 1024);
        assert!(!caps.link_support && !caps.symlink_support && !caps.lock_support);
        assert!(caps.rename_changes_key);
        assert_eq!(PathConfResult::for_object_store().name_max, 1024);
        assert_eq!(FsInfoResult::for_object_store().properties & 0x0003, 0);
    }
}
