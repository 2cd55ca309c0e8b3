//! One mounted export: the front-end's view of a namespace tree.
//!
//! Every call takes and returns protocol shapes (file handles, [`Fattr3`],
//! NFSv3 status) and delegates the work to [`NamespaceTree`]. Handles handed
//! out by lookup, create, mkdir, readdir and create_handle each carry one
//! reference on the node; the front-end gives it back with [`Export::release`].

use bucketfs_meta::handle_key::WIRE_LEN;
use bucketfs_meta::{AttrMask, HandleKey, NamespaceTree, NodeAttr, NodeKind, StoreContext};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ExportConfig;
use crate::error::{GatewayError, Result};
use crate::protocol::{
    DigestType, Entryplus3, Fattr3, FileHandle3, FsCapabilities, FsInfoResult, Nfstime3,
    PathConfResult,
};
use crate::stats::{ExportStats, Op};

/// Caller identity stamped onto newly created objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }
}

/// Settable attributes, NFSv3 `sattr3` style: `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sattr3 {
    pub mode: Option<u32>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
    pub size: Option<u64>,
    pub atime: Option<Nfstime3>,
    pub mtime: Option<Nfstime3>,
}

impl Sattr3 {
    pub fn with_mode(mode: u32) -> Self {
        Self {
            mode: Some(mode),
            ..Default::default()
        }
    }

    fn to_node_attr(&self, kind: NodeKind, umask: u32) -> (NodeAttr, AttrMask) {
        let mut attrs = NodeAttr::new(kind, 0);
        let mut mask = AttrMask::NONE;
        if let Some(mode) = self.mode {
            attrs.mode = mode & !umask;
            mask = mask | AttrMask::MODE;
        }
        if let Some(uid) = self.uid {
            attrs.uid = uid;
            mask = mask | AttrMask::UID;
        }
        if let Some(gid) = self.gid {
            attrs.gid = gid;
            mask = mask | AttrMask::GID;
        }
        if self.size.is_some() {
            mask = mask | AttrMask::SIZE;
        }
        if let Some(atime) = self.atime {
            attrs.atime = atime.into();
            mask = mask | AttrMask::ATIME;
        }
        if let Some(mtime) = self.mtime {
            attrs.mtime = mtime.into();
            mask = mask | AttrMask::MTIME;
        }
        (attrs, mask)
    }
}

/// A mounted export.
pub struct Export {
    config: ExportConfig,
    tree: NamespaceTree,
    stats: ExportStats,
}

impl Export {
    /// Mounts a fresh namespace tree for `config` on `ctx`.
    pub fn mount(config: ExportConfig, ctx: Arc<StoreContext>) -> Result<Self> {
        let tree = NamespaceTree::mount_container(ctx, config.namespace.clone(), &config.bucket)?;
        info!(
            path = %config.path,
            user = %config.user_id,
            bucket = %config.bucket,
            zone = %config.zone,
            inst = tree.instance(),
            "export mounted"
        );
        Ok(Self {
            config,
            tree,
            stats: ExportStats::new(),
        })
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    pub fn tree(&self) -> &NamespaceTree {
        &self.tree
    }

    pub fn stats(&self) -> &ExportStats {
        &self.stats
    }

    /// Handle of the export root. The root is pinned; it needs no release.
    pub fn root_handle(&self) -> FileHandle3 {
        FileHandle3::from_key(self.tree.root_key())
    }

    pub fn fs_info(&self) -> FsInfoResult {
        FsInfoResult::for_object_store()
    }

    pub fn path_conf(&self) -> PathConfResult {
        PathConfResult::for_object_store()
    }

    pub fn capabilities(&self) -> FsCapabilities {
        FsCapabilities::default()
    }

    fn attrs(&self, key: HandleKey) -> Result<Fattr3> {
        Ok(Fattr3::from_stat(&self.tree.getattr(key)?))
    }

    /// Handle and attributes of a node the caller already holds a reference on.
    fn handle_with_attrs(&self, key: HandleKey) -> Result<(FileHandle3, Fattr3)> {
        match self.attrs(key) {
            Ok(attrs) => Ok((FileHandle3::from_key(key), attrs)),
            Err(e) => {
                if let Err(release) = self.tree.release(key) {
                    warn!(%key, error = %release, "release after failed getattr");
                }
                Err(e)
            }
        }
    }

    pub async fn lookup(&self, dir: &FileHandle3, name: &str) -> Result<(FileHandle3, Fattr3)> {
        let timer = self.stats.start(Op::Lookup);
        timer.finish(self.lookup_key(dir, name).await)
    }

    async fn lookup_key(&self, dir: &FileHandle3, name: &str) -> Result<(FileHandle3, Fattr3)> {
        let parent = dir.as_key()?;
        let key = self.tree.lookup(parent, name).await?;
        self.handle_with_attrs(key)
    }

    /// Creates an empty object owned by the caller. The mode has the export
    /// umask applied.
    pub async fn create(
        &self,
        dir: &FileHandle3,
        name: &str,
        sattr: &Sattr3,
        cred: &Credentials,
    ) -> Result<(FileHandle3, Fattr3)> {
        let timer = self.stats.start(Op::Create);
        let result = self.make_node(dir, name, sattr, cred, NodeKind::File).await;
        timer.finish(result)
    }

    /// Creates a directory (a bucket when `dir` is the export root).
    pub async fn mkdir(
        &self,
        dir: &FileHandle3,
        name: &str,
        sattr: &Sattr3,
        cred: &Credentials,
    ) -> Result<(FileHandle3, Fattr3)> {
        let timer = self.stats.start(Op::Mkdir);
        let result = self
            .make_node(dir, name, sattr, cred, NodeKind::Directory)
            .await;
        timer.finish(result)
    }

    async fn make_node(
        &self,
        dir: &FileHandle3,
        name: &str,
        sattr: &Sattr3,
        cred: &Credentials,
        kind: NodeKind,
    ) -> Result<(FileHandle3, Fattr3)> {
        let parent = dir.as_key()?;
        let mut attrs = NodeAttr::new(kind, 0);
        attrs.uid = cred.uid;
        attrs.gid = cred.gid;
        attrs.mode = sattr.mode.unwrap_or(kind.default_perms()) & !self.config.umask;
        let mask = AttrMask::UID | AttrMask::GID | AttrMask::MODE;

        let key = match kind {
            NodeKind::File => self.tree.create(parent, name, &attrs, mask).await?,
            _ => self.tree.mkdir(parent, name, &attrs, mask).await?,
        };
        debug!(%key, name, uid = cred.uid, mode = attrs.mode, "created");
        self.handle_with_attrs(key)
    }

    /// Readdir-plus: resolves every listed name and hands the callback its
    /// handle, attributes and cookie.
    ///
    /// Listing stops when `cb` returns false; the refused entry is not
    /// consumed and its reference is dropped again. Returns true at the end
    /// of the directory.
    pub async fn readdir<F>(&self, dir: &FileHandle3, cookie: u64, cb: F) -> Result<bool>
    where
        F: FnMut(Entryplus3) -> bool,
    {
        let timer = self.stats.start(Op::Readdir);
        let result = self.readdir_plus(dir, cookie, cb).await;
        timer.finish(result)
    }

    async fn readdir_plus<F>(&self, dir: &FileHandle3, cookie: u64, mut cb: F) -> Result<bool>
    where
        F: FnMut(Entryplus3) -> bool,
    {
        let dir_key = dir.as_key()?;
        let page = self.tree.read_page(dir_key, cookie).await?;

        let mut consumed = None;
        let mut outcome = Ok(false);
        for entry in &page.entries {
            let resolved = match self.tree.lookup(dir_key, &entry.name).await {
                Ok(key) => self.handle_with_attrs(key).map(|r| (key, r)),
                Err(e) => Err(e.into()),
            };
            let (key, (handle, attrs)) = match resolved {
                Ok(r) => r,
                Err(e) => {
                    outcome = Err(e);
                    break;
                }
            };
            let item = Entryplus3 {
                fileid: attrs.fileid,
                name: entry.name.clone(),
                cookie: entry.cookie,
                name_attributes: attrs,
                name_handle: handle,
            };
            if !cb(item) {
                outcome = self.tree.release(key).map(|_| true).map_err(GatewayError::from);
                break;
            }
            consumed = Some(entry);
        }

        if let Some(entry) = consumed {
            self.tree.advance_cursor(dir_key, entry);
        }
        let stopped = outcome?;
        Ok(page.is_eof(stopped))
    }

    pub fn getattrs(&self, fh: &FileHandle3) -> Result<Fattr3> {
        let timer = self.stats.start(Op::Getattr);
        let result = fh.as_key().and_then(|key| self.attrs(key));
        timer.finish(result)
    }

    /// Applies `sattr`; a mode has the export umask applied. Size changes
    /// need byte-range I/O and are refused.
    pub fn setattr(&self, fh: &FileHandle3, sattr: &Sattr3) -> Result<Fattr3> {
        let timer = self.stats.start(Op::Setattr);
        timer.finish(self.apply_sattr(fh, sattr))
    }

    fn apply_sattr(&self, fh: &FileHandle3, sattr: &Sattr3) -> Result<Fattr3> {
        let key = fh.as_key()?;
        let node = self.tree.node(key)?;
        if sattr.size.is_some() && node.is_dir() {
            return Err(GatewayError::Nfs3Inval);
        }
        let (attrs, mask) = sattr.to_node_attr(node.kind(), self.config.umask);
        let stat = self.tree.setattr(key, &attrs, mask)?;
        Ok(Fattr3::from_stat(&stat))
    }

    pub async fn rename(
        &self,
        from_dir: &FileHandle3,
        from_name: &str,
        to_dir: &FileHandle3,
        to_name: &str,
    ) -> Result<()> {
        let timer = self.stats.start(Op::Rename);
        let result = match (from_dir.as_key(), to_dir.as_key()) {
            (Ok(src), Ok(dst)) => self
                .tree
                .rename(src, from_name, dst, to_name)
                .await
                .map_err(GatewayError::from),
            (Err(e), _) | (_, Err(e)) => Err(e),
        };
        timer.finish(result)
    }

    pub async fn unlink(&self, dir: &FileHandle3, name: &str) -> Result<()> {
        let timer = self.stats.start(Op::Unlink);
        let result = match dir.as_key() {
            Ok(parent) => self.tree.unlink(parent, name).await.map_err(GatewayError::from),
            Err(e) => Err(e),
        };
        timer.finish(result)
    }

    pub fn release(&self, fh: &FileHandle3) -> Result<()> {
        let timer = self.stats.start(Op::Release);
        let result = fh
            .as_key()
            .and_then(|key| self.tree.release(key).map_err(GatewayError::from));
        timer.finish(result)
    }

    /// Marks a file open and returns its attributes.
    pub fn open2(&self, fh: &FileHandle3) -> Result<Fattr3> {
        let timer = self.stats.start(Op::Open);
        let result = fh.as_key().and_then(|key| {
            self.tree.open(key).map_err(GatewayError::from)?;
            self.attrs(key)
        });
        timer.finish(result)
    }

    pub fn close(&self, fh: &FileHandle3) -> Result<()> {
        let timer = self.stats.start(Op::Close);
        let result = fh
            .as_key()
            .and_then(|key| self.tree.close(key).map_err(GatewayError::from));
        timer.finish(result)
    }

    /// Whether the file is currently open.
    pub fn status2(&self, fh: &FileHandle3) -> Result<bool> {
        fh.as_key()
            .and_then(|key| self.tree.status(key).map_err(GatewayError::from))
    }

    fn unsupported<T>(&self, what: &'static str) -> Result<T> {
        let timer = self.stats.start(Op::Io);
        debug!(op = what, path = %self.config.path, "byte-range I/O refused");
        timer.finish(Err(GatewayError::Nfs3NotSupp))
    }

    pub fn read(&self, _fh: &FileHandle3, _offset: u64, _count: u32) -> Result<(Vec<u8>, bool)> {
        self.unsupported("read")
    }

    pub fn write(&self, _fh: &FileHandle3, _offset: u64, _data: &[u8]) -> Result<u32> {
        self.unsupported("write")
    }

    pub fn commit(&self, _fh: &FileHandle3, _offset: u64, _count: u32) -> Result<()> {
        self.unsupported("commit")
    }

    pub fn reopen(&self, _fh: &FileHandle3) -> Result<()> {
        self.unsupported("reopen")
    }

    /// Writes the 16-byte wire digest of `fh` into `buf`, returning its length.
    pub fn handle_to_wire(
        &self,
        fh: &FileHandle3,
        digest: DigestType,
        buf: &mut [u8],
    ) -> Result<usize> {
        let timer = self.stats.start(Op::HandleToWire);
        let result = match digest {
            DigestType::NfsV3 | DigestType::NfsV4 => fh
                .as_key()
                .and_then(|key| key.write_wire(buf).map_err(GatewayError::from)),
            DigestType::SizeOf => Err(GatewayError::Nfs3ServerFault),
        };
        timer.finish(result)
    }

    /// Cache key for `fh`: the handle key's two hashes.
    pub fn handle_to_key(&self, fh: &FileHandle3) -> Result<[u8; WIRE_LEN]> {
        Ok(fh.as_key()?.to_wire())
    }

    /// Turns wire bytes back into a live handle, taking a reference.
    pub fn create_handle(&self, wire: &[u8]) -> Result<(FileHandle3, Fattr3)> {
        let timer = self.stats.start(Op::CreateHandle);
        timer.finish(self.resolve_wire(wire))
    }

    fn resolve_wire(&self, wire: &[u8]) -> Result<(FileHandle3, Fattr3)> {
        if wire.len() != WIRE_LEN {
            return Err(GatewayError::Nfs3BadHandle);
        }
        let key = self.tree.lookup_handle(HandleKey::from_wire(wire)?)?;
        self.handle_with_attrs(key)
    }
}
