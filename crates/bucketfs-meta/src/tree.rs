//! Per-mount namespace tree.
//!
//! Owns every resolved node of one mount in an arena keyed by handle. Reads
//! take the arena lock briefly; mutating operations (create, mkdir, rename,
//! unlink) are additionally serialized by a per-tree async mutex held across
//! their backend calls, so a collision check and the PUT that follows it
//! cannot interleave with another mutation.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::{NamespaceConfig, RenameMode};
use crate::handle_key::HandleKey;
use crate::node::{NamespaceNode, NodeMap};
use crate::store::*;
use crate::types::*;

/// One directory entry handed to a readdir callback.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Leaf name.
    pub name: String,
    /// Cookie to resume the listing after this entry.
    pub cookie: u64,
    /// Directory or common prefix.
    pub is_dir: bool,
    /// Raw backend key; the resume marker once this entry is consumed.
    pub key: String,
}

/// One page of a directory listing, see [`NamespaceTree::read_page`].
#[derive(Clone, Debug, Default)]
pub struct DirPage {
    /// Entries in name order, cookies ascending.
    pub entries: Vec<DirEntry>,
    /// The backend has more entries after this page.
    pub truncated: bool,
}

impl DirPage {
    /// Whether the listing ends here, given whether the consumer stopped early.
    pub fn is_eof(&self, stopped: bool) -> bool {
        !self.truncated && !stopped
    }
}

/// What a lookup learned from the backend.
struct Resolved {
    kind: NodeKind,
    size: u64,
    mtime: Timestamp,
}

/// Registry of the nodes of one mount.
pub struct NamespaceTree {
    ctx: Arc<StoreContext>,
    config: NamespaceConfig,
    inst: u32,
    root: HandleKey,
    nodes: RwLock<NodeMap>,
    mutations: tokio::sync::Mutex<()>,
    /// The one container visible below root, when the mount is bound to one.
    container: Option<String>,
}

impl NamespaceTree {
    /// Mounts a new tree on the given store context.
    pub fn mount(ctx: Arc<StoreContext>, config: NamespaceConfig) -> MetaResult<Self> {
        Self::mount_scoped(ctx, config, None)
    }

    /// Mounts a tree whose root shows only `container`. Containers can then
    /// be neither created nor removed through it.
    pub fn mount_container(
        ctx: Arc<StoreContext>,
        config: NamespaceConfig,
        container: &str,
    ) -> MetaResult<Self> {
        validate_name(container)?;
        Self::mount_scoped(ctx, config, Some(container.to_string()))
    }

    fn mount_scoped(
        ctx: Arc<StoreContext>,
        config: NamespaceConfig,
        container: Option<String>,
    ) -> MetaResult<Self> {
        config.validate()?;
        let inst = ctx.new_instance()?;
        let fsid = config.fsid(inst);
        let root = NamespaceNode::new_root(HandleKey::root(&fsid), inst as u64);
        let root_key = root.key();
        let mut nodes = NodeMap::new();
        nodes.insert(root_key, root);
        info!(inst, %fsid, root = %root_key, container = ?container, "namespace mounted");
        Ok(Self {
            ctx,
            config,
            inst,
            root: root_key,
            nodes: RwLock::new(nodes),
            mutations: tokio::sync::Mutex::new(()),
            container,
        })
    }

    /// Container the mount is bound to, if any.
    pub fn container(&self) -> Option<&str> {
        self.container.as_deref()
    }

    fn in_scope(&self, container: &str) -> bool {
        self.container.as_deref().map_or(true, |c| c == container)
    }

    /// Handle of the mount root.
    pub fn root_key(&self) -> HandleKey {
        self.root
    }

    /// Filesystem instance number, also the device id.
    pub fn instance(&self) -> u32 {
        self.inst
    }

    /// Settings this tree was mounted with.
    pub fn config(&self) -> &NamespaceConfig {
        &self.config
    }

    /// Number of live nodes, root included.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Snapshot of a live node.
    pub fn node(&self, key: HandleKey) -> MetaResult<NamespaceNode> {
        let nodes = self.nodes.read();
        live(&nodes, key).cloned()
    }

    /// Object key of a live node; see [`NamespaceNode::object_key`].
    pub fn object_key(&self, key: HandleKey, omit_container: bool) -> MetaResult<String> {
        let nodes = self.nodes.read();
        Ok(live(&nodes, key)?.object_key(&nodes, omit_container))
    }

    /// Takes a reference on a live node named by its handle.
    pub fn lookup_handle(&self, key: HandleKey) -> MetaResult<HandleKey> {
        let mut nodes = self.nodes.write();
        live_mut(&mut nodes, key)?.take_ref();
        Ok(key)
    }

    /// Resolves `name` below `parent`, taking a reference on the result.
    pub async fn lookup(&self, parent: HandleKey, name: &str) -> MetaResult<HandleKey> {
        let path = {
            let mut nodes = self.nodes.write();
            let dir = live(&nodes, parent)?;
            if !dir.is_dir() {
                return Err(MetaError::InvalidArgument(format!(
                    "lookup of {name} in a non-directory"
                )));
            }
            let shortcut = match name {
                "." => Some(parent),
                "/" if dir.is_root() || dir.is_container() => Some(parent),
                ".." => Some(dir.parent().unwrap_or(parent)),
                _ => None,
            };
            if let Some(target) = shortcut {
                live_mut(&mut nodes, target)?.take_ref();
                return Ok(target);
            }
            validate_name(name)?;
            if parent == self.root && !self.in_scope(name) {
                debug!(name, "container outside the mount");
                return Err(MetaError::NoSuchEntry(name.to_string()));
            }
            if let Some(child) = dir.child(name) {
                live_mut(&mut nodes, child)?.take_ref();
                debug!(%parent, name, %child, "lookup hit");
                return Ok(child);
            }
            self.child_path(&nodes, dir, name)?
        };

        let resolved = self.probe(&path, parent == self.root).await?;
        let Some(resolved) = resolved else {
            debug!(%path, "lookup miss");
            return Err(MetaError::NoSuchEntry(path.to_string()));
        };

        let mut nodes = self.nodes.write();
        let key = self.attach(&mut nodes, parent, name, resolved.kind)?;
        if let Some(node) = nodes.get_mut(&key) {
            node.attrs.size = resolved.size;
            node.set_mtimes(resolved.mtime);
        }
        debug!(%path, %key, "lookup resolved");
        Ok(key)
    }

    /// Creates an empty regular object below `parent`.
    pub async fn create(
        &self,
        parent: HandleKey,
        name: &str,
        attrs_in: &NodeAttr,
        mask: AttrMask,
    ) -> MetaResult<HandleKey> {
        self.create_node(parent, name, attrs_in, mask, NodeKind::File).await
    }

    /// Creates a directory marker (or a container, directly under root).
    pub async fn mkdir(
        &self,
        parent: HandleKey,
        name: &str,
        attrs_in: &NodeAttr,
        mask: AttrMask,
    ) -> MetaResult<HandleKey> {
        self.create_node(parent, name, attrs_in, mask, NodeKind::Directory).await
    }

    async fn create_node(
        &self,
        parent: HandleKey,
        name: &str,
        attrs_in: &NodeAttr,
        mask: AttrMask,
        kind: NodeKind,
    ) -> MetaResult<HandleKey> {
        let _guard = self.mutations.lock().await;
        let path = {
            let nodes = self.nodes.read();
            let dir = live(&nodes, parent)?;
            if !dir.is_dir() {
                return Err(MetaError::InvalidArgument(format!(
                    "create of {name} in a non-directory"
                )));
            }
            validate_name(name)?;
            if dir.is_root() {
                if let Some(bound) = &self.container {
                    return Err(MetaError::PermissionDenied(format!(
                        "{name}: mount is bound to container {bound}"
                    )));
                }
                if kind == NodeKind::File {
                    return Err(MetaError::InvalidArgument(format!(
                        "{name}: only containers may be created at the root"
                    )));
                }
                if name.starts_with(&self.config.fs_name_prefix) {
                    return Err(MetaError::InvalidArgument(format!(
                        "{name}: reserved container name"
                    )));
                }
            }
            if dir.child(name).is_some() {
                warn!(%parent, name, "create collides with a resolved entry");
                return Err(MetaError::AlreadyExists(name.to_string()));
            }
            self.child_path(&nodes, dir, name)?
        };

        if self.probe(&path, parent == self.root).await?.is_some() {
            warn!(%path, "create collides with an existing object");
            return Err(MetaError::AlreadyExists(path.to_string()));
        }

        self.ctx.put(&path, PutRequest::marker(kind.is_dir())).await?;

        let now = Timestamp::now();
        let attached = {
            let mut nodes = self.nodes.write();
            self.attach(&mut nodes, parent, name, kind).map(|key| {
                if let Some(node) = nodes.get_mut(&key) {
                    node.set_times(now);
                    node.attrs.size = 0;
                    node.apply_attributes(attrs_in, mask);
                }
                if let Some(dir) = nodes.get_mut(&parent) {
                    dir.set_mtimes(now);
                }
                key
            })
        };
        let key = match attached {
            Ok(key) => key,
            Err(e) => {
                error!(%path, error = %e, "node construction failed after put, removing object");
                if let Err(undo) = self.ctx.delete(&path).await {
                    error!(%path, error = %undo, "rollback delete failed");
                }
                return Err(e);
            }
        };
        info!(%path, %key, %kind, "created");
        Ok(key)
    }

    /// Lists `dir` starting after cookie `offset`.
    ///
    /// Entries are passed to `emit` until it returns false; an entry refused
    /// by `emit` is not consumed. Returns true when the listing is exhausted.
    pub async fn readdir<F>(&self, dir: HandleKey, offset: u64, mut emit: F) -> MetaResult<bool>
    where
        F: FnMut(&DirEntry) -> bool,
    {
        let page = self.read_page(dir, offset).await?;
        let mut last = None;
        let mut stopped = false;
        for entry in &page.entries {
            if !emit(entry) {
                stopped = true;
                break;
            }
            last = Some(entry);
        }
        if let Some(entry) = last {
            self.advance_cursor(dir, entry);
        }
        let eof = page.is_eof(stopped);
        debug!(%dir, offset, cookie = last.map_or(offset, |e| e.cookie), eof, "readdir");
        Ok(eof)
    }

    /// Fetches one listing page of `dir` after cookie `offset`, without
    /// consuming it. Cookies are numbered from `offset + 1`.
    ///
    /// Callers hand the last entry they accepted to [`advance_cursor`] so the
    /// next call can resume from it.
    ///
    /// [`advance_cursor`]: NamespaceTree::advance_cursor
    pub async fn read_page(&self, dir: HandleKey, offset: u64) -> MetaResult<DirPage> {
        let (mut req, at_root) = {
            let nodes = self.nodes.read();
            let node = live(&nodes, dir)?;
            if !node.is_dir() {
                return Err(MetaError::InvalidArgument(
                    "readdir of a non-directory".to_string(),
                ));
            }
            let marker = node.find_marker(offset)?;
            let (container, prefix) = list_target(&nodes, node);
            let req = ListRequest {
                container,
                prefix,
                delimiter: DELIMITER.to_string(),
                marker,
                max_keys: self.config.list_page_size,
            };
            (req, node.is_root())
        };

        // Only names lookup can resolve are listed: no bare common prefixes
        // without implicit directories, no foreign containers on a bound
        // root. Pages holding nothing else are skipped rather than returned
        // empty.
        let (entries, truncated) = loop {
            let page = self.ctx.list(&req).await?;
            let resume = page
                .next_marker
                .clone()
                .or_else(|| page.entries.last().map(|e| e.key.clone()));
            let entries: Vec<DirEntry> = page
                .entries
                .into_iter()
                .filter(|entry| !entry.name.is_empty())
                .filter(|entry| self.config.implicit_directories || !is_bare_prefix(entry))
                .filter(|entry| !at_root || self.in_scope(&entry.name))
                .zip(offset + 1..)
                .map(|(entry, cookie)| DirEntry {
                    name: entry.name,
                    cookie,
                    is_dir: entry.is_dir,
                    key: entry.key,
                })
                .collect();
            match resume {
                Some(marker) if entries.is_empty() && page.is_truncated => {
                    req.marker = Some(marker);
                }
                _ => break (entries, page.is_truncated),
            }
        };

        if let Some(node) = self.nodes.write().get_mut(&dir) {
            node.attrs.atime = Timestamp::now();
        }
        Ok(DirPage { entries, truncated })
    }

    /// Records `entry` as the last one consumed from `dir`.
    pub fn advance_cursor(&self, dir: HandleKey, entry: &DirEntry) {
        if let Some(node) = self.nodes.write().get_mut(&dir) {
            node.add_marker(entry.cookie, entry.key.clone());
        }
    }

    /// Moves a regular object by server-side copy.
    ///
    /// Directories and open or locked sources are refused. With
    /// [`RenameMode::CopyThenDelete`] the source object is deleted after the
    /// copy. If that fails the error is returned and a newly created copy is
    /// removed again; a destination that already existed keeps the copy.
    pub async fn rename(
        &self,
        src_parent: HandleKey,
        src_name: &str,
        dst_parent: HandleKey,
        dst_name: &str,
    ) -> MetaResult<()> {
        let _guard = self.mutations.lock().await;
        validate_name(dst_name)?;

        let src = match self.lookup(src_parent, src_name).await {
            Ok(key) => key,
            Err(MetaError::NoSuchEntry(path)) => {
                return Err(MetaError::InvalidArgument(format!(
                    "rename source {path} does not exist"
                )));
            }
            Err(e) => return Err(e),
        };

        let result = self.rename_resolved(src, src_parent, src_name, dst_parent, dst_name).await;
        let mut nodes = self.nodes.write();
        if let Some(node) = nodes.get_mut(&src) {
            node.clear_flag(NodeFlags::LOCKED);
        }
        self.put_ref(&mut nodes, src);
        result
    }

    async fn rename_resolved(
        &self,
        src: HandleKey,
        src_parent: HandleKey,
        src_name: &str,
        dst_parent: HandleKey,
        dst_name: &str,
    ) -> MetaResult<()> {
        let (src_path, dst_path, dst_cached) = {
            let mut nodes = self.nodes.write();
            let node = live(&nodes, src)?;
            if node.is_dir() {
                warn!(%src, "refusing to rename a directory");
                return Err(MetaError::PermissionDenied(format!(
                    "{src_name} is a directory"
                )));
            }
            if node.is_open() || node.is_locked() {
                warn!(%src, "refusing to rename an open file");
                return Err(MetaError::PermissionDenied(format!("{src_name} is in use")));
            }
            if src_parent == dst_parent && src_name == dst_name {
                return Ok(());
            }
            let src_dir = live(&nodes, src_parent)?;
            let src_path = self.child_path(&nodes, src_dir, src_name)?;
            let dst_dir = live(&nodes, dst_parent)?;
            if !dst_dir.is_dir() || dst_dir.is_root() {
                return Err(MetaError::InvalidArgument(format!(
                    "rename target {dst_name} needs a directory inside a container"
                )));
            }
            let dst_path = self.child_path(&nodes, dst_dir, dst_name)?;
            let dst_cached = dst_dir.child(dst_name);
            if let Some(existing) = dst_cached.and_then(|k| nodes.get(&k)) {
                if existing.is_dir() {
                    return Err(MetaError::AlreadyExists(dst_path.to_string()));
                }
            }
            live_mut(&mut nodes, src)?.set_flag(NodeFlags::LOCKED);
            (src_path, dst_path, dst_cached)
        };

        let dst_existed = match dst_cached {
            Some(_) => true,
            None => match self.probe(&dst_path, false).await? {
                Some(existing) if existing.kind.is_dir() => {
                    return Err(MetaError::AlreadyExists(dst_path.to_string()));
                }
                Some(_) => true,
                None => false,
            },
        };

        self.ctx
            .put(&dst_path, PutRequest::copy_from(src_path.clone()))
            .await?;

        if self.config.rename_mode == RenameMode::CopyThenDelete {
            if let Err(e) = self.ctx.delete(&src_path).await {
                if dst_existed {
                    // The old destination is already overwritten; keep the copy.
                    warn!(src = %src_path, dst = %dst_path, error = %e, "source delete failed, destination replaced");
                    self.refresh_copied(src, dst_cached, Timestamp::now());
                } else {
                    warn!(src = %src_path, dst = %dst_path, error = %e, "source delete failed, rolling back copy");
                    if let Err(undo) = self.ctx.delete(&dst_path).await {
                        error!(dst = %dst_path, error = %undo, "rollback of rename copy failed");
                    }
                }
                return Err(e);
            }
        }

        let now = Timestamp::now();
        self.refresh_copied(src, dst_cached, now);
        let mut nodes = self.nodes.write();
        if self.config.rename_mode == RenameMode::CopyThenDelete {
            self.unlink_node(&mut nodes, src_parent, src_name, src);
        }
        for dir in [src_parent, dst_parent] {
            if let Some(node) = nodes.get_mut(&dir) {
                node.set_mtimes(now);
            }
        }
        info!(src = %src_path, dst = %dst_path, mode = ?self.config.rename_mode, "renamed");
        Ok(())
    }

    /// Gives a cached rename destination the size of the object copied onto it.
    fn refresh_copied(&self, src: HandleKey, dst: Option<HandleKey>, now: Timestamp) {
        let Some(dst) = dst else {
            return;
        };
        let mut nodes = self.nodes.write();
        let size = nodes.get(&src).map(|n| n.attrs.size).unwrap_or(0);
        if let Some(node) = nodes.get_mut(&dst) {
            node.attrs.size = size;
            node.set_mtimes(now);
        }
    }

    /// Removes `name` from `parent`. Directories must be empty.
    pub async fn unlink(&self, parent: HandleKey, name: &str) -> MetaResult<()> {
        validate_name(name)?;
        let _guard = self.mutations.lock().await;
        let key = self.lookup(parent, name).await?;
        let result = self.unlink_resolved(parent, name, key).await;
        let mut nodes = self.nodes.write();
        self.put_ref(&mut nodes, key);
        result
    }

    async fn unlink_resolved(&self, parent: HandleKey, name: &str, key: HandleKey) -> MetaResult<()> {
        let (path, listing) = {
            let nodes = self.nodes.read();
            let node = live(&nodes, key)?;
            if node.is_open() || node.is_locked() {
                return Err(MetaError::PermissionDenied(format!("{name} is in use")));
            }
            if key == parent {
                return Err(MetaError::InvalidArgument(format!("cannot remove {name}")));
            }
            if parent == self.root && self.container.is_some() {
                return Err(MetaError::PermissionDenied(format!(
                    "{name}: mount is bound to it"
                )));
            }
            let dir = live(&nodes, parent)?;
            let path = self.child_path(&nodes, dir, name)?;
            let listing = node.is_dir().then(|| {
                let (container, prefix) = list_target(&nodes, node);
                ListRequest {
                    container,
                    prefix,
                    delimiter: DELIMITER.to_string(),
                    marker: None,
                    max_keys: 1,
                }
            });
            (path, listing)
        };

        if let Some(req) = listing {
            let page = self.ctx.list(&req).await?;
            if !page.entries.is_empty() {
                return Err(MetaError::DirectoryNotEmpty(path.to_string()));
            }
        }

        self.ctx.delete(&path).await?;

        let mut nodes = self.nodes.write();
        self.unlink_node(&mut nodes, parent, name, key);
        if let Some(dir) = nodes.get_mut(&parent) {
            dir.set_mtimes(Timestamp::now());
        }
        info!(%path, "removed");
        Ok(())
    }

    /// Drops a reference taken by lookup, create, mkdir or lookup_handle.
    ///
    /// At zero the node is freed unless it is open or still has resolved
    /// children; such nodes are freed on close or when their last child goes.
    /// The root is never freed.
    pub fn release(&self, key: HandleKey) -> MetaResult<()> {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&key) {
            return Err(MetaError::StaleHandle);
        }
        self.put_ref(&mut nodes, key);
        Ok(())
    }

    /// Marks a regular file open.
    pub fn open(&self, key: HandleKey) -> MetaResult<()> {
        let mut nodes = self.nodes.write();
        let node = live_mut(&mut nodes, key)?;
        if node.is_dir() {
            return Err(MetaError::InvalidArgument(
                "directories cannot be opened".to_string(),
            ));
        }
        node.set_flag(NodeFlags::OPEN);
        Ok(())
    }

    /// Clears the open flag, completing a deferred release.
    pub fn close(&self, key: HandleKey) -> MetaResult<()> {
        let mut nodes = self.nodes.write();
        let node = nodes.get_mut(&key).ok_or(MetaError::StaleHandle)?;
        node.clear_flag(NodeFlags::OPEN);
        self.try_free(&mut nodes, key);
        Ok(())
    }

    /// Returns true while the node is open.
    pub fn status(&self, key: HandleKey) -> MetaResult<bool> {
        let nodes = self.nodes.read();
        Ok(live(&nodes, key)?.is_open())
    }

    /// Stat projection of a live node.
    pub fn getattr(&self, key: HandleKey) -> MetaResult<Stat> {
        let nodes = self.nodes.read();
        Ok(live(&nodes, key)?.to_stat())
    }

    /// Applies the masked attributes and stamps ctime.
    pub fn setattr(&self, key: HandleKey, attrs_in: &NodeAttr, mask: AttrMask) -> MetaResult<Stat> {
        if mask.contains(AttrMask::SIZE) {
            return Err(MetaError::NotSupported("truncate"));
        }
        let mut nodes = self.nodes.write();
        let node = live_mut(&mut nodes, key)?;
        node.apply_attributes(attrs_in, mask);
        node.attrs.ctime = Timestamp::now();
        Ok(node.to_stat())
    }

    /// Backend address of `name` below `dir`.
    fn child_path(&self, nodes: &NodeMap, dir: &NamespaceNode, name: &str) -> MetaResult<ObjectPath> {
        let path = if dir.is_root() {
            ObjectPath::container(name)
        } else {
            let full = dir.object_key(nodes, false);
            match full.split_once('/') {
                Some((container, rest)) => ObjectPath::new(container, format!("{rest}/{name}")),
                None => ObjectPath::new(full.as_str(), name),
            }
        };
        let len = path.key.len().max(path.container.len());
        if len > self.config.max_path_len {
            return Err(MetaError::PathTooLong {
                len,
                max: self.config.max_path_len,
            });
        }
        Ok(path)
    }

    /// HEADs a path and classifies what is there. Under a container, a prefix
    /// with children counts as a directory when implicit directories are on.
    async fn probe(&self, path: &ObjectPath, at_root: bool) -> MetaResult<Option<Resolved>> {
        match self.ctx.head(path).await? {
            HeadOutcome::Found(meta) => Ok(Some(Resolved {
                kind: if at_root || meta.is_directory_marker() {
                    NodeKind::Directory
                } else {
                    NodeKind::File
                },
                size: meta.size,
                mtime: meta.mtime,
            })),
            HeadOutcome::NotFound if self.config.implicit_directories && !at_root => {
                let req = ListRequest {
                    container: path.container.clone(),
                    prefix: format!("{}/", path.key),
                    delimiter: DELIMITER.to_string(),
                    marker: None,
                    max_keys: 1,
                };
                let page = self.ctx.list(&req).await?;
                Ok((!page.entries.is_empty()).then(|| Resolved {
                    kind: NodeKind::Directory,
                    size: 0,
                    mtime: Timestamp::now(),
                }))
            }
            HeadOutcome::NotFound => Ok(None),
        }
    }

    /// Inserts (or re-references) the node for `name` below `parent`.
    fn attach(&self, nodes: &mut NodeMap, parent: HandleKey, name: &str, kind: NodeKind) -> MetaResult<HandleKey> {
        let dir = live(nodes, parent)?;
        if let Some(existing) = dir.child(name) {
            live_mut(nodes, existing)?.take_ref();
            return Ok(existing);
        }
        let path = dir.object_key(nodes, false);
        let child = NamespaceNode::new_child(dir, &path, name, kind);
        let key = child.key();

        match nodes.get_mut(&key) {
            Some(stale) if stale.flags().contains(NodeFlags::DELETED) && stale.name() == name => {
                // The path came back while an old handle to it was still held.
                let refs = stale.refs();
                *stale = child;
                for _ in 0..refs {
                    stale.take_ref();
                }
            }
            Some(other) => {
                error!(%key, existing = other.name(), name, "handle key collision");
                return Err(MetaError::Unknown(format!("handle collision on {name}")));
            }
            None => {
                nodes.insert(key, child);
            }
        }
        if let Some(dir) = nodes.get_mut(&parent) {
            dir.attach_child(name, key);
        }
        Ok(key)
    }

    /// Marks a node deleted and detaches it from its parent's index.
    fn unlink_node(&self, nodes: &mut NodeMap, parent: HandleKey, name: &str, key: HandleKey) {
        if let Some(dir) = nodes.get_mut(&parent) {
            if dir.child(name) == Some(key) {
                dir.detach_child(name);
            }
        }
        if let Some(node) = nodes.get_mut(&key) {
            node.set_flag(NodeFlags::DELETED);
        }
    }

    fn put_ref(&self, nodes: &mut NodeMap, key: HandleKey) {
        if key == self.root {
            return;
        }
        if let Some(node) = nodes.get_mut(&key) {
            node.drop_ref();
        }
        self.try_free(nodes, key);
    }

    /// Frees `key` and then any ancestors that were only waiting on it.
    fn try_free(&self, nodes: &mut NodeMap, key: HandleKey) {
        let mut cur = key;
        loop {
            if cur == self.root {
                return;
            }
            let Some(node) = nodes.get(&cur) else {
                return;
            };
            if node.refs() > 0 || node.is_open() || !node.children().is_empty() {
                return;
            }
            let parent = node.parent();
            let name = node.name().to_string();
            nodes.remove(&cur);
            debug!(key = %cur, name = %name, "node freed");
            let Some(parent) = parent else {
                return;
            };
            match nodes.get_mut(&parent) {
                Some(dir) if dir.child(&name) == Some(cur) => {
                    dir.detach_child(&name);
                }
                _ => return,
            }
            cur = parent;
        }
    }
}

/// Container and prefix to list for a directory node.
fn list_target(nodes: &NodeMap, dir: &NamespaceNode) -> (String, String) {
    if dir.is_root() {
        return (String::new(), String::new());
    }
    let full = dir.object_key(nodes, false);
    match full.split_once('/') {
        Some((container, rest)) => (container.to_string(), format!("{rest}/")),
        None => (full, String::new()),
    }
}

/// A common prefix with no object of its own under the same name.
fn is_bare_prefix(entry: &ListEntry) -> bool {
    entry.is_dir && entry.key.ends_with(DELIMITER)
}

fn live(nodes: &NodeMap, key: HandleKey) -> MetaResult<&NamespaceNode> {
    match nodes.get(&key) {
        Some(node) if !node.flags().contains(NodeFlags::DELETED) => Ok(node),
        _ => Err(MetaError::StaleHandle),
    }
}

fn live_mut(nodes: &mut NodeMap, key: HandleKey) -> MetaResult<&mut NamespaceNode> {
    match nodes.get_mut(&key) {
        Some(node) if !node.flags().contains(NodeFlags::DELETED) => Ok(node),
        _ => Err(MetaError::StaleHandle),
    }
}
