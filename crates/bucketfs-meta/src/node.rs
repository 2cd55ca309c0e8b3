//! In-memory namespace nodes.
//!
//! Nodes live in an arena keyed by [`HandleKey`]. A node's `parent` is a plain
//! key into that arena, never an owning pointer; the parent in turn indexes its
//! resolved children by name.

use std::collections::HashMap;

use crate::handle_key::HandleKey;
use crate::types::*;

/// Arena of live nodes, keyed by handle.
pub type NodeMap = HashMap<HandleKey, NamespaceNode>;

/// Resume point remembered after a directory listing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListMarker {
    /// Cookie handed out with the last emitted entry.
    pub cookie: u64,
    /// Backend key to resume the listing after.
    pub key: String,
}

/// One resolved path element.
#[derive(Clone, Debug)]
pub struct NamespaceNode {
    kind: NodeKind,
    key: HandleKey,
    parent: Option<HandleKey>,
    name: String,
    depth: u32,
    /// Stat-like attributes.
    pub attrs: NodeAttr,
    flags: NodeFlags,
    refs: u32,
    children: HashMap<String, HandleKey>,
    last_marker: Option<ListMarker>,
}

impl NamespaceNode {
    /// Creates the root of a mount. Root starts with one reference that is
    /// never dropped.
    pub fn new_root(key: HandleKey, dev: u64) -> Self {
        let mut attrs = NodeAttr::new(NodeKind::Root, dev);
        attrs.nlink = 2;
        Self {
            kind: NodeKind::Root,
            key,
            parent: None,
            name: String::new(),
            depth: 0,
            attrs,
            flags: NodeFlags::NONE,
            refs: 1,
            children: HashMap::new(),
            last_marker: None,
        }
    }

    /// Creates a child of `parent`. `parent_path` is the parent's
    /// container-qualified object key.
    pub fn new_child(parent: &NamespaceNode, parent_path: &str, name: &str, kind: NodeKind) -> Self {
        let key = HandleKey::derive_child(&parent.key, parent.depth, parent_path, name);
        Self {
            kind,
            key,
            parent: Some(parent.key),
            name: name.to_string(),
            depth: parent.depth + 1,
            attrs: NodeAttr::new(kind, parent.attrs.dev),
            flags: NodeFlags::NONE,
            refs: 1,
            children: HashMap::new(),
            last_marker: None,
        }
    }

    /// Handle key; fixed for the node's lifetime.
    pub fn key(&self) -> HandleKey {
        self.key
    }

    /// Kind of the node.
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Leaf name; empty for root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distance from root.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Parent key; `None` only for root.
    pub fn parent(&self) -> Option<HandleKey> {
        self.parent
    }

    /// Returns true for the mount root.
    pub fn is_root(&self) -> bool {
        self.kind == NodeKind::Root
    }

    /// Returns true for root and directories.
    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }

    /// Returns true for regular objects.
    pub fn is_file(&self) -> bool {
        self.kind == NodeKind::File
    }

    /// Returns true for a top-level container (bucket).
    pub fn is_container(&self) -> bool {
        self.depth == 1 && self.kind == NodeKind::Directory
    }

    /// Current flag bits.
    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Returns true while the protocol layer holds the node open.
    pub fn is_open(&self) -> bool {
        self.flags.contains(NodeFlags::OPEN)
    }

    /// Returns true while a rename is copying the node.
    pub fn is_locked(&self) -> bool {
        self.flags.contains(NodeFlags::LOCKED)
    }

    pub(crate) fn set_flag(&mut self, flag: NodeFlags) {
        self.flags.insert(flag);
    }

    pub(crate) fn clear_flag(&mut self, flag: NodeFlags) {
        self.flags.remove(flag);
    }

    /// Outstanding references held by the protocol layer.
    pub fn refs(&self) -> u32 {
        self.refs
    }

    pub(crate) fn take_ref(&mut self) {
        self.refs = self.refs.saturating_add(1);
    }

    pub(crate) fn drop_ref(&mut self) -> u32 {
        self.refs = self.refs.saturating_sub(1);
        self.refs
    }

    /// Resolved children, by name.
    pub fn children(&self) -> &HashMap<String, HandleKey> {
        &self.children
    }

    pub(crate) fn child(&self, name: &str) -> Option<HandleKey> {
        self.children.get(name).copied()
    }

    pub(crate) fn attach_child(&mut self, name: &str, key: HandleKey) {
        self.children.insert(name.to_string(), key);
    }

    pub(crate) fn detach_child(&mut self, name: &str) -> Option<HandleKey> {
        self.children.remove(name)
    }

    /// Rebuilds the slash-delimited path by walking parent links up to root.
    ///
    /// With `omit_container` the walk stops at the container, so the result is
    /// relative to the bucket. Root always yields `""`; there is never a
    /// leading or doubled slash.
    pub fn object_key<'a>(&'a self, nodes: &'a NodeMap, omit_container: bool) -> String {
        let mut segments: Vec<&'a str> = Vec::with_capacity(self.depth as usize);
        let mut cur = Some(self);
        while let Some(node) = cur {
            if node.is_root() || (omit_container && node.is_container()) {
                break;
            }
            segments.push(&node.name);
            cur = node.parent.and_then(|p| nodes.get(&p));
        }
        segments.reverse();
        segments.join("/")
    }

    /// Applies the fields selected by `mask`. Unselected fields are left
    /// untouched; the mode always keeps this node's type bits.
    pub fn apply_attributes(&mut self, attrs_in: &NodeAttr, mask: AttrMask) {
        if mask.contains(AttrMask::UID) {
            self.attrs.uid = attrs_in.uid;
        }
        if mask.contains(AttrMask::GID) {
            self.attrs.gid = attrs_in.gid;
        }
        if mask.contains(AttrMask::MODE) {
            self.attrs.mode = (attrs_in.mode & !S_IFMT) | self.kind.mode_bits();
        }
        if mask.contains(AttrMask::ATIME) {
            self.attrs.atime = attrs_in.atime;
        }
        if mask.contains(AttrMask::MTIME) {
            self.attrs.mtime = attrs_in.mtime;
        }
        if mask.contains(AttrMask::CTIME) {
            self.attrs.ctime = attrs_in.ctime;
        }
    }

    /// Sets mtime and ctime together.
    pub fn set_mtimes(&mut self, ts: Timestamp) {
        self.attrs.mtime = ts;
        self.attrs.ctime = ts;
    }

    /// Sets every timestamp.
    pub fn set_times(&mut self, ts: Timestamp) {
        self.attrs.atime = ts;
        self.attrs.mtime = ts;
        self.attrs.ctime = ts;
    }

    /// Projects the attributes onto a stat structure.
    pub fn to_stat(&self) -> Stat {
        let (nlink, blocks) = if self.is_dir() {
            (self.attrs.nlink, 0)
        } else {
            (1, self.attrs.size.div_ceil(512))
        };
        Stat {
            dev: self.attrs.dev,
            ino: self.key.object,
            mode: self.attrs.mode,
            nlink,
            uid: self.attrs.uid,
            gid: self.attrs.gid,
            size: self.attrs.size,
            blksize: STAT_BLKSIZE,
            blocks,
            atime: self.attrs.atime,
            mtime: self.attrs.mtime,
            ctime: self.attrs.ctime,
        }
    }

    /// Remembers where the last listing stopped.
    pub fn add_marker(&mut self, cookie: u64, key: String) {
        self.last_marker = Some(ListMarker { cookie, key });
    }

    /// Turns a readdir offset into a resume marker. Offset zero restarts the
    /// listing; any other offset must be the cookie last handed out.
    pub fn find_marker(&self, offset: u64) -> MetaResult<Option<String>> {
        if offset == 0 {
            return Ok(None);
        }
        match &self.last_marker {
            Some(m) if m.cookie == offset => Ok(Some(m.key.clone())),
            _ => Err(MetaError::InvalidArgument(format!(
                "unknown readdir cookie {offset}"
            ))),
        }
    }

    /// The remembered listing position, if any.
    pub fn last_marker(&self) -> Option<&ListMarker> {
        self.last_marker.as_ref()
    }
}
