//! Export registry: one mounted namespace per export path

use bucketfs_meta::StoreContext;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use crate::config::ExportConfig;
use crate::error::{GatewayError, Result};
use crate::export::Export;
use crate::protocol::FileHandle3;

/// Mounted exports sharing one store context.
pub struct ExportManager {
    ctx: Arc<StoreContext>,
    exports: RwLock<HashMap<String, Arc<Export>>>,
}

impl ExportManager {
    pub fn new(ctx: Arc<StoreContext>) -> Self {
        Self {
            ctx,
            exports: RwLock::new(HashMap::new()),
        }
    }

    /// Mounts `config` and returns the export's root handle.
    pub fn add_export(&self, config: ExportConfig) -> Result<FileHandle3> {
        let path = config.path.clone();
        if self.exports.read().contains_key(&path) {
            return Err(GatewayError::ExportError {
                reason: format!("export already exists: {}", path),
            });
        }

        let export = Arc::new(Export::mount(config, self.ctx.clone())?);
        let root_fh = export.root_handle();

        let mut exports = self.exports.write();
        if exports.contains_key(&path) {
            return Err(GatewayError::ExportError {
                reason: format!("export already exists: {}", path),
            });
        }
        exports.insert(path, export);
        Ok(root_fh)
    }

    /// Unmounts `path`. In-flight callers holding the export keep it alive
    /// until they finish.
    pub fn remove_export(&self, path: &str) -> bool {
        let removed = self.exports.write().remove(path).is_some();
        if removed {
            info!(path, "export unmounted");
        }
        removed
    }

    pub fn get(&self, path: &str) -> Option<Arc<Export>> {
        self.exports.read().get(path).cloned()
    }

    /// Finds the export whose root handle is `fh`.
    pub fn find_by_root(&self, fh: &FileHandle3) -> Option<Arc<Export>> {
        self.exports
            .read()
            .values()
            .find(|e| e.root_handle() == *fh)
            .cloned()
    }

    pub fn list_paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self.exports.read().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn count(&self) -> usize {
        self.exports.read().len()
    }

    /// Unmounts every export and shuts the store context down.
    pub fn shutdown(&self) {
        let drained: Vec<_> = self.exports.write().drain().map(|(p, _)| p).collect();
        for path in drained {
            info!(path = %path, "export unmounted");
        }
        self.ctx.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bucketfs_meta::MemoryObjectStore;

    fn manager() -> ExportManager {
        let store = Arc::new(MemoryObjectStore::new());
        ExportManager::new(Arc::new(StoreContext::new(store)))
    }

    #[test]
    fn test_add_and_get() {
        let mgr = manager();
        let fh = mgr
            .add_export(ExportConfig::new("/a", "AKID", "a", "pek3a"))
            .unwrap();
        assert_eq!(fh.data.len(), 16);
        let export = mgr.get("/a").unwrap();
        assert_eq!(export.root_handle(), fh);
        assert!(mgr.get("/b").is_none());
    }

    #[test]
    fn test_duplicate_rejected() {
        let mgr = manager();
        mgr.add_export(ExportConfig::new("/a", "AKID", "a", "pek3a"))
            .unwrap();
        assert!(matches!(
            mgr.add_export(ExportConfig::new("/a", "AKID", "a", "pek3a")),
            Err(GatewayError::ExportError { .. })
        ));
        assert_eq!(mgr.count(), 1);
    }

    #[test]
    fn test_exports_get_distinct_roots() {
        let mgr = manager();
        let a = mgr
            .add_export(ExportConfig::new("/a", "AKID", "a", "pek3a"))
            .unwrap();
        let b = mgr
            .add_export(ExportConfig::new("/b", "AKID", "b", "pek3a"))
            .unwrap();
        assert_ne!(a, b);
        assert_eq!(mgr.find_by_root(&b).unwrap().config().path, "/b");
        assert_eq!(mgr.list_paths(), vec!["/a".to_string(), "/b".to_string()]);
    }

    #[test]
    fn test_remove_export() {
        let mgr = manager();
        mgr.add_export(ExportConfig::new("/a", "AKID", "a", "pek3a"))
            .unwrap();
        assert!(mgr.remove_export("/a"));
        assert!(!mgr.remove_export("/a"));
        assert_eq!(mgr.count(), 0);
    }

    #[test]
    fn test_shutdown_refuses_new_mounts() {
        let mgr = manager();
        mgr.add_export(ExportConfig::new("/a", "AKID", "a", "pek3a"))
            .unwrap();
        mgr.shutdown();
        assert_eq!(mgr.count(), 0);
        assert_eq!(
            mgr.add_export(ExportConfig::new("/b", "AKID", "b", "pek3a"))
                .unwrap_err(),
            GatewayError::Nfs3Io
        );
    }
}
