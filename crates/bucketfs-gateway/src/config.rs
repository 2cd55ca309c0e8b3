//! Gateway configuration

use bucketfs_meta::types::validate_name;
use bucketfs_meta::NamespaceConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::error::{GatewayError, Result};

/// One export: a single bucket reachable under `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Export path the front-end publishes
    pub path: String,
    /// Object-store account the export acts as
    pub user_id: String,
    /// Bucket the export is bound to; the only entry below its root
    pub bucket: String,
    /// Object-store zone
    pub zone: String,
    /// Permission bits cleared from modes given at create time
    #[serde(default = "default_umask")]
    pub umask: u32,
    /// Namespace tuning for this export
    #[serde(default)]
    pub namespace: NamespaceConfig,
}

fn default_umask() -> u32 {
    0
}

impl ExportConfig {
    pub fn new(path: &str, user_id: &str, bucket: &str, zone: &str) -> Self {
        Self {
            path: path.to_string(),
            user_id: user_id.to_string(),
            bucket: bucket.to_string(),
            zone: zone.to_string(),
            umask: default_umask(),
            namespace: NamespaceConfig::default(),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Log filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Exports to mount at startup
    #[serde(default)]
    pub exports: Vec<ExportConfig>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            exports: Vec::new(),
        }
    }
}

impl GatewayConfig {
    pub fn default_with_export(path: &str, user_id: &str, bucket: &str) -> Self {
        Self {
            exports: vec![ExportConfig::new(path, user_id, bucket, "pek3a")],
            ..Default::default()
        }
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        let config: GatewayConfig = match ext.to_lowercase().as_str() {
            "toml" => toml::from_str(&contents)?,
            "json" => serde_json::from_str(&contents)?,
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut paths = HashSet::new();
        for export in &self.exports {
            if export.path.is_empty() {
                return Err(GatewayError::ExportError {
                    reason: "export path must not be empty".to_string(),
                });
            }
            if !paths.insert(export.path.as_str()) {
                return Err(GatewayError::ExportError {
                    reason: format!("duplicate export path: {}", export.path),
                });
            }
            if export.user_id.is_empty() || export.zone.is_empty() {
                return Err(GatewayError::ExportError {
                    reason: format!("export {} needs a user_id and a zone", export.path),
                });
            }
            validate_name(&export.bucket).map_err(|e| GatewayError::ExportError {
                reason: format!("export {} has invalid bucket: {}", export.path, e),
            })?;
            if export.umask & !0o777 != 0 {
                return Err(GatewayError::ExportError {
                    reason: format!("export {} has invalid umask {:o}", export.path, export.umask),
                });
            }
            export
                .namespace
                .validate()
                .map_err(|e| GatewayError::ExportError {
                    reason: format!("export {}: {}", export.path, e),
                })?;
        }
        Ok(())
    }
}
