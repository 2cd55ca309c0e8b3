//! Namespace tuning knobs.

use serde::{Deserialize, Serialize};

use crate::types::{MetaError, MetaResult, MAX_PATH_LEN};

/// What rename does with the source object once the copy has landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenameMode {
    /// Copy, then delete the source. The copy is rolled back if the delete
    /// fails.
    #[default]
    CopyThenDelete,
    /// Copy only; the source object stays in the store.
    CopyOnly,
}

/// Per-mount namespace settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NamespaceConfig {
    /// Rename strategy.
    pub rename_mode: RenameMode,
    /// Keys requested per LIST call.
    pub list_page_size: usize,
    /// Longest object key accepted.
    pub max_path_len: usize,
    /// Treat a key prefix with children as a directory even without a marker.
    pub implicit_directories: bool,
    /// Prefix of the synthetic filesystem id; buckets may not start with it.
    pub fs_name_prefix: String,
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self {
            rename_mode: RenameMode::CopyThenDelete,
            list_page_size: 1000,
            max_path_len: MAX_PATH_LEN,
            implicit_directories: true,
            fs_name_prefix: "qs_fs-".to_string(),
        }
    }
}

impl NamespaceConfig {
    /// Checks the settings for values the tree cannot work with.
    pub fn validate(&self) -> MetaResult<()> {
        if self.list_page_size == 0 {
            return Err(MetaError::InvalidArgument(
                "list_page_size must be positive".to_string(),
            ));
        }
        if self.max_path_len == 0 || self.max_path_len > MAX_PATH_LEN {
            return Err(MetaError::InvalidArgument(format!(
                "max_path_len must be within 1..={MAX_PATH_LEN}"
            )));
        }
        if self.fs_name_prefix.is_empty() {
            return Err(MetaError::InvalidArgument(
                "fs_name_prefix must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Filesystem identifier for instance `inst`; hashed into the root key.
    pub fn fsid(&self, inst: u32) -> String {
        format!("/{}{}", self.fs_name_prefix, inst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = NamespaceConfig::default();
        assert_eq!(config.rename_mode, RenameMode::CopyThenDelete);
        assert_eq!(config.list_page_size, 1000);
        assert_eq!(config.max_path_len, 1024);
        assert!(config.implicit_directories);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fsid() {
        let config = NamespaceConfig::default();
        assert_eq!(config.fsid(3), "/qs_fs-3");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = NamespaceConfig {
            list_page_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NamespaceConfig {
            max_path_len: 4096,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = NamespaceConfig {
            fs_name_prefix: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rename_mode_serde_names() {
        let config: NamespaceConfig =
            serde_json::from_str(r#"{"rename_mode":"copy_only","list_page_size":5}"#).unwrap();
        assert_eq!(config.rename_mode, RenameMode::CopyOnly);
        assert_eq!(config.list_page_size, 5);
        assert_eq!(config.max_path_len, 1024);
    }
}
