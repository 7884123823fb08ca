//! Configuration for opening a library on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_response::AppResponse;

pub const DEFAULT_STORAGE_KEY: &str = "memorize_that_wall_library";
pub const DEFAULT_MAP_SIZE: usize = 64 * 1024 * 1024;

/// Where and how the library is stored.
///
/// Every field has a default, so `{}` is a valid configuration. The host usually only
/// sets `root_dir` to its documents directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Directory holding the LMDB environment and the images folder.
    pub root_dir: PathBuf,
    /// Images folder name, relative to `root_dir`.
    pub images_dir: String,
    /// Key under which the library document is stored.
    pub storage_key: String,
    /// LMDB map size in bytes.
    pub map_size: usize,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("mtwall_data"),
            images_dir: "images".to_string(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            map_size: DEFAULT_MAP_SIZE,
        }
    }
}

impl LibraryConfig {
    pub fn with_root(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Parses a configuration from JSON.
    ///
    /// Accepts either an object (missing fields take defaults) or a bare JSON string,
    /// which is taken as `root_dir`.
    pub fn from_json(json: &str) -> Result<Self, AppResponse> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        match value {
            serde_json::Value::String(root) => Ok(Self::with_root(root)),
            serde_json::Value::Object(_) => {
                let config: LibraryConfig = serde_json::from_value(value)?;
                config.validate()?;
                Ok(config)
            }
            other => Err(AppResponse::BadRequest(format!(
                "Library config must be an object or a path string, got: {other}"
            ))),
        }
    }

    pub fn validate(&self) -> Result<(), AppResponse> {
        if self.storage_key.is_empty() {
            return Err(AppResponse::ValidationError(
                "storage_key cannot be empty".to_string(),
            ));
        }
        if self.images_dir.is_empty() {
            return Err(AppResponse::ValidationError(
                "images_dir cannot be empty".to_string(),
            ));
        }
        if self.map_size == 0 {
            return Err(AppResponse::ValidationError(
                "map_size must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn lmdb_dir(&self) -> PathBuf {
        self.root_dir.join("library.lmdb")
    }

    pub fn images_path(&self) -> PathBuf {
        self.root_dir.join(Path::new(&self.images_dir))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_object_uses_defaults() {
        let config = LibraryConfig::from_json("{}").unwrap();
        assert_eq!(config, LibraryConfig::default());
    }

    #[test]
    fn test_bare_string_is_root_dir() {
        let config = LibraryConfig::from_json(r#""/data/user/0/app""#).unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/data/user/0/app"));
        assert_eq!(config.storage_key, DEFAULT_STORAGE_KEY);
    }

    #[test]
    fn test_partial_object() {
        let config = LibraryConfig::from_json(r#"{"root_dir":"x","map_size":1048576}"#).unwrap();
        assert_eq!(config.map_size, 1_048_576);
        assert_eq!(config.images_path(), PathBuf::from("x").join("images"));
        assert_eq!(config.lmdb_dir(), PathBuf::from("x").join("library.lmdb"));
    }

    #[test]
    fn test_rejects_invalid_values() {
        assert!(matches!(
            LibraryConfig::from_json(r#"{"storage_key":""}"#),
            Err(AppResponse::ValidationError(_))
        ));
        assert!(matches!(
            LibraryConfig::from_json("42"),
            Err(AppResponse::BadRequest(_))
        ));
        assert!(matches!(
            LibraryConfig::from_json("{not json"),
            Err(AppResponse::SerializationError(_))
        ));
    }
}
