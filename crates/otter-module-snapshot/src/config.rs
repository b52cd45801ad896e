//! Snapshot configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where snapshots live and which builds may read them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshot directory (default: current directory)
    pub dir: PathBuf,
    /// Snapshot file name (default: `Module.ams`)
    pub file_name: String,
    /// Application build the snapshot belongs to
    pub app_version_code: u32,
    /// Logical engine version; a different string invalidates the file
    pub version: String,
    /// Upper bound on the serialized module table (default: 2GB)
    pub size_limit: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            file_name: "Module.ams".to_string(),
            app_version_code: 0,
            version: env!("CARGO_PKG_VERSION").to_string(),
            size_limit: 2 * 1024 * 1024 * 1024, // 2GB
        }
    }
}

impl SnapshotConfig {
    /// Config for `dir` with default file name and versions
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Full path of the snapshot file
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}
