//! Module snapshot save and load
//!
//! A snapshot is written once and never overwritten. Loading either
//! applies the whole file or deletes every snapshot file in the directory
//! and reports that nothing was loaded.

use crate::config::SnapshotConfig;
use crate::error::{SnapshotError, SnapshotResult};
use crate::format::SnapshotFile;
use crate::manager::{ModuleManager, SharedModuleManager};
use crate::task_pool::TaskPool;
use otter_heap::{Isolate, ModuleKind, ObjectRef, TaggedValue};
use otter_serializer::{ModuleDeserializer, ModuleSerializer, SerializeConfig};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info, trace, warn};

const SNAPSHOT_EXTENSION: &str = "ams";

/// Persistent snapshot of resolved and shared modules
#[derive(Debug, Clone)]
pub struct ModuleSnapshot {
    config: SnapshotConfig,
}

impl ModuleSnapshot {
    /// Snapshot described by `config`
    pub fn new(config: SnapshotConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &SnapshotConfig {
        &self.config
    }

    /// Snapshot file path
    pub fn path(&self) -> PathBuf {
        self.config.path()
    }

    /// Whether a snapshot file is present
    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    // ------------------------------------------------------------------
    // Save
    // ------------------------------------------------------------------

    /// Serialize the module tables and post the file write to `pool`.
    ///
    /// Returns `Ok(false)` without doing any work when a snapshot already
    /// exists. The write itself completes asynchronously.
    pub fn save(
        &self,
        isolate: &mut Isolate,
        modules: &ModuleManager,
        shared: &SharedModuleManager,
        pool: &dyn TaskPool,
    ) -> SnapshotResult<bool> {
        let path = self.path();
        if path.exists() {
            debug!(path = %path.display(), "Module snapshot exists, skipping save");
            return Ok(false);
        }

        let bytes = self.encode_modules(isolate, modules, shared)?;
        let dir = self.config.dir.clone();
        debug!(bytes = bytes.len(), path = %path.display(), "Posting module snapshot write");
        pool.post(Box::new(move || match write_snapshot(&dir, &path, &bytes) {
            Ok(true) => info!(bytes = bytes.len(), path = %path.display(), "Module snapshot written"),
            Ok(false) => debug!(path = %path.display(), "Module snapshot written concurrently, dropping ours"),
            Err(e) => warn!(error = %e, path = %path.display(), "Module snapshot write failed"),
        }));
        Ok(true)
    }

    /// Serialize resolved modules followed by shared modules into file bytes
    pub fn encode_modules(
        &self,
        isolate: &mut Isolate,
        modules: &ModuleManager,
        shared: &SharedModuleManager,
    ) -> SnapshotResult<Vec<u8>> {
        let mut table: Vec<TaggedValue> = modules
            .resolved(isolate)?
            .into_iter()
            .map(TaggedValue::object)
            .collect();
        table.extend(shared.modules().into_iter().map(TaggedValue::object));
        let count = table.len();
        let table = isolate.new_tagged_array(&table)?;

        let config = SerializeConfig {
            size_limit: self.config.size_limit,
            ..SerializeConfig::default()
        };
        let mut serializer = ModuleSerializer::with_config(isolate, config);
        serializer.serialize(TaggedValue::object(table))?;
        let data = serializer.release();

        let file = SnapshotFile::from_data(&data, self.config.app_version_code, &self.config.version);
        let bytes = file.encode(isolate.runtime().config().collector);
        debug!(modules = count, bytes = bytes.len(), "Module table encoded");
        Ok(bytes)
    }

    // ------------------------------------------------------------------
    // Load
    // ------------------------------------------------------------------

    /// Load the snapshot into the module tables.
    ///
    /// Any failure other than a missing file deletes every snapshot file
    /// in the directory. Returns whether modules were loaded.
    pub fn load(
        &self,
        isolate: &mut Isolate,
        modules: &mut ModuleManager,
        shared: &SharedModuleManager,
    ) -> bool {
        match self.try_load(isolate, modules, shared) {
            Ok(count) => {
                info!(modules = count, path = %self.path().display(), "Module snapshot loaded");
                true
            }
            Err(SnapshotError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %self.path().display(), "No module snapshot");
                false
            }
            Err(e) => {
                warn!(error = %e, path = %self.path().display(), "Module snapshot rejected");
                self.remove_files();
                false
            }
        }
    }

    /// Load the snapshot, returning the number of modules inserted.
    ///
    /// Nothing is inserted unless the whole file decodes.
    pub fn try_load(
        &self,
        isolate: &mut Isolate,
        modules: &mut ModuleManager,
        shared: &SharedModuleManager,
    ) -> SnapshotResult<usize> {
        let bytes = fs::read(self.path())?;
        let collector = isolate.runtime().config().collector;
        let file = SnapshotFile::decode(&bytes, collector)?;
        file.check_versions(self.config.app_version_code, &self.config.version)?;
        if file.data_index.is_some() {
            trace!("Ignoring recorded shared-object index");
        }

        let mut data = file.into_data(Arc::clone(isolate.runtime()));
        let table = ModuleDeserializer::new(isolate, &mut data).read_value()?;
        let table = table
            .as_object()
            .ok_or_else(|| SnapshotError::InvalidLayout("module table is not an object".into()))?;

        let mut normal: Vec<(String, ObjectRef)> = Vec::new();
        let mut shared_modules: Vec<(String, ObjectRef)> = Vec::new();
        for entry in isolate.tagged_array_elements(table)? {
            let module = entry
                .as_object()
                .ok_or_else(|| SnapshotError::InvalidLayout("module table entry is not an object".into()))?;
            let info = isolate.module_info(module)?;
            match info.kind {
                ModuleKind::Shared => shared_modules.push((info.name, module)),
                ModuleKind::Normal if info.status.is_instantiated() => normal.push((info.name, module)),
                ModuleKind::Normal => trace!(name = %info.name, "Skipping uninstantiated module"),
            }
        }

        let count = normal.len() + shared_modules.len();
        for (name, module) in normal {
            modules.insert(name, module);
        }
        for (name, module) in shared_modules {
            shared.insert(name, module);
        }
        Ok(count)
    }

    /// Delete every snapshot file in the snapshot directory
    pub fn remove_files(&self) {
        let entries = match fs::read_dir(&self.config.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, dir = %self.config.dir.display(), "Cannot list snapshot directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_none_or(|ext| ext != SNAPSHOT_EXTENSION) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed snapshot file"),
                Err(e) => warn!(error = %e, path = %path.display(), "Cannot remove snapshot file"),
            }
        }
    }
}

/// Write through a temp file and move it into place without replacing an
/// existing snapshot. Returns `Ok(false)` when another writer got there
/// first.
fn write_snapshot(dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<bool> {
    fs::create_dir_all(dir)?;
    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    match file.persist_noclobber(path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.error),
    }
}
