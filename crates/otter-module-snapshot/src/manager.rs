//! Module tables
//!
//! [`ModuleManager`] holds the modules one isolate resolved;
//! [`SharedModuleManager`] holds shared modules and is used from every
//! isolate of a runtime.

use dashmap::DashMap;
use otter_heap::{HeapResult, Isolate, ModuleKind, ObjectRef};
use rustc_hash::FxHashMap;

/// Resolved modules of one isolate, keyed by record name
#[derive(Debug, Default)]
pub struct ModuleManager {
    modules: FxHashMap<String, ObjectRef>,
}

impl ModuleManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a module under `name`, returning the one it replaced
    pub fn insert(&mut self, name: impl Into<String>, module: ObjectRef) -> Option<ObjectRef> {
        self.modules.insert(name.into(), module)
    }

    /// Insert a module under its own record name
    pub fn add(&mut self, isolate: &Isolate, module: ObjectRef) -> HeapResult<()> {
        let info = isolate.module_info(module)?;
        self.insert(info.name, module);
        Ok(())
    }

    /// Module registered under `name`
    pub fn get(&self, name: &str) -> Option<ObjectRef> {
        self.modules.get(name).copied()
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules that finished instantiation, ordered by name
    pub fn resolved(&self, isolate: &Isolate) -> HeapResult<Vec<ObjectRef>> {
        let mut entries: Vec<_> = self.modules.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        let mut resolved = Vec::with_capacity(entries.len());
        for (_, &module) in entries {
            let info = isolate.module_info(module)?;
            if info.kind == ModuleKind::Normal && info.status.is_instantiated() {
                resolved.push(module);
            }
        }
        Ok(resolved)
    }
}

/// Shared modules of a runtime
#[derive(Debug, Default)]
pub struct SharedModuleManager {
    modules: DashMap<String, ObjectRef>,
}

impl SharedModuleManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a shared module under `name`, returning the one it replaced
    pub fn insert(&self, name: impl Into<String>, module: ObjectRef) -> Option<ObjectRef> {
        self.modules.insert(name.into(), module)
    }

    /// Insert a shared module under its own record name
    pub fn add(&self, isolate: &Isolate, module: ObjectRef) -> HeapResult<()> {
        let info = isolate.module_info(module)?;
        self.insert(info.name, module);
        Ok(())
    }

    /// Module registered under `name`
    pub fn get(&self, name: &str) -> Option<ObjectRef> {
        self.modules.get(name).map(|entry| *entry)
    }

    /// Number of modules
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// All shared modules, ordered by name
    pub fn modules(&self) -> Vec<ObjectRef> {
        let mut entries: Vec<(String, ObjectRef)> = self
            .modules
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, module)| module).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otter_heap::{ModuleStatus, Runtime, TaggedValue};
    use std::sync::Arc;

    #[test]
    fn test_resolved_skips_uninstantiated() {
        let runtime = Runtime::new().unwrap();
        let mut isolate = runtime.new_isolate().unwrap();
        let mut manager = ModuleManager::new();
        for (name, status) in [
            ("b.js", ModuleStatus::Evaluated),
            ("a.js", ModuleStatus::Linked),
            ("c.js", ModuleStatus::Linking),
        ] {
            let module = isolate
                .new_module(name, ModuleKind::Normal, status, TaggedValue::UNDEFINED, &[])
                .unwrap();
            manager.add(&isolate, module).unwrap();
        }
        let resolved = manager.resolved(&isolate).unwrap();
        assert_eq!(resolved, vec![manager.get("a.js").unwrap(), manager.get("b.js").unwrap()]);
    }

    #[test]
    fn test_shared_manager_across_threads() {
        let runtime = Runtime::new().unwrap();
        let mut isolate = runtime.new_isolate().unwrap();
        let module = isolate
            .new_module("s.js", ModuleKind::Shared, ModuleStatus::Linked, TaggedValue::UNDEFINED, &[])
            .unwrap();
        let shared = Arc::new(SharedModuleManager::new());
        let remote = Arc::clone(&shared);
        std::thread::spawn(move || {
            remote.insert("s.js", module);
        })
        .join()
        .unwrap();
        assert_eq!(shared.get("s.js"), Some(module));
        assert_eq!(shared.modules(), vec![module]);
    }
}
