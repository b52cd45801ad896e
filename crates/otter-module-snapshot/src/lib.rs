//! # Otter Module Snapshot
//!
//! Persists the resolved module table of an isolate so later processes can
//! skip module resolution on a cold start.
//!
//! - [`ModuleSnapshot::save`] serializes modules with the module
//!   serializer and writes the file from a background [`TaskPool`]
//! - [`ModuleSnapshot::load`] verifies checksum and versions, rebuilds the
//!   modules and fills [`ModuleManager`] / [`SharedModuleManager`]
//!
//! ## Example
//!
//! ```ignore
//! let snapshot = ModuleSnapshot::new(SnapshotConfig::in_dir(cache_dir));
//! if !snapshot.load(&mut isolate, &mut modules, &shared) {
//!     resolve_modules(&mut isolate, &mut modules, &shared)?;
//!     snapshot.save(&mut isolate, &modules, &shared, &pool)?;
//! }
//! ```

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod format;
pub mod manager;
pub mod snapshot;
pub mod task_pool;

pub use config::SnapshotConfig;
pub use error::{SnapshotError, SnapshotResult};
pub use format::{SnapshotFile, checksum};
pub use manager::{ModuleManager, SharedModuleManager};
pub use snapshot::ModuleSnapshot;
pub use task_pool::{Task, TaskPool, ThreadTaskPool, TokioTaskPool};
