//! Managed/native thread state
//!
//! A thread in managed state may touch heap objects; a thread in native
//! state is invisible to the relocator and must not. Foreign callbacks
//! run inside a [`NativeScope`]; code that allocates from inside a
//! callback re-enters through a [`ManagedScope`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const STATE_MANAGED: u8 = 0;
const STATE_NATIVE: u8 = 1;

/// Thread state of one isolate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Running engine code, heap access allowed
    Managed,
    /// Running foreign code, heap may move
    Native,
}

/// Shared thread-state flag
#[derive(Debug, Default)]
pub struct ThreadStateFlag {
    state: AtomicU8,
}

impl ThreadStateFlag {
    /// New flag in managed state
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(STATE_MANAGED),
        })
    }

    /// Current state
    pub fn get(&self) -> ThreadState {
        match self.state.load(Ordering::Acquire) {
            STATE_NATIVE => ThreadState::Native,
            _ => ThreadState::Managed,
        }
    }

    /// Whether heap access is allowed
    pub fn is_managed(&self) -> bool {
        self.get() == ThreadState::Managed
    }

    fn swap(&self, state: ThreadState) -> ThreadState {
        let raw = match state {
            ThreadState::Managed => STATE_MANAGED,
            ThreadState::Native => STATE_NATIVE,
        };
        match self.state.swap(raw, Ordering::AcqRel) {
            STATE_NATIVE => ThreadState::Native,
            _ => ThreadState::Managed,
        }
    }
}

/// Guard that keeps the thread in native state until dropped
#[must_use = "the thread returns to its previous state when the scope is dropped"]
pub struct NativeScope {
    flag: Arc<ThreadStateFlag>,
    previous: ThreadState,
}

impl NativeScope {
    /// Enter native state
    pub fn enter(flag: Arc<ThreadStateFlag>) -> Self {
        let previous = flag.swap(ThreadState::Native);
        Self { flag, previous }
    }
}

impl Drop for NativeScope {
    fn drop(&mut self) {
        self.flag.swap(self.previous);
    }
}

/// Guard that keeps the thread in managed state until dropped
#[must_use = "the thread returns to its previous state when the scope is dropped"]
pub struct ManagedScope {
    flag: Arc<ThreadStateFlag>,
    previous: ThreadState,
}

impl ManagedScope {
    /// Enter managed state
    pub fn enter(flag: Arc<ThreadStateFlag>) -> Self {
        let previous = flag.swap(ThreadState::Managed);
        Self { flag, previous }
    }
}

impl Drop for ManagedScope {
    fn drop(&mut self) {
        self.flag.swap(self.previous);
    }
}
