use std::{
    cell::Cell,
    collections::HashMap,
    path::{Path, PathBuf},
};

use crate::{cursor::CursorHandle, file_info::FileInfo, platform, Result};

/// The bookkeeping every manager flavor shares, regardless of its region allocation
/// policy: file-info interning, the cursor registry closed against at manager close,
/// the logical clock, the closed flag, and scoped-acquisition re-entrancy.
///
/// `GreedyManager` and `TilingManager` each embed one of these and layer their own
/// region table and allocation policy on top (see `greedy.rs`, `tiling.rs`).
#[derive(Debug, Default)]
pub(crate) struct ManagerCore {
    file_infos: std::cell::RefCell<HashMap<PathBuf, FileInfo>>,
    cursors: std::cell::RefCell<Vec<CursorHandle>>,
    clock: Cell<u64>,
    closed: Cell<bool>,
    scope_depth: Cell<usize>,
}

impl ManagerCore {
    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Resolves `path` to its interned `FileInfo`, opening it read-only on first
    /// reference and reusing the existing entry for every later call with an
    /// equivalent path (`./f`, `f`, a symlink — anything that canonicalizes the same).
    pub fn open_file(&self, path: &Path) -> Result<FileInfo> {
        let canonical = platform::canonicalize(path)?;
        if let Some(existing) = self.file_infos.borrow().get(&canonical) {
            return Ok(existing.clone());
        }
        let finfo = FileInfo::open(&canonical)?;
        self.file_infos
            .borrow_mut()
            .insert(canonical, finfo.clone());
        Ok(finfo)
    }

    pub fn register_cursor(&self, handle: CursorHandle) {
        self.cursors.borrow_mut().push(handle);
    }

    pub fn clock_tick(&self) -> u64 {
        let next = self.clock.get() + 1;
        self.clock.set(next);
        next
    }

    fn prune_cursors(&self) {
        self.cursors.borrow_mut().retain(CursorHandle::is_alive);
    }

    pub fn num_open_cursors(&self) -> usize {
        self.prune_cursors();
        self.cursors.borrow().len()
    }

    /// Marks the core closed. Returns `true` the first time (caller should proceed
    /// with teardown), `false` on every subsequent call (`close()` is idempotent).
    pub fn mark_closed(&self) -> bool {
        !self.closed.replace(true)
    }

    /// Force-closes every cursor still registered and drops every interned `FileInfo`,
    /// which closes their descriptors. Does not touch the region table — each
    /// manager clears its own regions before or after calling this.
    pub fn force_close_cursors(&self) {
        let clock = self.clock_tick();
        for handle in self.cursors.borrow_mut().drain(..) {
            handle.force_close(clock);
        }
        self.file_infos.borrow_mut().clear();
    }

    /// Enters a nested scope, returning the new re-entrancy depth.
    pub fn enter_scope(&self) -> usize {
        let depth = self.scope_depth.get() + 1;
        self.scope_depth.set(depth);
        depth
    }

    /// Exits a nested scope. Returns `true` when this was the outermost scope (depth
    /// reached zero), meaning the caller should now call `close()`.
    pub fn exit_scope(&self) -> bool {
        let depth = self.scope_depth.get().saturating_sub(1);
        self.scope_depth.set(depth);
        depth == 0
    }
}

/// Implemented by both manager flavors so [`ManagerScope`] can be written once.
pub trait Closeable {
    /// The shared bookkeeping core backing this manager's scope depth.
    fn core(&self) -> &ManagerCore;

    /// Releases every cursor and region this manager holds. Idempotent.
    fn close(&self);
}

/// An RAII guard returned by [`crate::GreedyManager::scope`] /
/// [`crate::TilingManager::scope`]. Re-entrant: nested `scope()` calls on the same
/// manager only trigger `close()` when the outermost guard drops, so a cursor issued
/// inside an inner scope survives until its own release, not the inner scope's exit.
pub struct ManagerScope<'a, M: Closeable> {
    manager: &'a M,
}

impl<'a, M: Closeable> ManagerScope<'a, M> {
    pub(crate) fn new(manager: &'a M) -> Self {
        manager.core().enter_scope();
        Self { manager }
    }
}

impl<'a, M: Closeable> Drop for ManagerScope<'a, M> {
    fn drop(&mut self) {
        if self.manager.core().exit_scope() {
            self.manager.close();
        }
    }
}
