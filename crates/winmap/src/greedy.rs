use std::{
    cell::RefCell,
    collections::HashMap,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use log::{debug, trace};

use crate::{
    cursor::{resolve_size, CursorHandle, ManagerBackend},
    file_info::FileInfo,
    manager::{Closeable, ManagerCore, ManagerScope},
    region::Region,
    Error, FixedCursor, Result, SlidingCursor,
};

struct GreedyCore {
    manager: ManagerCore,
    regions: RefCell<HashMap<PathBuf, Region>>,
    max_file_handles_hint: Option<usize>,
}

impl ManagerBackend for GreedyCore {
    fn allocate(&self, file: &FileInfo, _ofs: usize, _size: usize) -> Result<Region> {
        if self.manager.is_closed() {
            return Err(Error::Closed);
        }
        let mut regions = self.regions.borrow_mut();
        if let Some(existing) = regions.get(file.path()) {
            return Ok(existing.clone());
        }
        trace!("greedy: mapping whole file {}", file.path().display());
        let region = Region::map(file, 0, file.size())?;
        regions.insert(file.path().to_path_buf(), region.clone());
        Ok(region)
    }

    fn supports_sliding(&self) -> bool {
        false
    }

    fn clock_tick(&self) -> u64 {
        self.manager.clock_tick()
    }
}

/// A manager that maps each distinct file it sees in full, exactly once, and keeps
/// it mapped until the manager closes.
///
/// No window size, no memory budget, no eviction: every file opened through a
/// `GreedyManager` stays resident for the manager's lifetime. This is the right
/// choice when the working set comfortably fits in address space and the cost of
/// re-mapping files is worth avoiding entirely — small config files, fixtures, or a
/// bounded set of inputs known ahead of time. For anything where the total size of
/// touched files may exceed what you're willing to keep mapped at once, use
/// [`crate::TilingManager`] instead.
///
/// Only issues [`FixedCursor`]s; [`GreedyManager::open_sliding`] always fails with
/// [`Error::Unsupported`], since a `SlidingCursor` only makes sense against a
/// bounded window and a `GreedyManager` has none.
pub struct GreedyManager(Rc<GreedyCore>);

impl Default for GreedyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl GreedyManager {
    pub fn new() -> Self {
        Self::with_max_file_handles_hint(None)
    }

    /// Same as [`GreedyManager::new`], but records `hint` for
    /// [`GreedyManager::max_file_handles_hint`].
    ///
    /// The hint is purely advisory: a `GreedyManager` never closes or refuses to map
    /// files because of it. Enforcing it would mean picking files to evict from a
    /// policy that otherwise guarantees every opened file stays resident, which
    /// defeats the point of this manager; callers that need a bound should use
    /// [`crate::TilingManager`].
    pub fn with_max_file_handles_hint(hint: Option<usize>) -> Self {
        Self(Rc::new(GreedyCore {
            manager: ManagerCore::default(),
            regions: RefCell::new(HashMap::new()),
            max_file_handles_hint: hint,
        }))
    }

    pub fn max_file_handles_hint(&self) -> Option<usize> {
        self.0.max_file_handles_hint
    }

    fn backend(&self) -> Weak<dyn ManagerBackend> {
        Rc::downgrade(&self.0) as Weak<dyn ManagerBackend>
    }

    /// Opens a cursor over the entirety of `path`.
    pub fn open(&self, path: &Path) -> Result<FixedCursor> {
        self.open_range(path, 0, 0)
    }

    /// Opens a cursor over `[offset, offset + size)` of `path`. The file itself is
    /// still mapped as a single whole-file region; only the cursor's reported
    /// window is narrowed to `[offset, offset + size)`. `size == 0` means "to end
    /// of file".
    pub fn open_range(&self, path: &Path, offset: usize, size: usize) -> Result<FixedCursor> {
        if self.0.manager.is_closed() {
            return Err(Error::Closed);
        }
        let file = self.0.manager.open_file(path)?;
        let resolved = resolve_size(offset, size, file.size())?;
        let region = self.0.allocate(&file, offset, resolved)?;
        let cursor = FixedCursor::new(self.backend(), region, offset, resolved);
        self.0
            .manager
            .register_cursor(CursorHandle::Fixed(cursor.handle()));
        debug!(
            "greedy: opened cursor on {} [{offset}, {})",
            file.path().display(),
            offset + resolved
        );
        Ok(cursor)
    }

    /// Always fails with [`Error::Unsupported`] — see the type-level docs.
    pub fn open_sliding(&self, _path: &Path) -> Result<SlidingCursor> {
        Err(Error::Unsupported)
    }

    pub fn num_open_regions(&self) -> usize {
        self.0.regions.borrow().len()
    }

    pub fn num_used_regions(&self) -> usize {
        self.0
            .regions
            .borrow()
            .values()
            .filter(|r| r.is_used())
            .count()
    }

    pub fn num_open_cursors(&self) -> usize {
        self.0.manager.num_open_cursors()
    }

    pub fn mapped_memory_size(&self) -> usize {
        self.0.regions.borrow().values().map(Region::size).sum()
    }

    /// Enters a scoped acquisition: `close()` runs when the outermost guard for
    /// this manager drops, even on an unwinding exit path. Nested calls on the same
    /// manager are re-entrant.
    pub fn scope(&self) -> ManagerScope<'_, Self> {
        ManagerScope::new(self)
    }
}

impl Closeable for GreedyManager {
    fn core(&self) -> &ManagerCore {
        &self.0.manager
    }

    /// Force-releases every outstanding cursor and drops every mapped region.
    /// Idempotent; safe to call more than once.
    fn close(&self) {
        if !self.0.manager.mark_closed() {
            return;
        }
        self.0.manager.force_close_cursors();
        self.0.regions.borrow_mut().clear();
        debug!("greedy: closed");
    }
}

impl Drop for GreedyManager {
    fn drop(&mut self) {
        Closeable::close(self);
    }
}
