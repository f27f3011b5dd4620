use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    path::{Path, PathBuf},
    rc::{Rc, Weak},
};

use log::{debug, trace};

use crate::{
    cursor::{resolve_size, CursorHandle, ManagerBackend},
    manager::{Closeable, ManagerCore, ManagerScope},
    region::RegionId,
    Error, FileInfo, FixedCursor, Region, Result, SlidingCursor,
};

/// Target region size on 64-bit platforms: large enough that most sequential scans
/// never cross a region boundary, small enough that a handful of regions don't
/// exhaust address space on the platforms this crate actually runs on.
#[cfg(target_pointer_width = "64")]
pub const DEFAULT_WINDOW_SIZE: usize = 64 * 1024 * 1024;

/// Target region size on 32-bit platforms, where address space is the scarce
/// resource and a 64 MiB window would leave room for only a handful of files.
#[cfg(not(target_pointer_width = "64"))]
pub const DEFAULT_WINDOW_SIZE: usize = 16 * 1024 * 1024;

/// How many consecutive `mmap` failures the allocator will absorb by evicting the
/// least-recently-used unused region and retrying, before surfacing
/// [`Error::OutOfMemory`]. Chosen as a small, clearly-bounded constant: each retry is
/// a synchronous, uncontended operation, so there's no benefit to a larger budget —
/// either eviction is making progress or the address space is genuinely exhausted.
const MAX_MMAP_RETRIES: usize = 8;

/// Configuration for a [`TilingManager`], consumed by [`TilingManager::with_config`].
///
/// All three bounds are soft in the sense that a `TilingManager` never refuses a
/// config value outright — `window_size` is rounded up to a page multiple and
/// clamped to at least one page, and `max_memory_size` is clamped to at least one
/// `window_size`, so a manager is always constructible and always able to hold at
/// least one region.
#[derive(Debug, Clone)]
pub struct TilingConfig {
    /// Target region size in bytes. Default: [`DEFAULT_WINDOW_SIZE`].
    pub window_size: usize,
    /// Upper bound on the sum of sizes of all live regions. Default: `16 *
    /// window_size`, a large platform multiple chosen so that the default config
    /// comfortably tiles files well beyond a single window without the caller
    /// having to reason about the budget up front.
    pub max_memory_size: usize,
    /// Upper bound on the count of live regions. Default: effectively unbounded
    /// (`usize::MAX`) — only `max_memory_size` constrains allocation by default.
    pub max_open_handles: usize,
}

impl Default for TilingConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            max_memory_size: DEFAULT_WINDOW_SIZE * 16,
            max_open_handles: usize::MAX,
        }
    }
}

struct TilingCore {
    manager: ManagerCore,
    window_size: usize,
    max_memory_size: usize,
    max_open_handles: usize,
    regions: RefCell<HashMap<RegionId, Region>>,
    relation: RefCell<crate::relation::Relation>,
    next_region_id: Cell<RegionId>,
}

impl TilingCore {
    fn mapped_memory_size(&self) -> usize {
        self.regions.borrow().values().map(Region::size).sum()
    }

    /// Evicts the least-recently-used region with `client_count() == 0`, across all
    /// files this manager has open (eviction is global, not per-file). Returns
    /// `false` if no unused region exists to evict.
    fn evict_lru_unused(&self) -> bool {
        let victim = self
            .regions
            .borrow()
            .iter()
            .filter(|(_, region)| !region.is_used())
            .min_by_key(|(_, region)| region.last_access())
            .map(|(&id, region)| (id, region.file().path().to_path_buf()));

        match victim {
            Some((id, path)) => {
                self.regions.borrow_mut().remove(&id);
                self.relation.borrow_mut().detach_region(&path, id);
                trace!("tiling: evicted region {id} of {}", path.display());
                true
            }
            None => false,
        }
    }

    /// Computes the candidate `(ofs, size)` for a fresh region covering `offset`,
    /// per the allocation algorithm in §4.5: page-align down, then swallow the file
    /// tail into this region if skipping it would otherwise leave a sliver of at
    /// most `window_size / 2` bytes unmapped.
    ///
    /// `window_size` only bounds the *origin-to-origin* spacing of regions; mmap
    /// itself has no alignment requirement on length. A `window_size` smaller than
    /// one page (as the test suite uses to force tiling within a single page) must
    /// still produce a region that covers `offset` — the page-aligned origin alone
    /// doesn't guarantee that, so the size is widened to reach at least `offset`.
    fn candidate_region(&self, file: &FileInfo, offset: usize) -> (usize, usize) {
        let page = crate::platform::page_size();
        let o_prime = crate::platform::align_down(offset, page);
        let covers_offset = offset - o_prime + 1;
        let mut size = self.window_size.max(covers_offset).min(file.size() - o_prime);
        let tail = file.size() - (o_prime + size);
        if tail > 0 && tail <= self.window_size / 2 {
            size += tail;
        }
        (o_prime, size)
    }

    /// `_size` plays no part in sizing the region itself: §4.5 step 2 sizes a fresh
    /// region purely from `window_size` and the file tail, never from the request.
    fn allocate_region(&self, file: &FileInfo, offset: usize, _size: usize) -> Result<Region> {
        if self.manager.is_closed() {
            return Err(Error::Closed);
        }
        if offset >= file.size() {
            return Err(Error::OutOfRange {
                offset,
                file_size: file.size(),
            });
        }

        let path = file.path().to_path_buf();
        let clock = self.manager.clock_tick();

        if let Some(region) = self.reuse_existing(&path, offset, clock) {
            return Ok(region);
        }

        let (o_prime, candidate_size) = self.candidate_region(file, offset);

        loop {
            let would_be_memory = self.mapped_memory_size() + candidate_size;
            let would_be_handles = self.regions.borrow().len() + 1;
            if would_be_memory <= self.max_memory_size && would_be_handles <= self.max_open_handles
            {
                break;
            }
            if !self.evict_lru_unused() {
                return Err(Error::OutOfMemory { retries: 0 });
            }
        }

        let mut attempt = 0;
        let region = loop {
            match Region::map(file, o_prime, candidate_size) {
                Ok(region) => break region,
                Err(Error::MmapFailed { .. }) if attempt < MAX_MMAP_RETRIES => {
                    attempt += 1;
                    if !self.evict_lru_unused() {
                        return Err(Error::OutOfMemory { retries: attempt });
                    }
                }
                Err(other) => return Err(other),
            }
        };

        let id = self.next_region_id.get();
        self.next_region_id.set(id + 1);
        region.touch(clock);
        self.regions.borrow_mut().insert(id, region.clone());
        self.relation.borrow_mut().attach_region(path.clone(), id);
        debug!(
            "tiling: mapped region {id} over {} [{o_prime}, {})",
            path.display(),
            o_prime + candidate_size
        );
        Ok(region)
    }

    fn reuse_existing(&self, path: &PathBuf, offset: usize, clock: u64) -> Option<Region> {
        let regions = self.regions.borrow();
        let relation = self.relation.borrow();
        for &id in relation.regions_for(path) {
            if let Some(region) = regions.get(&id) {
                if region.includes_ofs(offset) {
                    region.touch(clock);
                    return Some(region.clone());
                }
            }
        }
        None
    }
}

impl ManagerBackend for TilingCore {
    fn allocate(&self, file: &FileInfo, ofs: usize, size: usize) -> Result<Region> {
        self.allocate_region(file, ofs, size)
    }

    fn supports_sliding(&self) -> bool {
        true
    }

    fn clock_tick(&self) -> u64 {
        self.manager.clock_tick()
    }
}

/// A manager that serves arbitrary `(offset, size)` requests from a bounded pool of
/// fixed-size, page-aligned regions, reusing a region that already covers a request
/// and evicting the least-recently-used unused region under memory or handle
/// pressure.
///
/// This is the general-purpose manager: unlike [`crate::GreedyManager`], a
/// `TilingManager` never needs to hold an entire file resident to serve a cursor
/// over it, and it is the only manager that issues [`SlidingCursor`]s.
pub struct TilingManager(Rc<TilingCore>);

impl Default for TilingManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TilingManager {
    /// A manager with [`TilingConfig::default`].
    pub fn new() -> Self {
        Self::with_config(TilingConfig::default())
    }

    /// A manager configured per `config`. `window_size` is clamped to at least one
    /// byte but otherwise taken as given — mmap only requires a region's *offset* to
    /// be page-aligned, never its length, so rounding the window itself up to a page
    /// multiple would make it impossible to tile a file smaller than one page.
    /// `max_memory_size` is clamped to hold at least one region of that size, so the
    /// manager can always make progress.
    pub fn with_config(config: TilingConfig) -> Self {
        let window_size = config.window_size.max(1);
        let max_memory_size = config.max_memory_size.max(window_size);
        let max_open_handles = config.max_open_handles.max(1);
        Self(Rc::new(TilingCore {
            manager: ManagerCore::default(),
            window_size,
            max_memory_size,
            max_open_handles,
            regions: RefCell::new(HashMap::new()),
            relation: RefCell::new(crate::relation::Relation::default()),
            next_region_id: Cell::new(0),
        }))
    }

    /// The effective window size this manager tiles with (`config.window_size`,
    /// clamped to at least one byte).
    pub fn window_size(&self) -> usize {
        self.0.window_size
    }

    fn backend(&self) -> Weak<dyn ManagerBackend> {
        Rc::downgrade(&self.0) as Weak<dyn ManagerBackend>
    }

    /// Opens a cursor over the entirety of `path`.
    pub fn open(&self, path: &Path) -> Result<FixedCursor> {
        self.open_range(path, 0, 0)
    }

    /// Opens a [`FixedCursor`] over `[offset, offset + size)` of `path`. `size == 0`
    /// means "to end of file". The returned cursor's buffer may be narrower than
    /// `size` if the tiling manager's region doesn't cover the whole request —
    /// chain [`FixedCursor::next_cursor`] to read the remainder.
    pub fn open_range(&self, path: &Path, offset: usize, size: usize) -> Result<FixedCursor> {
        if self.0.manager.is_closed() {
            return Err(Error::Closed);
        }
        let file = self.0.manager.open_file(path)?;
        let resolved = resolve_size(offset, size, file.size())?;
        let region = self.0.allocate_region(&file, offset, resolved)?;
        let cursor = FixedCursor::new(self.backend(), region, offset, resolved);
        self.0
            .manager
            .register_cursor(CursorHandle::Fixed(cursor.handle()));
        debug!(
            "tiling: opened fixed cursor on {} [{offset}, {})",
            file.path().display(),
            offset + resolved
        );
        Ok(cursor)
    }

    /// Opens a [`SlidingCursor`] over `path`, re-homing across regions as the
    /// caller's accesses move around the file.
    pub fn open_sliding(&self, path: &Path) -> Result<SlidingCursor> {
        if self.0.manager.is_closed() {
            return Err(Error::Closed);
        }
        let file = self.0.manager.open_file(path)?;
        let cursor = SlidingCursor::new(self.backend(), file.clone());
        self.0
            .manager
            .register_cursor(CursorHandle::Sliding(cursor.handle()));
        debug!("tiling: opened sliding cursor on {}", file.path().display());
        Ok(cursor)
    }

    /// Force-releases every region with `client_count() == 0` right now, returning
    /// how many were reclaimed. Used to shed memory eagerly between bursts of
    /// activity without waiting for allocation pressure to trigger eviction.
    pub fn collect(&self) -> usize {
        let mut reclaimed = 0;
        while self.0.evict_lru_unused() {
            reclaimed += 1;
        }
        reclaimed
    }

    pub fn num_open_regions(&self) -> usize {
        self.0.regions.borrow().len()
    }

    pub fn num_used_regions(&self) -> usize {
        self.0.regions.borrow().values().filter(|r| r.is_used()).count()
    }

    pub fn num_open_cursors(&self) -> usize {
        self.0.manager.num_open_cursors()
    }

    pub fn mapped_memory_size(&self) -> usize {
        self.0.mapped_memory_size()
    }

    pub fn max_mapped_memory_size(&self) -> usize {
        self.0.max_memory_size
    }

    pub fn max_file_handles(&self) -> usize {
        self.0.max_open_handles
    }

    /// Enters a scoped acquisition: `close()` runs when the outermost guard for
    /// this manager drops, even on an unwinding exit path. Nested calls on the same
    /// manager are re-entrant — a cursor opened inside an inner scope survives the
    /// inner scope's exit, only the outermost one triggers `close()`.
    pub fn scope(&self) -> ManagerScope<'_, Self> {
        ManagerScope::new(self)
    }
}

impl Closeable for TilingManager {
    fn core(&self) -> &ManagerCore {
        &self.0.manager
    }

    /// Releases every cursor the manager issued that is still open, releases every
    /// region regardless of `client_count`, and closes every `FileInfo` descriptor.
    /// Idempotent.
    fn close(&self) {
        if !self.0.manager.mark_closed() {
            return;
        }
        self.0.manager.force_close_cursors();
        self.0.regions.borrow_mut().clear();
        self.0.relation.borrow_mut().clear();
        debug!("tiling: closed");
    }
}

impl Drop for TilingManager {
    fn drop(&mut self) {
        Closeable::close(self);
    }
}
