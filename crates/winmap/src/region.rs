use std::{cell::Cell, rc::Rc};

use memmap2::Mmap;

use crate::{FileInfo, Result, platform};

/// Identifies a region within one manager's region table. Not meaningful across managers.
pub(crate) type RegionId = usize;

#[derive(Debug)]
struct RegionInner {
    file: FileInfo,
    ofs: usize,
    size: usize,
    mapping: Mmap,
    client_count: Cell<usize>,
    last_access: Cell<u64>,
}

/// An immutable handle to one OS memory mapping over `[ofs, ofs + size)` of a file.
///
/// `ofs` and `size` here are the page-aligned, mmap-rounded range — not necessarily
/// the logical `(offset, size)` a client asked for. Cursors translate between the two;
/// a `Region` never knows about the cursors pinning it, only how many there are.
///
/// Created by a manager's allocation policy; destroyed when the manager evicts it
/// (which requires `client_count() == 0`) or when the manager closes.
#[derive(Debug, Clone)]
pub struct Region(Rc<RegionInner>);

impl Region {
    /// Maps `[ofs, ofs + size)` of `file`. Both `ofs` and `size` must already be the
    /// rounded, page-aligned mmap range; callers (the allocation policies) are
    /// responsible for rounding and clamping against `file.size()` before calling this.
    pub(crate) fn map(file: &FileInfo, ofs: usize, size: usize) -> Result<Self> {
        debug_assert!(ofs % platform::page_size() == 0);
        debug_assert!(size > 0);
        debug_assert!(ofs + size <= file.size());

        let mapping = platform::map_region(file.file(), ofs, size)?;
        Ok(Self(Rc::new(RegionInner {
            file: file.clone(),
            ofs,
            size,
            mapping,
            client_count: Cell::new(0),
            last_access: Cell::new(0),
        })))
    }

    #[inline]
    pub fn file(&self) -> &FileInfo {
        &self.0.file
    }

    #[inline]
    pub fn ofs(&self) -> usize {
        self.0.ofs
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.0.size
    }

    #[inline]
    pub fn ofs_end(&self) -> usize {
        self.0.ofs + self.0.size
    }

    #[inline]
    pub fn client_count(&self) -> usize {
        self.0.client_count.get()
    }

    /// `true` iff at least one cursor is pinning this region (ineligible for eviction).
    #[inline]
    pub fn is_used(&self) -> bool {
        self.client_count() > 0
    }

    #[inline]
    pub fn includes_ofs(&self, x: usize) -> bool {
        x >= self.0.ofs && x < self.ofs_end()
    }

    #[inline]
    pub fn includes_ofs_range(&self, x: usize, n: usize) -> bool {
        x >= self.0.ofs && x.checked_add(n).is_some_and(|end| end <= self.ofs_end())
    }

    /// The full mapped byte range, for callers that have already validated bounds.
    #[inline]
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.0.mapping[..]
    }

    /// Increments `client_count`; called by the allocator each time it hands this
    /// region to a cursor (reused or freshly created).
    #[inline]
    pub(crate) fn pin(&self) {
        self.0.client_count.set(self.0.client_count.get() + 1);
    }

    /// Decrements `client_count` and, if it reaches zero, records `clock` as the
    /// region's last-access timestamp for LRU eviction ordering.
    #[inline]
    pub(crate) fn unpin(&self, clock: u64) {
        let count = self.0.client_count.get();
        debug_assert!(count > 0, "unpin of a region with client_count == 0");
        self.0.client_count.set(count - 1);
        if count - 1 == 0 {
            self.0.last_access.set(clock);
        }
    }

    /// Records `clock` as this region's last-access timestamp. Called whenever the
    /// region is handed to a caller, in addition to the zero-crossing update in `unpin`.
    #[inline]
    pub(crate) fn touch(&self, clock: u64) {
        self.0.last_access.set(clock);
    }

    #[inline]
    pub(crate) fn last_access(&self) -> u64 {
        self.0.last_access.get()
    }

    #[inline]
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
