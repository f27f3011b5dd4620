use std::{
    cell::{Cell, RefCell},
    path::Path,
    rc::{Rc, Weak},
};

use crate::{
    cursor::{resolve_index, resolve_range, ManagerBackend},
    Error, FileInfo, Region, Result,
};

pub(crate) struct SlidingCursorInner {
    backend: Weak<dyn ManagerBackend>,
    file: FileInfo,
    region: RefCell<Option<Region>>,
    closed: Cell<bool>,
}

impl SlidingCursorInner {
    /// The only path that truly releases a sliding cursor's region. Reachable from
    /// the owning manager's `close()`, never from the cursor's own public API — see
    /// [`SlidingCursor::close`].
    pub(crate) fn force_release(&self, clock: u64) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(region) = self.region.borrow_mut().take() {
            region.unpin(clock);
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    fn ensure_covers(&self, ofs: usize, len: usize) -> Result<Region> {
        if self.closed.get() {
            return Err(Error::Closed);
        }
        let backend = self.backend.upgrade().ok_or(Error::Closed)?;

        if let Some(region) = self.region.borrow().as_ref() {
            if region.includes_ofs_range(ofs, len) {
                region.touch(backend.clock_tick());
                return Ok(region.clone());
            }
        }

        let fresh = backend.allocate(&self.file, ofs, len)?;
        fresh.pin();
        let clock = backend.clock_tick();
        fresh.touch(clock);

        let mut slot = self.region.borrow_mut();
        if let Some(old) = slot.take() {
            old.unpin(clock);
        }
        *slot = Some(fresh.clone());
        Ok(fresh)
    }
}

/// A cursor that re-homes itself across regions as the caller reads different parts
/// of the file, bound to whichever [`crate::TilingManager`] issued it.
///
/// Unlike [`crate::FixedCursor`], a `SlidingCursor` pins at most one region at a
/// time: reading outside the currently pinned window releases it and requests a
/// fresh one covering the new position, under the manager's normal allocation and
/// eviction policy. This makes it the right tool for scans and random access over
/// files much larger than the configured window size.
///
/// `close()` on a `SlidingCursor` is intentionally a no-op — see its docs. The
/// pinned region is only ever released when the owning manager closes.
#[derive(Clone)]
pub struct SlidingCursor(Rc<SlidingCursorInner>);

impl SlidingCursor {
    pub(crate) fn new(backend: Weak<dyn ManagerBackend>, file: FileInfo) -> Self {
        Self(Rc::new(SlidingCursorInner {
            backend,
            file,
            region: RefCell::new(None),
            closed: Cell::new(false),
        }))
    }

    pub(crate) fn handle(&self) -> Weak<SlidingCursorInner> {
        Rc::downgrade(&self.0)
    }

    #[inline]
    pub fn file(&self) -> &FileInfo {
        &self.0.file
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.0.file.path()
    }

    #[inline]
    pub fn file_size(&self) -> usize {
        self.0.file.size()
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// The `(ofs, size)` of the region currently pinned, if any has been pinned yet.
    ///
    /// Exposed mainly for tests and diagnostics; ordinary callers only need `get`/`slice`.
    pub fn current_window(&self) -> Option<(usize, usize)> {
        self.0
            .region
            .borrow()
            .as_ref()
            .map(|region| (region.ofs(), region.size()))
    }

    /// Reads the byte at file-relative index `i`. Negative `i` counts back from the
    /// end of the file, so `c.get(-1)` is the file's last byte.
    ///
    /// Re-homes the cursor's pinned region if `i` falls outside it.
    pub fn get(&self, i: isize) -> Result<u8> {
        let file_size = self.0.file.size();
        let ofs = resolve_index(i, file_size)?;
        let region = self.0.ensure_covers(ofs, 1)?;
        Ok(region.bytes()[ofs - region.ofs()])
    }

    /// Reads the half-open byte range `[a, b)`, file-relative, negative-index aware
    /// the same way as [`SlidingCursor::get`]. Always returns an owned copy: the
    /// range may straddle more than one region, and the cursor's pinned region can
    /// change again on the very next call regardless of where this one landed.
    ///
    /// May re-home the cursor's pinned region one or more times while gathering.
    pub fn slice(&self, a: isize, b: isize) -> Result<Vec<u8>> {
        let file_size = self.0.file.size();
        let (start, end) = resolve_range(a, b, file_size)?;
        if start == end {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(end - start);
        let mut pos = start;
        while pos < end {
            let region = self.0.ensure_covers(pos, 1)?;
            let local = pos - region.ofs();
            let take = (region.ofs_end() - pos).min(end - pos);
            out.extend_from_slice(&region.bytes()[local..local + take]);
            pos += take;
        }
        Ok(out)
    }

    /// Does nothing. A sliding cursor's pinned region is owned by the access
    /// pattern, not by any one call site holding the handle, so closing the handle
    /// early would strand the manager's idea of what's in use; only the owning
    /// manager's `close()` actually releases it.
    pub fn close(&self) {}
}
