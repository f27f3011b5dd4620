use std::{
    cell::Cell,
    path::Path,
    rc::{Rc, Weak},
};

use crate::{
    cursor::{resolve_size, ManagerBackend},
    Error, FileInfo, Region, Result,
};

pub(crate) struct FixedCursorInner {
    backend: Weak<dyn ManagerBackend>,
    region: Region,
    ofs: usize,
    size: usize,
    closed: Cell<bool>,
}

impl FixedCursorInner {
    /// Releases the pinned region, if not already released. Idempotent: called both
    /// by the cursor's own `close()`/`Drop` and, if the client never gets there, by
    /// the owning manager's `close()` via the cursor registry.
    pub(crate) fn force_close(&self, clock: u64) {
        if self.closed.replace(true) {
            return;
        }
        self.region.unpin(clock);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }
}

impl Drop for FixedCursorInner {
    fn drop(&mut self) {
        if self.closed.get() {
            return;
        }
        // The manager may already be gone (it closed first); in that case every
        // region it owned was force-released at that point and there is nothing
        // left to unpin here.
        if let Some(backend) = self.backend.upgrade() {
            let clock = backend.clock_tick();
            self.region.unpin(clock);
        }
        self.closed.set(true);
    }
}

/// A cursor pinned to exactly one region for its entire lifetime.
///
/// Issued by both [`crate::GreedyManager`] and [`crate::TilingManager`]. The window
/// behind a `FixedCursor` never moves: [`FixedCursor::buffer`] always returns the
/// same bytes, at the cost of possibly holding more memory pinned than a
/// [`crate::SlidingCursor`] would for the same access pattern.
///
/// If the cursor's logical range extends past the region backing it (the tiling
/// manager may hand out a region smaller than what was asked for), `buffer()`
/// truncates to the region boundary; chain [`FixedCursor::next_cursor`] to continue
/// reading from where it left off.
///
/// Cheap to clone — clones share the same pinned region and release it together,
/// on whichever clone is closed or dropped last.
#[derive(Clone)]
pub struct FixedCursor(Rc<FixedCursorInner>);

impl FixedCursor {
    pub(crate) fn new(
        backend: Weak<dyn ManagerBackend>,
        region: Region,
        ofs: usize,
        size: usize,
    ) -> Self {
        region.pin();
        Self(Rc::new(FixedCursorInner {
            backend,
            region,
            ofs,
            size,
            closed: Cell::new(false),
        }))
    }

    pub(crate) fn handle(&self) -> Weak<FixedCursorInner> {
        Rc::downgrade(&self.0)
    }

    /// The file this cursor's window is backed by.
    #[inline]
    pub fn finfo(&self) -> &FileInfo {
        self.0.region.file()
    }

    /// The canonicalized path of the backing file.
    #[inline]
    pub fn path(&self) -> &Path {
        self.0.region.file().path()
    }

    /// Start of this cursor's logical window, in file-relative bytes.
    #[inline]
    pub fn ofs(&self) -> usize {
        self.0.ofs
    }

    /// Length of this cursor's logical window, in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size
    }

    /// End of this cursor's logical window (exclusive), in file-relative bytes.
    #[inline]
    pub fn ofs_end(&self) -> usize {
        self.0.ofs + self.0.size
    }

    /// Total size of the backing file.
    #[inline]
    pub fn file_size(&self) -> usize {
        self.0.region.file().size()
    }

    #[inline]
    pub fn closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Whether `x` (a file-relative offset) falls within this cursor's window.
    #[inline]
    pub fn includes_ofs(&self, x: usize) -> bool {
        x >= self.ofs() && x < self.ofs_end()
    }

    /// A view over this cursor's window, as far as the pinned region covers it.
    ///
    /// Spans exactly `size()` bytes when the logical window lies wholly within the
    /// pinned region; otherwise truncated to the region's own boundary — the
    /// caller is expected to chain [`FixedCursor::next_cursor`] for the remainder.
    /// Errors with [`Error::Closed`] once the cursor has been released.
    pub fn buffer(&self) -> Result<&[u8]> {
        if self.closed() {
            return Err(Error::Closed);
        }
        let region = &self.0.region;
        let local_start = self.0.ofs - region.ofs();
        let available = region.size() - local_start;
        let len = self.0.size.min(available);
        Ok(&region.bytes()[local_start..local_start + len])
    }

    /// Reads the byte at window-relative index `i`.
    pub fn get(&self, i: usize) -> Result<u8> {
        let buf = self.buffer()?;
        buf.get(i).copied().ok_or(Error::OutOfRange {
            offset: i,
            file_size: self.size(),
        })
    }

    /// Releases the pinned region. Idempotent — safe to call after the cursor is
    /// already closed, and runs automatically on `Drop` if the client never calls
    /// it. For a single-shot release that reports double-release as an error, use
    /// [`FixedCursor::release`].
    pub fn close(&self) {
        let clock = self
            .0
            .backend
            .upgrade()
            .map(|backend| backend.clock_tick())
            .unwrap_or(0);
        self.0.force_close(clock);
    }

    /// Releases the pinned region, same as [`FixedCursor::close`], but fails with
    /// [`Error::AlreadyReleased`] if the cursor was already closed rather than
    /// silently succeeding.
    pub fn release(&self) -> Result<()> {
        if self.closed() {
            return Err(Error::AlreadyReleased);
        }
        self.close();
        Ok(())
    }

    /// Closes this cursor and opens a new one over `[offset, offset + size)` of the
    /// same file. `size == 0` means "to end of file".
    pub fn make_cursor(&self, offset: usize, size: usize) -> Result<FixedCursor> {
        let backend = self.0.backend.upgrade().ok_or(Error::Closed)?;
        let file = self.0.region.file().clone();
        let resolved_size = resolve_size(offset, size, file.size())?;
        let region = backend.allocate(&file, offset, resolved_size)?;
        self.close();
        let new_backend: Weak<dyn ManagerBackend> = Rc::downgrade(&backend);
        Ok(FixedCursor::new(new_backend, region, offset, resolved_size))
    }

    /// Closes this cursor and opens the next one of the same size immediately
    /// following it — `make_cursor(ofs_end(), size())`. Fails with
    /// [`Error::OutOfRange`] once `ofs_end()` reaches end of file.
    pub fn next_cursor(&self) -> Result<FixedCursor> {
        self.make_cursor(self.ofs_end(), self.size())
    }
}
