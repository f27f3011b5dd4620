use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
    sync::OnceLock,
};

use memmap2::{Mmap, MmapOptions};

use crate::{Error, Result};

/// Opens `path` read-only and returns the open handle, its canonical path, and its size.
///
/// Fails with [`Error::NotFound`] if the path does not exist, [`Error::NotARegularFile`]
/// if it resolves to a directory, symlink loop, or other non-regular entry, and
/// [`Error::EmptyFile`] if the file is zero bytes (a region of size 0 is invalid, see
/// the module-level docs on [`crate::Region`]).
pub(crate) fn open_read(path: &Path) -> Result<(File, PathBuf, usize)> {
    let canonical = fs::canonicalize(path).map_err(|e| map_open_error(path, e))?;

    let file = File::open(&canonical).map_err(|e| map_open_error(&canonical, e))?;
    let meta = file.metadata()?;
    if !meta.is_file() {
        return Err(Error::NotARegularFile(canonical));
    }

    let size = meta.len() as usize;
    if size == 0 {
        return Err(Error::EmptyFile(canonical));
    }

    Ok((file, canonical, size))
}

/// Resolves `path` to its canonical form without opening it — used to key the
/// file-info cache before paying the cost of a full open-and-stat on a cache hit.
pub(crate) fn canonicalize(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| map_open_error(path, e))
}

fn map_open_error(path: &Path, e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::NotFound {
        Error::NotFound(path.to_path_buf())
    } else {
        Error::Io(e)
    }
}

/// Maps `[ofs, ofs + size)` of `file` read-only.
///
/// # Safety
/// The caller must ensure `file` is not concurrently truncated or written to by this
/// process or another while the mapping is alive; this crate never opens its own
/// files for writing, but it cannot make guarantees about other processes.
pub(crate) fn map_region(file: &File, ofs: usize, size: usize) -> Result<Mmap> {
    unsafe {
        MmapOptions::new()
            .offset(ofs as u64)
            .len(size)
            .map(file)
            .map_err(|source| Error::MmapFailed { ofs, size, source })
    }
}

/// Returns the platform page size, queried once and cached for the process lifetime.
pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();
    *PAGE_SIZE.get_or_init(query_page_size)
}

#[cfg(unix)]
fn query_page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

#[cfg(not(unix))]
fn query_page_size() -> usize {
    4096
}

/// Rounds `value` down to the nearest multiple of `align` (`align` must be a power of two).
#[inline]
pub(crate) fn align_down(value: usize, align: usize) -> usize {
    value & !(align - 1)
}

/// Rounds `value` up to the nearest multiple of `align` (`align` must be a power of two).
#[inline]
pub(crate) fn align_up(value: usize, align: usize) -> usize {
    align_down(value.saturating_add(align - 1), align)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_cached_and_consistent() {
        assert_eq!(page_size(), page_size());
        assert!(page_size().is_power_of_two());
    }

    #[test]
    fn align_down_rounds_to_page_boundary() {
        assert_eq!(align_down(0, 4096), 0);
        assert_eq!(align_down(1, 4096), 0);
        assert_eq!(align_down(4096, 4096), 4096);
        assert_eq!(align_down(4097, 4096), 4096);
    }

    #[test]
    fn align_up_rounds_to_page_boundary() {
        assert_eq!(align_up(0, 4096), 0);
        assert_eq!(align_up(1, 4096), 4096);
        assert_eq!(align_up(4096, 4096), 4096);
        assert_eq!(align_up(4097, 4096), 8192);
    }
}
