use std::{fs::File, path::Path, path::PathBuf, rc::Rc};

use crate::{Result, platform};

#[derive(Debug)]
struct FileInfoInner {
    path: PathBuf,
    size: usize,
    file: File,
}

/// Canonicalizes a file path to a stable identity: its size (captured once, at first
/// open) and an open read-only descriptor.
///
/// Two different spellings of the same path (a relative path, a symlink, `./f`) that
/// resolve to the same canonical path share one `FileInfo` and therefore share regions.
/// Cheap to clone: it's a reference-counted handle, not a copy of the open file.
#[derive(Debug, Clone)]
pub struct FileInfo(Rc<FileInfoInner>);

impl FileInfo {
    pub(crate) fn open(path: &Path) -> Result<Self> {
        let (file, canonical, size) = platform::open_read(path)?;
        Ok(Self(Rc::new(FileInfoInner {
            path: canonical,
            size,
            file,
        })))
    }

    /// The canonicalized path this `FileInfo` was opened from.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.0.path
    }

    /// File size in bytes, captured at first open and immutable for this handle's lifetime.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.size
    }

    #[inline]
    pub(crate) fn file(&self) -> &File {
        &self.0.file
    }

    #[inline]
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}
