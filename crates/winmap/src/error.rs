use std::{io, path::PathBuf, result};

use thiserror::Error;

pub type Result<T, E = Error> = result::Result<T, E>;

/// Error types for winmap operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("{0}: not found")]
    NotFound(PathBuf),

    #[error("{0}: not a regular file")]
    NotARegularFile(PathBuf),

    #[error("{0}: file is empty, a region of size 0 is invalid")]
    EmptyFile(PathBuf),

    #[error("offset {offset} is beyond end of file (size {file_size})")]
    OutOfRange { offset: usize, file_size: usize },

    #[error("sliding cursors are not supported by this manager")]
    Unsupported,

    #[error("out of memory: region budget exhausted after {retries} eviction attempt(s)")]
    OutOfMemory { retries: usize },

    #[error("cursor already released")]
    AlreadyReleased,

    #[error("operation on a closed cursor or manager")]
    Closed,

    #[error("failed to map region at offset {ofs} (size {size})")]
    MmapFailed {
        ofs: usize,
        size: usize,
        #[source]
        source: io::Error,
    },
}
