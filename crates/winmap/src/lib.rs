#![doc = include_str!("../README.md")]

mod cursor;
mod error;
mod file_info;
mod fixed_cursor;
mod greedy;
mod manager;
mod platform;
mod region;
mod relation;
mod sliding_cursor;
mod tiling;

pub use error::{Error, Result};
pub use file_info::FileInfo;
pub use fixed_cursor::FixedCursor;
pub use greedy::GreedyManager;
pub use manager::{Closeable, ManagerScope};
pub use platform::page_size;
pub use region::Region;
pub use sliding_cursor::SlidingCursor;
pub use tiling::{TilingConfig, TilingManager, DEFAULT_WINDOW_SIZE};
