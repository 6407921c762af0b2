//! Local filesystem backend for intake-drive.
//!
//! Folders are real directories, so listings never contain implicit folders.

mod storage;

pub use storage::LocalDiskBackend;
