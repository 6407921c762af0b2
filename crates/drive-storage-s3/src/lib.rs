//! S3-compatible object store backend for intake-drive.
//!
//! Object stores have no directories: a folder is either a zero-byte marker
//! object at `path/` or merely a prefix of some file key. Listings synthesize
//! the latter as implicit folders.

mod client;
mod listing;
mod storage;

pub use client::S3ClientOptions;
pub use listing::{build_listing, ObjectSummary};
pub use storage::ObjectStoreBackend;
