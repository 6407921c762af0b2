//! Core traits and types for intake-drive storage backends.
//!
//! This crate defines the abstractions shared between the local and object-store implementations:
//! - `StorageBackend`: file/folder CRUD and whole-backend listing
//! - `StorageItem` / `ListingResult`: listing data model, including implicit folders
//! - `path`: slash normalization and slug generation

mod error;
pub mod path;
mod storage;

pub use error::StorageError;
pub use storage::{
    content_digest, ItemKind, ListingResult, StorageBackend, StorageItem, StoredFileInfo,
};
