use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use drive_storage_core::path::{ancestors, parent_path};
use drive_storage_core::{ListingResult, StorageItem};

/// The subset of object metadata a listing needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// Turn a flat key listing into items plus implicit folders.
///
/// Keys ending in `/` are folder markers. Every ancestor prefix of a file
/// key, and every ancestor of a marker, lands in `implicit_folders`.
pub fn build_listing(objects: Vec<ObjectSummary>) -> ListingResult {
    let mut items = Vec::with_capacity(objects.len());
    let mut implicit_folders = BTreeSet::new();

    for object in objects {
        if let Some(marker) = object.key.strip_suffix('/') {
            let folder = marker.trim_matches('/');
            if folder.is_empty() {
                continue;
            }
            implicit_folders.extend(ancestors(parent_path(folder)));
            items.push(StorageItem::folder(folder, object.last_modified));
        } else {
            implicit_folders.extend(ancestors(parent_path(&object.key)));
            items.push(StorageItem::file(
                object.key,
                object.size,
                object.last_modified,
            ));
        }
    }

    ListingResult {
        items,
        implicit_folders,
    }
}
