//! Paginated structure view over a backend listing.

use std::cmp::Ordering;
use std::collections::HashSet;

use chrono::Utc;
use drive_storage_core::{ListingResult, StorageItem};
use serde::{Deserialize, Serialize};

const DEFAULT_PAGE_SIZE: usize = 50;

fn default_page() -> usize {
    1
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Clone, Deserialize)]
pub struct StructureQuery {
    #[serde(default = "default_page")]
    pub page: usize,
    /// Items per page; 0 returns everything
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub search: String,
}

impl Default for StructureQuery {
    fn default() -> Self {
        Self {
            page: default_page(),
            limit: default_limit(),
            search: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StructurePage {
    pub items: Vec<StorageItem>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    pub has_next: bool,
    pub has_prev: bool,
}

/// Explicit items plus an entry for every implicit folder not already listed.
pub fn merge_implicit(listing: ListingResult) -> Vec<StorageItem> {
    let ListingResult {
        mut items,
        implicit_folders,
    } = listing;

    let explicit: HashSet<String> = items
        .iter()
        .filter(|item| item.is_folder())
        .map(|item| item.path.clone())
        .collect();

    let now = Utc::now();
    items.extend(
        implicit_folders
            .into_iter()
            .filter(|path| !explicit.contains(path))
            .map(|path| StorageItem::implicit_folder(path, now)),
    );
    items
}

/// Folders before files, then case-insensitive name, then path.
fn display_order(a: &StorageItem, b: &StorageItem) -> Ordering {
    b.is_folder()
        .cmp(&a.is_folder())
        .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        .then_with(|| a.path.cmp(&b.path))
}

pub fn build_structure(listing: ListingResult, query: &StructureQuery) -> StructurePage {
    let mut items = merge_implicit(listing);

    let needle = query.search.trim().to_lowercase();
    if !needle.is_empty() {
        items.retain(|item| item.name.to_lowercase().contains(&needle));
    }

    items.sort_by(display_order);
    let total = items.len();

    if query.limit == 0 {
        return StructurePage {
            items,
            total,
            page: 1,
            limit: 0,
            total_pages: 1,
            has_next: false,
            has_prev: false,
        };
    }

    let total_pages = total.div_ceil(query.limit).max(1);
    let page = query.page.clamp(1, total_pages);
    let items = items
        .into_iter()
        .skip((page - 1) * query.limit)
        .take(query.limit)
        .collect();

    StructurePage {
        items,
        total,
        page,
        limit: query.limit,
        total_pages,
        has_next: page < total_pages,
        has_prev: page > 1,
    }
}
