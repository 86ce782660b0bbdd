//! One-line descriptions of a listing for status output.

use dualstore_core::normalize::{format_modified, humanize_size};
use dualstore_core::{DirectoryEntry, ListingResult};

/// `"3 items"`, or with a selection `"3 items | 1 item selected | 1.5 KB"`.
pub fn status_line(listing: &ListingResult, selected: Option<&str>) -> String {
    let count = listing.len();
    if count == 0 {
        return "No files to display".to_string();
    }
    let items = format!("{} item{}", count, if count == 1 { "" } else { "s" });
    match selected.and_then(|name| listing.get(name)) {
        Some(entry) => format!("{} | 1 item selected | {}", items, size_label(entry)),
        None => items,
    }
}

/// `"Folder"` for directories, humanized size otherwise.
pub fn size_label(entry: &DirectoryEntry) -> String {
    match entry.file_size() {
        Some(size) => humanize_size(size),
        None => "Folder".to_string(),
    }
}

pub fn modified_label(entry: &DirectoryEntry) -> String {
    entry
        .modified_at
        .as_ref()
        .map(format_modified)
        .unwrap_or_default()
}
