use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// A file or folder entry in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    /// File/folder name, never containing a path separator
    pub name: String,
    /// Location relative to the listed directory
    pub path: String,
    /// Whether this is a folder
    pub is_directory: bool,
    /// Size in bytes (0 for folders, and meaningless there)
    pub size_bytes: u64,
    /// Last modified timestamp, second precision
    pub modified_at: Option<DateTime<Utc>>,
}

impl DirectoryEntry {
    pub fn file(name: impl Into<String>, size_bytes: u64) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            is_directory: false,
            size_bytes,
            modified_at: None,
        }
    }

    pub fn directory(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            is_directory: true,
            size_bytes: 0,
            modified_at: None,
        }
    }

    pub fn with_modified(mut self, modified_at: Option<DateTime<Utc>>) -> Self {
        self.modified_at = modified_at;
        self
    }

    /// Size for display purposes; `None` for folders.
    pub fn file_size(&self) -> Option<u64> {
        (!self.is_directory).then_some(self.size_bytes)
    }
}

/// Entries of one directory, in the order the server returned them.
///
/// Produced fresh on every load; callers sort for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ListingResult {
    entries: Vec<DirectoryEntry>,
}

impl ListingResult {
    pub fn new(entries: Vec<DirectoryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<DirectoryEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DirectoryEntry> {
        self.entries.iter()
    }

    pub fn get(&self, name: &str) -> Option<&DirectoryEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entries sorted for display: folders first, then by name.
    pub fn display_order(&self) -> Vec<&DirectoryEntry> {
        let mut sorted: Vec<&DirectoryEntry> = self.entries.iter().collect();
        sorted.sort_by(|a, b| match (a.is_directory, b.is_directory) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        });
        sorted
    }
}

impl FromIterator<DirectoryEntry> for ListingResult {
    fn from_iter<I: IntoIterator<Item = DirectoryEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl IntoIterator for ListingResult {
    type Item = DirectoryEntry;
    type IntoIter = std::vec::IntoIter<DirectoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a ListingResult {
    type Item = &'a DirectoryEntry;
    type IntoIter = std::slice::Iter<'a, DirectoryEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
