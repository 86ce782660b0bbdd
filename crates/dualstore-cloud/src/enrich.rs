//! Concurrent metadata pass over a fresh listing.

use dualstore_core::paths::join_path;
use dualstore_core::{DirectoryEntry, StorageError};
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::dav::{ResourceInfo, ResourceInspector};
use crate::error::classify;
use crate::options::CloudOptions;

/// Turn a listed name (`"file.txt"`, `"folder/"`) into a bare entry.
pub fn bare_entry(listed: &str) -> Option<DirectoryEntry> {
    let is_directory = listed.ends_with('/');
    let name = listed.trim_end_matches('/');
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return None;
    }
    Some(if is_directory {
        DirectoryEntry::directory(name)
    } else {
        DirectoryEntry::file(name, 0)
    })
}

fn apply(entry: &mut DirectoryEntry, info: &ResourceInfo) {
    if info.is_collection {
        entry.is_directory = true;
    }
    if entry.is_directory {
        entry.size_bytes = 0;
    } else if let Some(size) = info.size() {
        entry.size_bytes = size;
    }
    entry.modified_at = info.modified();
}

/// Build entries for `listed` names under `directory` and fill in size and
/// modification time with at most `options.effective_workers()` requests
/// in flight.
///
/// Output order is listing order. A failed lookup leaves that entry with
/// unknown metadata and is only logged.
pub async fn enrich_listing(
    inspector: &dyn ResourceInspector,
    directory: &str,
    listed: &[String],
    options: &CloudOptions,
) -> Vec<DirectoryEntry> {
    let mut entries = Vec::with_capacity(listed.len());
    let mut lookups = Vec::new();
    for raw in listed {
        let Some(entry) = bare_entry(raw) else {
            debug!("Ignoring listed name {:?}", raw);
            continue;
        };
        if !entry.is_directory || options.info_directories {
            let mut remote = join_path(directory, &entry.name);
            if entry.is_directory {
                remote.push('/');
            }
            lookups.push((entries.len(), remote));
        }
        entries.push(entry);
    }

    let workers = options.effective_workers();
    let results: Vec<(usize, String, Result<ResourceInfo, _>)> = stream::iter(lookups)
        .map(|(key, remote)| async move {
            let result = inspector.info(&remote).await;
            (key, remote, result)
        })
        .buffer_unordered(workers)
        .collect()
        .await;

    for (key, remote, result) in results {
        match result {
            Ok(info) => apply(&mut entries[key], &info),
            Err(e) => {
                let cause = classify(&format!("read metadata of {}", remote), &e);
                warn!("{}", StorageError::PartialMetadata(cause.to_string()));
            }
        }
    }
    entries
}
