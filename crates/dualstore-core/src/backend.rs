use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::ListingResult;
use crate::error::StorageError;
use crate::session::{SessionDescriptor, StorageMode};

/// A live connection to one directory of a backend.
///
/// The handle carries its own backend, so callers never need a lookup
/// table to route follow-up calls.
pub type ConnectionHandle = Arc<dyn Connection>;

/// Backend trait: turn a session descriptor into a live connection.
///
/// Implementations are stateless factories; all session state lives in the
/// returned handle.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Storage flavour served by this backend.
    fn mode(&self) -> StorageMode;

    /// Open a session and position it on `descriptor.current_path`.
    async fn connect(&self, descriptor: &SessionDescriptor)
        -> Result<ConnectionHandle, StorageError>;
}

/// Operations over an already-connected directory.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Normalized path of the directory this handle points at (`""` is root).
    fn path(&self) -> &str;

    /// List the directory one level deep.
    async fn list(&self) -> Result<ListingResult, StorageError>;

    /// Reposition onto another directory of the same session without a full
    /// reconnect.
    async fn open_path(&self, path: &str) -> Result<ConnectionHandle, StorageError>;

    /// Download a single file to `local_path`, returning the bytes written.
    ///
    /// `remote_path` is relative to the session root.
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, StorageError>;

    /// Upload a local file to the storage root under its base name,
    /// returning the remote path it was written to.
    async fn upload(&self, local_path: &Path) -> Result<String, StorageError>;
}
