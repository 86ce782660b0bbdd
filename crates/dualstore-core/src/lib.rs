//! Core traits and types for dualstore storage backends.
//!
//! This crate defines the abstractions shared between the share and cloud adapters:
//! - `StorageBackend`: connect a `SessionDescriptor` to a live `ConnectionHandle`
//! - `Connection`: list, drill down, download and upload over one handle
//! - `DirectoryEntry` / `ListingResult`: the normalized entry model
//! - `normalize`: timestamp and size conversion shared by both adapters
//! - `paths`: slash-separated relative path handling

mod backend;
mod entry;
mod error;
pub mod normalize;
pub mod paths;
mod session;

pub use backend::{Connection, ConnectionHandle, StorageBackend};
pub use entry::{DirectoryEntry, ListingResult};
pub use error::{ErrorKind, StorageError};
pub use session::{SessionDescriptor, StorageMode};
