//! WebDAV backend for dualstore, targeting ownCloud/Nextcloud document roots.
//!
//! - `dav`: the HTTP client (PROPFIND, GET, PUT, MKCOL, DELETE, OCS queries,
//!   recursive mirroring)
//! - `multistatus`: `207` body parsing
//! - `enrich`: bounded concurrent metadata lookups for a listing
//! - `backend`: [`CloudBackend`] / [`CloudConnection`]

mod backend;
pub mod dav;
mod enrich;
mod error;
pub mod multistatus;
mod options;

pub use backend::{CloudBackend, CloudConnection};
pub use dav::{dav_base_url, DavClient, MirrorStats, Quota, ResourceInfo, ResourceInspector};
pub use enrich::{bare_entry, enrich_listing};
pub use error::{classify, DavError};
pub use options::{
    CloudOptions, DEFAULT_INFO_WORKERS, DEFAULT_REQUEST_TIMEOUT, INFO_DIRECTORIES_ENV,
    INFO_WORKERS_ENV, MAX_INFO_WORKERS,
};
