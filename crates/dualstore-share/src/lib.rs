//! SMB2 file-share backend for dualstore.
//!
//! The adapter sits on top of a [`ShareConnector`] that provides the SMB2
//! session layer:
//! - `smb2`: [`Smb2Connector`], the native client (NTLMv2, signing)
//! - `records`: FILE_DIRECTORY_INFORMATION parsing and entry filtering
//! - `status`: NTSTATUS codes and their classification
//! - `backend`: [`ShareBackend`] / [`ShareConnection`], chunked transfers

mod backend;
mod error;
pub mod records;
mod smb2;
mod status;
mod transport;

#[cfg(test)]
mod fake;

pub use backend::{ShareBackend, ShareConnection, DOWNLOAD_CHUNK_SIZE, UPLOAD_CHUNK_SIZE};
pub use error::ShareError;
pub use smb2::{Smb2Connector, Smb2Session, DEFAULT_REQUEST_TIMEOUT};
pub use status::NtStatus;
pub use transport::{
    wire_path, CreateDisposition, FileId, OpenOptions, ShareConnector, ShareSession, ShareTarget,
    DEFAULT_SHARE_PORT, FILE_ATTRIBUTE_DIRECTORY, FILE_ATTRIBUTE_NORMAL, FILE_LIST_DIRECTORY,
    FILE_SHARE_READ, GENERIC_READ_ACCESS, GENERIC_WRITE_ACCESS,
};
