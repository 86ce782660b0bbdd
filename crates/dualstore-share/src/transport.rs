//! The SMB2 session layer the adapter drives.
//!
//! A connector performs negotiate, session setup and tree connect; the
//! resulting session exposes the handful of requests the adapter needs.
//! Paths handed to a session are share-relative and backslash-separated.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dualstore_core::SessionDescriptor;

use crate::error::ShareError;

pub const DEFAULT_SHARE_PORT: u16 = 445;

// Access masks
pub const FILE_LIST_DIRECTORY: u32 = 0x0000_0001;
/// FILE_READ_DATA | FILE_READ_EA | FILE_READ_ATTRIBUTES | READ_CONTROL | SYNCHRONIZE
pub const GENERIC_READ_ACCESS: u32 = 0x0012_0089;
/// Read plus FILE_WRITE_DATA | FILE_APPEND_DATA | FILE_WRITE_EA | FILE_WRITE_ATTRIBUTES
pub const GENERIC_WRITE_ACCESS: u32 = 0x0012_019F;

pub const FILE_SHARE_READ: u32 = 0x0000_0001;

pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x0000_0010;
pub const FILE_ATTRIBUTE_NORMAL: u32 = 0x0000_0080;

/// SMB2 file identifier returned by CREATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub persistent: u64,
    pub volatile: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateDisposition {
    /// FILE_OPEN: fail if the object does not exist
    Open,
    /// FILE_OVERWRITE_IF: create, or truncate an existing file
    OverwriteIf,
}

impl CreateDisposition {
    pub fn wire_value(&self) -> u32 {
        match self {
            CreateDisposition::Open => 0x0000_0001,
            CreateDisposition::OverwriteIf => 0x0000_0005,
        }
    }
}

/// Parameters of an SMB2 CREATE request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenOptions {
    pub desired_access: u32,
    pub share_access: u32,
    pub disposition: CreateDisposition,
    /// FILE_DIRECTORY_FILE when true, FILE_NON_DIRECTORY_FILE otherwise
    pub directory: bool,
    pub file_attributes: u32,
}

impl OpenOptions {
    pub fn list_directory() -> Self {
        Self {
            desired_access: FILE_LIST_DIRECTORY,
            share_access: FILE_SHARE_READ,
            disposition: CreateDisposition::Open,
            directory: true,
            file_attributes: FILE_ATTRIBUTE_DIRECTORY,
        }
    }

    pub fn read_file() -> Self {
        Self {
            desired_access: GENERIC_READ_ACCESS,
            share_access: FILE_SHARE_READ,
            disposition: CreateDisposition::Open,
            directory: false,
            file_attributes: FILE_ATTRIBUTE_NORMAL,
        }
    }

    pub fn overwrite_file() -> Self {
        Self {
            desired_access: GENERIC_WRITE_ACCESS,
            share_access: FILE_SHARE_READ,
            disposition: CreateDisposition::OverwriteIf,
            directory: false,
            file_attributes: FILE_ATTRIBUTE_NORMAL,
        }
    }
}

/// Where and as whom to connect.
#[derive(Clone, PartialEq, Eq)]
pub struct ShareTarget {
    pub server: String,
    pub port: u16,
    pub share: String,
    pub username: String,
    pub password: String,
}

impl ShareTarget {
    pub fn from_descriptor(descriptor: &SessionDescriptor, port: u16) -> Self {
        Self {
            server: descriptor
                .endpoint
                .trim()
                .trim_start_matches('\\')
                .to_string(),
            port,
            share: descriptor
                .share_name
                .trim()
                .trim_matches(|c| c == '\\' || c == '/')
                .to_string(),
            username: descriptor.username.clone(),
            password: descriptor.password.clone(),
        }
    }

    /// `\\server\share`, the tree-connect path.
    pub fn unc(&self) -> String {
        format!(r"\\{}\{}", self.server, self.share)
    }
}

impl fmt::Debug for ShareTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShareTarget")
            .field("server", &self.server)
            .field("port", &self.port)
            .field("share", &self.share)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Establishes authenticated, tree-connected sessions.
#[async_trait]
pub trait ShareConnector: Send + Sync {
    async fn connect(&self, target: &ShareTarget) -> Result<Arc<dyn ShareSession>, ShareError>;
}

/// One tree-connected SMB2 session.
#[async_trait]
pub trait ShareSession: Send + Sync {
    /// SMB2 CREATE.
    async fn create(&self, path: &str, options: &OpenOptions) -> Result<FileId, ShareError>;

    /// One SMB2 QUERY_DIRECTORY round trip with the
    /// FileDirectoryInformation class. Returns the raw output buffer;
    /// `STATUS_NO_MORE_FILES` ends the enumeration.
    async fn query_directory(
        &self,
        directory: FileId,
        pattern: &str,
        restart_scan: bool,
    ) -> Result<Bytes, ShareError>;

    /// SMB2 READ at an explicit offset.
    async fn read(&self, file: FileId, offset: u64, length: u32) -> Result<Bytes, ShareError>;

    /// SMB2 WRITE at an explicit offset, returning the bytes accepted.
    async fn write(&self, file: FileId, offset: u64, data: &[u8]) -> Result<u32, ShareError>;

    async fn close(&self, file: FileId) -> Result<(), ShareError>;
}

/// Share-relative wire path: backslash separated, no leading separator.
pub fn wire_path(path: &str) -> String {
    dualstore_core::paths::normalize_path(path).replace('/', "\\")
}
