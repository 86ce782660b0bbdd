use std::fmt;

/// Coarse classification of a [`StorageError`], handed to the presentation
/// layer alongside the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Authentication,
    Authorization,
    NotFound,
    Connectivity,
    NotConnected,
    PartialMetadata,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorKind::Authentication => "authentication",
            ErrorKind::Authorization => "authorization",
            ErrorKind::NotFound => "not found",
            ErrorKind::Connectivity => "connectivity",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::PartialMetadata => "partial metadata",
            ErrorKind::Io => "local i/o",
        };
        f.write_str(label)
    }
}

/// Errors surfaced by storage backends.
///
/// Adapters translate protocol and library failures into one of these at
/// their boundary; callers above the adapters forward them untouched.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Access denied: {0}")]
    Authorization(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Connection error: {0}")]
    Connectivity(String),

    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Non-fatal: an entry's metadata could not be fetched. Logged, never
    /// returned from a listing.
    #[error("Metadata unavailable: {0}")]
    PartialMetadata(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::Authentication(_) => ErrorKind::Authentication,
            StorageError::Authorization(_) => ErrorKind::Authorization,
            StorageError::NotFound(_) => ErrorKind::NotFound,
            StorageError::Connectivity(_) => ErrorKind::Connectivity,
            StorageError::NotConnected(_) => ErrorKind::NotConnected,
            StorageError::PartialMetadata(_) => ErrorKind::PartialMetadata,
            StorageError::Io(_) => ErrorKind::Io,
        }
    }

    /// The message without the kind prefix added by `Display`.
    pub fn message(&self) -> &str {
        match self {
            StorageError::Authentication(m)
            | StorageError::Authorization(m)
            | StorageError::NotFound(m)
            | StorageError::Connectivity(m)
            | StorageError::NotConnected(m)
            | StorageError::PartialMetadata(m)
            | StorageError::Io(m) => m,
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
