use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Storage flavours a session can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", from = "String")]
pub enum StorageMode {
    /// Block-level file share (SMB2)
    #[default]
    Share,
    /// WebDAV document collections
    Cloud,
}

impl StorageMode {
    /// Parse a user-facing mode label. Unknown and empty labels fall back to
    /// [`StorageMode::Share`].
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "cloud" | "dav" | "webdav" => StorageMode::Cloud,
            _ => StorageMode::Share,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageMode::Share => "share",
            StorageMode::Cloud => "cloud",
        }
    }
}

impl From<String> for StorageMode {
    fn from(label: String) -> Self {
        Self::from_label(&label)
    }
}

impl fmt::Display for StorageMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a backend needs to open one directory.
///
/// Supplied by the caller before each load; the core never persists it.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    #[serde(rename = "storage", default)]
    pub storage_mode: StorageMode,
    /// Share: server host. Cloud: base URL.
    #[serde(default)]
    pub endpoint: String,
    /// Share name (share mode only)
    #[serde(default)]
    pub share_name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Directory to open, relative to the share or document root
    #[serde(default)]
    pub current_path: String,
}

impl SessionDescriptor {
    pub fn share(
        server: impl Into<String>,
        share_name: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            storage_mode: StorageMode::Share,
            endpoint: server.into(),
            share_name: share_name.into(),
            username: username.into(),
            password: password.into(),
            current_path: String::new(),
        }
    }

    pub fn cloud(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            storage_mode: StorageMode::Cloud,
            endpoint: base_url.into(),
            share_name: String::new(),
            username: username.into(),
            password: password.into(),
            current_path: String::new(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.current_path = path.into();
        self
    }

    /// Check the descriptor carries enough to attempt a connection.
    ///
    /// Credentials are always required; share mode also needs a server and
    /// a share name.
    pub fn validate(&self) -> Result<(), StorageError> {
        if self.username.trim().is_empty() || self.password.trim().is_empty() {
            return Err(StorageError::NotConnected(
                "username and password are required".to_string(),
            ));
        }
        if self.storage_mode == StorageMode::Share
            && (self.endpoint.trim().is_empty() || self.share_name.trim().is_empty())
        {
            return Err(StorageError::NotConnected(
                "server and share name are required".to_string(),
            ));
        }
        Ok(())
    }

    /// Human-readable location: `\\server\share` or the base URL.
    pub fn location(&self) -> String {
        match self.storage_mode {
            StorageMode::Share => {
                let server = self.endpoint.trim().trim_start_matches('\\');
                let share = self.share_name.trim().trim_matches(|c| c == '\\' || c == '/');
                format!(r"\\{}\{}", server, share)
                    .trim_end_matches('\\')
                    .to_string()
            }
            StorageMode::Cloud => self.endpoint.clone(),
        }
    }
}

impl fmt::Debug for SessionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDescriptor")
            .field("storage_mode", &self.storage_mode)
            .field("endpoint", &self.endpoint)
            .field("share_name", &self.share_name)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("current_path", &self.current_path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_labels() {
        assert_eq!(StorageMode::from_label("Cloud"), StorageMode::Cloud);
        assert_eq!(StorageMode::from_label(" webdav "), StorageMode::Cloud);
        assert_eq!(StorageMode::from_label("local nas drive"), StorageMode::Share);
        assert_eq!(StorageMode::from_label("smb"), StorageMode::Share);
        assert_eq!(StorageMode::from_label(""), StorageMode::Share);
        assert_eq!(StorageMode::from_label("ftp"), StorageMode::Share);
    }

    #[test]
    fn test_validate() {
        let ok = SessionDescriptor::share("nas", "media", "bob", "pw");
        assert!(ok.validate().is_ok());

        let no_share = SessionDescriptor::share("nas", "", "bob", "pw");
        assert!(matches!(no_share.validate(), Err(StorageError::NotConnected(_))));

        let no_password = SessionDescriptor::cloud("https://cloud.example.com", "bob", " ");
        assert!(matches!(no_password.validate(), Err(StorageError::NotConnected(_))));

        // cloud mode does not need a share name
        let cloud = SessionDescriptor::cloud("https://cloud.example.com", "bob", "pw");
        assert!(cloud.validate().is_ok());
    }

    #[test]
    fn test_debug_redacts_password() {
        let d = SessionDescriptor::cloud("https://cloud.example.com", "bob", "hunter2");
        let rendered = format!("{:?}", d);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_descriptor() {
        let d: SessionDescriptor = serde_json::from_str(
            r#"{"storage": "nas", "endpoint": "10.0.0.2", "share_name": "data",
                "username": "u", "password": "p"}"#,
        )
        .unwrap();
        assert_eq!(d.storage_mode, StorageMode::Share);
        assert_eq!(d.current_path, "");

        let d: SessionDescriptor =
            serde_json::from_str(r#"{"storage": "cloud", "endpoint": "https://h"}"#).unwrap();
        assert_eq!(d.storage_mode, StorageMode::Cloud);
    }

    #[test]
    fn test_location() {
        let d = SessionDescriptor::share("nas", "media", "u", "p");
        assert_eq!(d.location(), r"\\nas\media");
        let d = SessionDescriptor::cloud("https://cloud.example.com", "u", "p");
        assert_eq!(d.location(), "https://cloud.example.com");
    }
}
