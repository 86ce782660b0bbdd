use dualstore_core::StorageError;

/// Raw failures from the WebDAV client, before classification.
///
/// `Display` is the text classification matches on, so status failures
/// always render as `code NNN`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DavError {
    #[error("{method} {url} failed with code {status} {reason}")]
    Status {
        method: String,
        url: String,
        status: u16,
        reason: String,
    },

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("invalid multistatus body: {0}")]
    Xml(String),

    #[error("invalid base URL {0}")]
    InvalidUrl(String),

    #[error("local file error: {0}")]
    Io(String),
}

impl DavError {
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        DavError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            DavError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DavError {
    fn from(err: std::io::Error) -> Self {
        DavError::Io(err.to_string())
    }
}

const AUTHENTICATION_MARKERS: &[&str] = &[" 401", "code 401", "notauthenticated", "unauthorized"];
const AUTHORIZATION_MARKERS: &[&str] = &[" 403", "code 403", "forbidden"];
const NOT_FOUND_MARKERS: &[&str] = &[" 404", "code 404", "not found"];

/// Map a failure's text onto the storage taxonomy.
///
/// Matching is on the lowercased message so the same rules apply to
/// status lines, server bodies and library errors.
pub fn classify(action: &str, err: &DavError) -> StorageError {
    if let DavError::Io(msg) = err {
        return StorageError::Io(msg.clone());
    }
    let raw = err.to_string();
    let lower = raw.to_lowercase();
    let matches = |markers: &[&str]| markers.iter().any(|m| lower.contains(m));

    if matches(AUTHENTICATION_MARKERS) {
        StorageError::Authentication(format!(
            "server answered 401 while trying to {}. Please verify your username, password, and server URL.",
            action
        ))
    } else if matches(AUTHORIZATION_MARKERS) {
        StorageError::Authorization(format!(
            "server answered 403 while trying to {}. Check your permissions.",
            action
        ))
    } else if matches(NOT_FOUND_MARKERS) {
        StorageError::NotFound(format!("server answered 404 while trying to {}", action))
    } else {
        StorageError::Connectivity(format!("WebDAV error during {}: {}", action, raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dualstore_core::ErrorKind;

    fn status(code: u16, reason: &str) -> DavError {
        DavError::Status {
            method: "PROPFIND".into(),
            url: "https://cloud.example.com/remote.php/dav/files/alice/".into(),
            status: code,
            reason: reason.into(),
        }
    }

    #[test]
    fn test_status_classification() {
        let err = classify("list directory", &status(401, "Unauthorized"));
        assert_eq!(err.kind(), ErrorKind::Authentication);
        assert!(err.message().contains("verify your username"));

        assert_eq!(
            classify("list directory", &status(403, "Forbidden")).kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            classify("list directory", &status(404, "Not Found")).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            classify("list directory", &status(500, "Internal Server Error")).kind(),
            ErrorKind::Connectivity
        );
    }

    #[test]
    fn test_text_classification() {
        let err = DavError::Transport {
            url: "https://h/".into(),
            message: "Sabre\\DAV\\Exception\\NotAuthenticated".into(),
        };
        assert_eq!(classify("list", &err).kind(), ErrorKind::Authentication);

        let err = DavError::Transport {
            url: "https://h/".into(),
            message: "operation timed out".into(),
        };
        let classified = classify("list", &err);
        assert_eq!(classified.kind(), ErrorKind::Connectivity);
        assert!(classified.message().contains("timed out"));

        let err = DavError::Io("disk full".into());
        assert_eq!(classify("download", &err).kind(), ErrorKind::Io);
    }
}
