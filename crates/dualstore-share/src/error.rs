use dualstore_core::StorageError;

use crate::status::NtStatus;

/// Failures reported by a [`ShareSession`](crate::ShareSession) or
/// [`ShareConnector`](crate::ShareConnector).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ShareError {
    /// The server answered with a non-success NTSTATUS.
    #[error("{0}")]
    Status(NtStatus),

    /// Socket, DNS or framing failure.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out: {0}")]
    Timeout(String),

    /// The server's reply could not be understood.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ShareError {
    pub fn status(&self) -> Option<NtStatus> {
        match self {
            ShareError::Status(s) => Some(*s),
            _ => None,
        }
    }

    pub fn is_status(&self, status: NtStatus) -> bool {
        self.status() == Some(status)
    }
}

impl From<NtStatus> for ShareError {
    fn from(status: NtStatus) -> Self {
        ShareError::Status(status)
    }
}

/// Where in a session's life a failure happened. Access denied while
/// establishing the session means bad credentials; later it means missing
/// permissions on one object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connect,
    Operation,
}

pub(crate) fn classify(err: ShareError, phase: Phase, action: &str) -> StorageError {
    match err {
        ShareError::Status(status) => {
            if status.is_credential_failure()
                || (phase == Phase::Connect && status == NtStatus::ACCESS_DENIED)
            {
                StorageError::Authentication(format!(
                    "{} was rejected ({}). Check the username and password for this share.",
                    action, status
                ))
            } else if status == NtStatus::ACCESS_DENIED {
                StorageError::Authorization(format!("{}: {}", action, status))
            } else if status.is_not_found() {
                StorageError::NotFound(format!("{}: {}", action, status))
            } else {
                StorageError::Connectivity(format!("{}: {}", action, status))
            }
        }
        ShareError::Transport(msg) | ShareError::Timeout(msg) | ShareError::Protocol(msg) => {
            StorageError::Connectivity(format!("{}: {}", action, msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_denied_depends_on_phase() {
        let err = classify(NtStatus::ACCESS_DENIED.into(), Phase::Connect, "connect");
        assert!(matches!(err, StorageError::Authentication(_)));

        let err = classify(NtStatus::ACCESS_DENIED.into(), Phase::Operation, "open a.txt");
        assert!(matches!(err, StorageError::Authorization(_)));
    }

    #[test]
    fn test_status_mapping() {
        let err = classify(NtStatus::LOGON_FAILURE.into(), Phase::Operation, "connect");
        assert!(matches!(err, StorageError::Authentication(_)));

        let err = classify(NtStatus::OBJECT_PATH_NOT_FOUND.into(), Phase::Connect, "open");
        assert!(matches!(err, StorageError::NotFound(_)));
        assert!(err.message().contains("STATUS_OBJECT_PATH_NOT_FOUND"));

        let err = classify(NtStatus::IO_TIMEOUT.into(), Phase::Operation, "read");
        assert!(matches!(err, StorageError::Connectivity(_)));

        let err = classify(
            ShareError::Transport("connection refused".into()),
            Phase::Connect,
            "connect",
        );
        assert!(matches!(err, StorageError::Connectivity(_)));
    }
}
