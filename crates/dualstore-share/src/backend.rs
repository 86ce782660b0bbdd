//! Share storage backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dualstore_core::paths::{join_path, local_base_name, normalize_path};
use dualstore_core::{
    Connection, ConnectionHandle, DirectoryEntry, ListingResult, SessionDescriptor, StorageBackend,
    StorageError, StorageMode,
};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::{classify, Phase};
use crate::records::collect_entries;
use crate::status::NtStatus;
use crate::transport::{
    wire_path, FileId, OpenOptions, ShareConnector, ShareSession, ShareTarget, DEFAULT_SHARE_PORT,
};

/// Size of each READ request during downloads.
pub const DOWNLOAD_CHUNK_SIZE: u32 = 1024 * 1024;
/// Largest single WRITE request during uploads.
pub const UPLOAD_CHUNK_SIZE: usize = 1024 * 1024;

const ENUMERATE_ALL: &str = "*";

/// Share storage backend.
///
/// Stateless: each `connect` establishes a fresh session through the
/// configured connector.
pub struct ShareBackend {
    connector: Arc<dyn ShareConnector>,
    port: u16,
}

impl ShareBackend {
    pub fn new(connector: Arc<dyn ShareConnector>) -> Self {
        Self {
            connector,
            port: DEFAULT_SHARE_PORT,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }
}

#[async_trait]
impl StorageBackend for ShareBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::Share
    }

    #[instrument(skip(self, descriptor), fields(location = %descriptor.location()), level = "debug")]
    async fn connect(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<ConnectionHandle, StorageError> {
        descriptor.validate()?;
        let target = ShareTarget::from_descriptor(descriptor, self.port);
        let unc = target.unc();

        let session = self
            .connector
            .connect(&target)
            .await
            .map_err(|e| classify(e, Phase::Connect, &format!("Connecting to {}", unc)))?;

        let path = normalize_path(&descriptor.current_path);
        let connection = ShareConnection::open(session, unc, path, Phase::Connect).await?;
        info!("Connected to {} at '{}'", connection.unc, connection.path);
        Ok(Arc::new(connection))
    }
}

/// A directory on a tree-connected share.
///
/// No handle is held between calls: each listing opens the directory,
/// enumerates it and closes it again.
pub struct ShareConnection {
    session: Arc<dyn ShareSession>,
    unc: String,
    path: String,
}

impl ShareConnection {
    /// Checks that `path` is an openable directory before handing out a
    /// connection for it.
    async fn open(
        session: Arc<dyn ShareSession>,
        unc: String,
        path: String,
        phase: Phase,
    ) -> Result<Self, StorageError> {
        let connection = Self { session, unc, path };
        let directory = connection.open_directory(phase).await?;
        connection.close_quietly(directory).await;
        Ok(connection)
    }

    async fn open_directory(&self, phase: Phase) -> Result<FileId, StorageError> {
        self.session
            .create(&wire_path(&self.path), &OpenOptions::list_directory())
            .await
            .map_err(|e| classify(e, phase, &format!("Opening directory '{}'", self.path)))
    }

    async fn enumerate(&self, directory: FileId) -> Result<Vec<DirectoryEntry>, StorageError> {
        let mut entries = Vec::new();
        let mut restart = true;
        loop {
            let buf = match self
                .session
                .query_directory(directory, ENUMERATE_ALL, restart)
                .await
            {
                Ok(buf) => buf,
                Err(e) if e.is_status(NtStatus::NO_MORE_FILES) => break,
                Err(e) => {
                    return Err(classify(
                        e,
                        Phase::Operation,
                        &format!("Listing '{}'", self.path),
                    ))
                }
            };
            if buf.is_empty() {
                break;
            }
            collect_entries(&buf, &mut entries);
            restart = false;
        }
        Ok(entries)
    }

    /// Close failures are logged, never returned.
    async fn close_quietly(&self, file: FileId) {
        if let Err(e) = self.session.close(file).await {
            warn!("Failed to close handle on {}: {}", self.unc, e);
        }
    }

    async fn read_to_file(
        &self,
        file: FileId,
        remote: &str,
        local_path: &Path,
    ) -> Result<u64, StorageError> {
        let mut out = tokio::fs::File::create(local_path).await?;
        let mut offset: u64 = 0;
        loop {
            let chunk = match self.session.read(file, offset, DOWNLOAD_CHUNK_SIZE).await {
                Ok(chunk) => chunk,
                Err(e) if e.is_status(NtStatus::END_OF_FILE) => break,
                Err(e) => {
                    return Err(classify(
                        e,
                        Phase::Operation,
                        &format!("Reading '{}' at offset {}", remote, offset),
                    ))
                }
            };
            if chunk.is_empty() {
                break;
            }
            out.write_all(&chunk).await?;
            offset += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(offset)
    }

    async fn write_from_buffer(
        &self,
        file: FileId,
        remote: &str,
        data: &[u8],
    ) -> Result<(), StorageError> {
        let mut offset = 0usize;
        while offset < data.len() {
            let end = (offset + UPLOAD_CHUNK_SIZE).min(data.len());
            let written = self
                .session
                .write(file, offset as u64, &data[offset..end])
                .await
                .map_err(|e| {
                    classify(
                        e,
                        Phase::Operation,
                        &format!("Writing '{}' at offset {}", remote, offset),
                    )
                })?;
            if written == 0 {
                return Err(StorageError::Connectivity(format!(
                    "Server accepted no bytes writing '{}' at offset {}",
                    remote, offset
                )));
            }
            offset += written as usize;
        }
        Ok(())
    }
}

#[async_trait]
impl Connection for ShareConnection {
    fn path(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self), fields(unc = %self.unc, path = %self.path), level = "debug")]
    async fn list(&self) -> Result<ListingResult, StorageError> {
        let directory = self.open_directory(Phase::Operation).await?;
        let result = self.enumerate(directory).await;
        self.close_quietly(directory).await;

        let entries = result?;
        debug!("Listed {} entries", entries.len());
        Ok(ListingResult::new(entries))
    }

    #[instrument(skip(self), fields(unc = %self.unc), level = "debug")]
    async fn open_path(&self, path: &str) -> Result<ConnectionHandle, StorageError> {
        let connection = ShareConnection::open(
            Arc::clone(&self.session),
            self.unc.clone(),
            normalize_path(path),
            Phase::Operation,
        )
        .await?;
        Ok(Arc::new(connection))
    }

    #[instrument(skip(self), fields(unc = %self.unc), level = "debug")]
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, StorageError> {
        let remote = normalize_path(remote_path);
        if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let file = self
            .session
            .create(&wire_path(&remote), &OpenOptions::read_file())
            .await
            .map_err(|e| classify(e, Phase::Operation, &format!("Opening '{}'", remote)))?;

        let result = self.read_to_file(file, &remote, local_path).await;
        self.close_quietly(file).await;

        let bytes = result?;
        info!("Downloaded '{}' ({} bytes) to {}", remote, bytes, local_path.display());
        Ok(bytes)
    }

    #[instrument(skip(self), fields(unc = %self.unc), level = "debug")]
    async fn upload(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_base_name(local_path).ok_or_else(|| {
            StorageError::Io(format!("{} has no file name", local_path.display()))
        })?;
        let data = tokio::fs::read(local_path).await?;
        let remote = join_path("", &name);

        let file = self
            .session
            .create(&wire_path(&remote), &OpenOptions::overwrite_file())
            .await
            .map_err(|e| classify(e, Phase::Operation, &format!("Creating '{}'", remote)))?;

        let result = self.write_from_buffer(file, &remote, &data).await;
        self.close_quietly(file).await;
        result?;

        info!("Uploaded {} ({} bytes) to '{}'", local_path.display(), data.len(), remote);
        Ok(remote)
    }
}
