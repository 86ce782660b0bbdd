//! Cloud storage backend.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dualstore_core::paths::{local_base_name, normalize_path};
use dualstore_core::{
    Connection, ConnectionHandle, ListingResult, SessionDescriptor, StorageBackend, StorageError,
    StorageMode,
};
use tracing::{info, instrument};

use crate::dav::DavClient;
use crate::enrich::enrich_listing;
use crate::error::classify;
use crate::options::CloudOptions;

/// WebDAV storage backend.
pub struct CloudBackend {
    options: CloudOptions,
}

impl CloudBackend {
    pub fn new(options: CloudOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &CloudOptions {
        &self.options
    }
}

impl Default for CloudBackend {
    fn default() -> Self {
        Self::new(CloudOptions::default())
    }
}

#[async_trait]
impl StorageBackend for CloudBackend {
    fn mode(&self) -> StorageMode {
        StorageMode::Cloud
    }

    /// Builds the client only; the first request happens on `list`.
    #[instrument(skip(self, descriptor), fields(endpoint = %descriptor.endpoint), level = "debug")]
    async fn connect(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<ConnectionHandle, StorageError> {
        descriptor.validate()?;
        let client = DavClient::new(
            &descriptor.endpoint,
            &descriptor.username,
            &descriptor.password,
            &self.options,
        )
        .map_err(|e| classify("connect", &e))?;
        let connection = CloudConnection {
            client: Arc::new(client),
            path: normalize_path(&descriptor.current_path),
            options: self.options.clone(),
        };
        info!("Using WebDAV root {}", connection.client.base_url());
        Ok(Arc::new(connection))
    }
}

/// A WebDAV client positioned on one collection.
pub struct CloudConnection {
    client: Arc<DavClient>,
    path: String,
    options: CloudOptions,
}

impl CloudConnection {
    pub fn client(&self) -> &DavClient {
        &self.client
    }
}

#[async_trait]
impl Connection for CloudConnection {
    fn path(&self) -> &str {
        &self.path
    }

    #[instrument(skip(self), fields(path = %self.path), level = "debug")]
    async fn list(&self) -> Result<ListingResult, StorageError> {
        let names = self
            .client
            .list(&self.path)
            .await
            .map_err(|e| classify("list directory", &e))?;
        let entries = enrich_listing(self.client.as_ref(), &self.path, &names, &self.options).await;
        Ok(ListingResult::new(entries))
    }

    async fn open_path(&self, path: &str) -> Result<ConnectionHandle, StorageError> {
        Ok(Arc::new(CloudConnection {
            client: Arc::clone(&self.client),
            path: normalize_path(path),
            options: self.options.clone(),
        }))
    }

    #[instrument(skip(self), level = "debug")]
    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, StorageError> {
        let remote = normalize_path(remote_path);
        let bytes = self
            .client
            .download(&remote, local_path)
            .await
            .map_err(|e| classify(&format!("download {}", remote), &e))?;
        info!("Downloaded '{}' ({} bytes) to {}", remote, bytes, local_path.display());
        Ok(bytes)
    }

    #[instrument(skip(self), level = "debug")]
    async fn upload(&self, local_path: &Path) -> Result<String, StorageError> {
        let remote = local_base_name(local_path).ok_or_else(|| {
            StorageError::Io(format!("{} has no file name", local_path.display()))
        })?;
        self.client
            .upload(local_path, &remote)
            .await
            .map_err(|e| classify(&format!("upload {}", remote), &e))?;
        info!("Uploaded {} to '{}'", local_path.display(), remote);
        Ok(remote)
    }
}
