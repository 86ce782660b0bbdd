//! In-memory backend for exercising the controller and orchestrator
//! without a server.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dualstore_core::paths::{local_base_name, normalize_path};
use dualstore_core::{
    Connection, ConnectionHandle, DirectoryEntry, ListingResult, SessionDescriptor,
    StorageBackend, StorageError, StorageMode,
};
use tokio::sync::Semaphore;

/// How a [`MockBackend`] responds.
#[derive(Debug, Clone, Default)]
pub struct MockBehavior {
    gated: bool,
    panic_on_list: bool,
    fail_connect: Option<StorageError>,
    fail_list: Option<StorageError>,
    missing: Vec<String>,
    listings: HashMap<String, Vec<DirectoryEntry>>,
}

impl MockBehavior {
    /// Every `list` waits for a [`MockBackend::release`].
    pub fn gated(mut self) -> Self {
        self.gated = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_list = true;
        self
    }

    pub fn fail_connect(mut self, err: StorageError) -> Self {
        self.fail_connect = Some(err);
        self
    }

    pub fn fail_list(mut self, err: StorageError) -> Self {
        self.fail_list = Some(err);
        self
    }

    /// Listing this path fails with `NotFound`.
    pub fn missing(mut self, path: &str) -> Self {
        self.missing.push(normalize_path(path));
        self
    }

    pub fn with_listing(mut self, path: &str, entries: Vec<DirectoryEntry>) -> Self {
        self.listings.insert(normalize_path(path), entries);
        self
    }
}

struct MockState {
    behavior: Mutex<MockBehavior>,
    gate: Semaphore,
    connects: AtomicUsize,
    lists: AtomicUsize,
    listed_paths: Mutex<Vec<String>>,
    uploads: Mutex<Vec<PathBuf>>,
}

impl MockState {
    fn behavior(&self) -> MutexGuard<'_, MockBehavior> {
        self.behavior.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct MockBackend {
    mode: StorageMode,
    state: Arc<MockState>,
}

impl MockBackend {
    pub fn new(behavior: MockBehavior) -> Self {
        Self::with_mode(StorageMode::Share, behavior)
    }

    pub fn with_mode(mode: StorageMode, behavior: MockBehavior) -> Self {
        Self {
            mode,
            state: Arc::new(MockState {
                behavior: Mutex::new(behavior),
                gate: Semaphore::new(0),
                connects: AtomicUsize::new(0),
                lists: AtomicUsize::new(0),
                listed_paths: Mutex::new(Vec::new()),
                uploads: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Let one gated `list` proceed.
    pub fn release(&self) {
        self.state.gate.add_permits(1);
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        *self.state.behavior() = behavior;
    }

    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.state.lists.load(Ordering::SeqCst)
    }

    pub fn listed_paths(&self) -> Vec<String> {
        self.state
            .listed_paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn uploads(&self) -> Vec<PathBuf> {
        self.state
            .uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn mode(&self) -> StorageMode {
        self.mode
    }

    async fn connect(
        &self,
        descriptor: &SessionDescriptor,
    ) -> Result<ConnectionHandle, StorageError> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.state.behavior().fail_connect.clone() {
            return Err(err);
        }
        Ok(Arc::new(MockConnection {
            state: Arc::clone(&self.state),
            path: normalize_path(&descriptor.current_path),
        }))
    }
}

struct MockConnection {
    state: Arc<MockState>,
    path: String,
}

#[async_trait]
impl Connection for MockConnection {
    fn path(&self) -> &str {
        &self.path
    }

    async fn list(&self) -> Result<ListingResult, StorageError> {
        let gated = self.state.behavior().gated;
        if gated {
            if let Ok(permit) = self.state.gate.acquire().await {
                permit.forget();
            }
        }
        self.state.lists.fetch_add(1, Ordering::SeqCst);
        self.state
            .listed_paths
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(self.path.clone());

        let behavior = self.state.behavior().clone();
        if behavior.panic_on_list {
            panic!("mock listing of '{}' panicked", self.path);
        }
        if let Some(err) = behavior.fail_list {
            return Err(err);
        }
        if behavior.missing.contains(&self.path) {
            return Err(StorageError::NotFound(self.path.clone()));
        }
        Ok(behavior
            .listings
            .get(&self.path)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect())
    }

    async fn open_path(&self, path: &str) -> Result<ConnectionHandle, StorageError> {
        Ok(Arc::new(MockConnection {
            state: Arc::clone(&self.state),
            path: normalize_path(path),
        }))
    }

    async fn download(&self, remote_path: &str, local_path: &Path) -> Result<u64, StorageError> {
        let body = format!("contents of {}", normalize_path(remote_path));
        tokio::fs::write(local_path, body.as_bytes()).await?;
        Ok(body.len() as u64)
    }

    async fn upload(&self, local_path: &Path) -> Result<String, StorageError> {
        let name = local_base_name(local_path)
            .ok_or_else(|| StorageError::Io(format!("{} has no file name", local_path.display())))?;
        self.state
            .uploads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(local_path.to_path_buf());
        Ok(name)
    }
}
