use std::sync::Arc;

use dualstore_core::{SessionDescriptor, StorageBackend, StorageMode};

/// Picks the backend serving a descriptor's storage mode.
#[derive(Clone)]
pub struct BackendSelector {
    share: Arc<dyn StorageBackend>,
    cloud: Arc<dyn StorageBackend>,
}

impl BackendSelector {
    pub fn new(share: Arc<dyn StorageBackend>, cloud: Arc<dyn StorageBackend>) -> Self {
        Self { share, cloud }
    }

    pub fn for_mode(&self, mode: StorageMode) -> Arc<dyn StorageBackend> {
        match mode {
            StorageMode::Share => Arc::clone(&self.share),
            StorageMode::Cloud => Arc::clone(&self.cloud),
        }
    }

    pub fn select(&self, descriptor: &SessionDescriptor) -> Arc<dyn StorageBackend> {
        self.for_mode(descriptor.storage_mode)
    }
}
