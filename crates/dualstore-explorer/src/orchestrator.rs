//! Background connect + list with single-flight admission.
//!
//! Work runs on a tokio task; its result comes back through a channel that
//! the owning context drains with [`LoadOrchestrator::try_complete`] or
//! [`LoadOrchestrator::next_completion`]. The orchestrator stays `Loading`
//! until the completion has been received there.

use std::panic::AssertUnwindSafe;

use dualstore_core::paths::normalize_path;
use dualstore_core::{ConnectionHandle, ListingResult, SessionDescriptor, StorageError};
use futures::FutureExt;
use tokio::sync::mpsc;
use tracing::{debug, error, instrument};

use crate::navigation::LoadIntent;
use crate::selector::BackendSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Idle,
    Loading,
}

/// One directory load.
#[derive(Clone)]
pub struct LoadRequest {
    pub descriptor: SessionDescriptor,
    /// Directory to list, relative to the storage root
    pub target: String,
    pub intent: LoadIntent,
    /// Live handle to reposition instead of reconnecting
    pub retained: Option<ConnectionHandle>,
}

impl LoadRequest {
    pub fn new(descriptor: SessionDescriptor, target: &str, intent: LoadIntent) -> Self {
        Self {
            descriptor,
            target: normalize_path(target),
            intent,
            retained: None,
        }
    }

    pub fn with_handle(mut self, handle: Option<ConnectionHandle>) -> Self {
        self.retained = handle;
        self
    }
}

pub type LoadOutcome = Result<(ListingResult, ConnectionHandle), StorageError>;

pub struct LoadCompletion {
    pub id: u64,
    pub target: String,
    pub intent: LoadIntent,
    pub outcome: LoadOutcome,
}

/// Result of asking for a load.
#[derive(Debug)]
pub enum LoadAdmission {
    Started(u64),
    /// A load is already running; nothing new was started
    Coalesced,
    /// The descriptor is incomplete; no network call was made
    NotConnected(StorageError),
}

pub struct LoadOrchestrator {
    selector: BackendSelector,
    state: LoadState,
    next_id: u64,
    tx: mpsc::UnboundedSender<LoadCompletion>,
    rx: mpsc::UnboundedReceiver<LoadCompletion>,
}

impl LoadOrchestrator {
    pub fn new(selector: BackendSelector) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            selector,
            state: LoadState::Idle,
            next_id: 0,
            tx,
            rx,
        }
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    /// Admit and spawn a load. Must be called within a tokio runtime.
    #[instrument(skip(self, request), fields(target = %request.target, intent = ?request.intent), level = "debug")]
    pub fn start_load(&mut self, request: LoadRequest) -> LoadAdmission {
        if self.is_loading() {
            debug!("Load already in flight, coalescing");
            return LoadAdmission::Coalesced;
        }
        if let Err(e) = request.descriptor.validate() {
            return LoadAdmission::NotConnected(e);
        }

        self.next_id += 1;
        let id = self.next_id;
        self.state = LoadState::Loading;

        let backend = self.selector.select(&request.descriptor);
        let tx = self.tx.clone();
        let LoadRequest {
            descriptor,
            target,
            intent,
            retained,
        } = request;

        tokio::spawn(async move {
            let work = async {
                let handle = match retained {
                    Some(handle) => handle.open_path(&target).await?,
                    None => {
                        let descriptor = descriptor.with_path(target.clone());
                        backend.connect(&descriptor).await?
                    }
                };
                let listing = handle.list().await?;
                Ok::<_, StorageError>((listing, handle))
            };
            let outcome = match AssertUnwindSafe(work).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(_) => {
                    error!("Load of '{}' panicked", target);
                    Err(StorageError::Connectivity(format!(
                        "loading '{}' failed unexpectedly",
                        target
                    )))
                }
            };
            // Receiver lives as long as the orchestrator.
            let _ = tx.send(LoadCompletion {
                id,
                target,
                intent,
                outcome,
            });
        });

        LoadAdmission::Started(id)
    }

    /// Take a finished load without waiting.
    pub fn try_complete(&mut self) -> Option<LoadCompletion> {
        let completion = self.rx.try_recv().ok()?;
        self.state = LoadState::Idle;
        Some(completion)
    }

    /// Wait for the running load; `None` when idle.
    pub async fn next_completion(&mut self) -> Option<LoadCompletion> {
        if !self.is_loading() {
            return None;
        }
        let completion = self.rx.recv().await?;
        self.state = LoadState::Idle;
        Some(completion)
    }
}
