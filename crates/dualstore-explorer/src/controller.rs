//! Navigation over a storage session.
//!
//! The controller owns the session descriptor, the retained connection
//! handle, the navigation history and the displayed listing. A descriptor
//! passed to `open` stays pending until its first load succeeds. Navigation
//! requests go through the [`LoadOrchestrator`]; history moves only when a
//! load completes successfully, and every change is reported to an
//! [`ExplorerListener`].

use std::path::Path;

use dualstore_core::paths::{join_path, normalize_path, parent_path};
use dualstore_core::{ConnectionHandle, ErrorKind, ListingResult, SessionDescriptor, StorageError};
use tracing::{debug, info, instrument, warn};

use crate::navigation::{LoadIntent, NavigationState};
use crate::orchestrator::{LoadAdmission, LoadCompletion, LoadOrchestrator, LoadRequest};
use crate::selector::BackendSelector;

/// Signals raised on the controller's context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExplorerEvent {
    LoadStarted { path: String },
    LoadFinished(ListingResult),
    LoadFailed { kind: ErrorKind, message: String },
    NavigationChanged {
        path: String,
        can_go_back: bool,
        can_go_forward: bool,
    },
    /// Nothing has loaded successfully yet and the last attempt failed
    ListingCleared,
}

pub trait ExplorerListener: Send {
    fn on_event(&mut self, event: ExplorerEvent);
}

impl<F> ExplorerListener for F
where
    F: FnMut(ExplorerEvent) + Send,
{
    fn on_event(&mut self, event: ExplorerEvent) {
        self(event)
    }
}

/// Outcome of a navigation request.
#[derive(Debug)]
pub enum Navigate {
    Started,
    /// Already there, or nowhere to go
    Unchanged,
    /// Another load is still running; the request was dropped
    Busy,
    NotConnected(StorageError),
}

impl Navigate {
    pub fn is_started(&self) -> bool {
        matches!(self, Navigate::Started)
    }
}

pub struct NavigationController {
    orchestrator: LoadOrchestrator,
    listener: Box<dyn ExplorerListener>,
    descriptor: Option<SessionDescriptor>,
    /// Descriptor of an `open` whose load has not landed yet
    pending: Option<SessionDescriptor>,
    handle: Option<ConnectionHandle>,
    navigation: NavigationState,
    listing: Option<ListingResult>,
}

impl NavigationController {
    pub fn new(selector: BackendSelector, listener: impl ExplorerListener + 'static) -> Self {
        Self {
            orchestrator: LoadOrchestrator::new(selector),
            listener: Box::new(listener),
            descriptor: None,
            pending: None,
            handle: None,
            navigation: NavigationState::new(),
            listing: None,
        }
    }

    /// Descriptor of the session currently shown.
    pub fn descriptor(&self) -> Option<&SessionDescriptor> {
        self.descriptor.as_ref()
    }

    pub fn navigation(&self) -> &NavigationState {
        &self.navigation
    }

    /// Displayed path; `None` until a load has succeeded.
    pub fn current_path(&self) -> Option<&str> {
        self.navigation.current()
    }

    pub fn listing(&self) -> Option<&ListingResult> {
        self.listing.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.orchestrator.is_loading()
    }

    pub fn can_go_back(&self) -> bool {
        self.navigation.can_go_back()
    }

    pub fn can_go_forward(&self) -> bool {
        self.navigation.can_go_forward()
    }

    /// Start a session at `descriptor.current_path`.
    ///
    /// The descriptor, retained handle and history are replaced once the
    /// load succeeds; until then the previous session stays usable.
    pub fn open(&mut self, descriptor: SessionDescriptor) -> Navigate {
        if self.is_loading() {
            return Navigate::Busy;
        }
        let target = normalize_path(&descriptor.current_path);
        self.pending = Some(descriptor.clone());
        let nav = self.start_with(descriptor, LoadIntent::Open, target, None);
        if !nav.is_started() {
            self.pending = None;
        }
        nav
    }

    pub fn push(&mut self, path: &str) -> Navigate {
        let target = normalize_path(path);
        if self.current_path() == Some(target.as_str()) {
            return Navigate::Unchanged;
        }
        self.start(LoadIntent::Push, target, self.handle.clone())
    }

    /// Push a child of the current directory.
    pub fn enter(&mut self, name: &str) -> Navigate {
        let target = join_path(self.current_path().unwrap_or_default(), name);
        self.push(&target)
    }

    /// Push the parent of the current directory.
    pub fn up(&mut self) -> Navigate {
        match self.current_path().and_then(parent_path) {
            Some(parent) => self.push(&parent),
            None => Navigate::Unchanged,
        }
    }

    pub fn back(&mut self) -> Navigate {
        match self.navigation.back_target().map(str::to_string) {
            Some(target) => self.start(LoadIntent::Back, target, self.handle.clone()),
            None => Navigate::Unchanged,
        }
    }

    pub fn forward(&mut self) -> Navigate {
        match self.navigation.forward_target().map(str::to_string) {
            Some(target) => self.start(LoadIntent::Forward, target, self.handle.clone()),
            None => Navigate::Unchanged,
        }
    }

    /// Reload the current directory, or retry the initial load if none has
    /// succeeded yet.
    pub fn reload(&mut self) -> Navigate {
        match self.current_path().map(str::to_string) {
            Some(target) => self.start(LoadIntent::Reload, target, self.handle.clone()),
            None => {
                let Some(target) = self
                    .descriptor
                    .as_ref()
                    .map(|d| normalize_path(&d.current_path))
                else {
                    return Navigate::NotConnected(not_connected());
                };
                self.start(LoadIntent::Open, target, None)
            }
        }
    }

    #[instrument(skip(self, retained), level = "debug")]
    fn start(
        &mut self,
        intent: LoadIntent,
        target: String,
        retained: Option<ConnectionHandle>,
    ) -> Navigate {
        let Some(descriptor) = self.descriptor.clone() else {
            let err = not_connected();
            self.emit_failure(&err);
            return Navigate::NotConnected(err);
        };
        self.start_with(descriptor, intent, target, retained)
    }

    fn start_with(
        &mut self,
        descriptor: SessionDescriptor,
        intent: LoadIntent,
        target: String,
        retained: Option<ConnectionHandle>,
    ) -> Navigate {
        if self.orchestrator.is_loading() {
            debug!("Rejecting navigation to '{}': load in flight", target);
            return Navigate::Busy;
        }

        let request = LoadRequest::new(descriptor, &target, intent).with_handle(retained);
        match self.orchestrator.start_load(request) {
            LoadAdmission::Started(_) => {
                self.listener.on_event(ExplorerEvent::LoadStarted { path: target });
                Navigate::Started
            }
            LoadAdmission::Coalesced => Navigate::Busy,
            LoadAdmission::NotConnected(err) => {
                self.emit_failure(&err);
                if self.navigation.is_empty() {
                    self.clear_listing();
                }
                Navigate::NotConnected(err)
            }
        }
    }

    /// Apply a finished load if one is ready. Returns whether one was.
    pub fn poll(&mut self) -> bool {
        match self.orchestrator.try_complete() {
            Some(completion) => {
                self.apply(completion);
                true
            }
            None => false,
        }
    }

    /// Wait for the running load and apply it. Returns `false` when idle.
    pub async fn settle(&mut self) -> bool {
        match self.orchestrator.next_completion().await {
            Some(completion) => {
                self.apply(completion);
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, completion: LoadCompletion) {
        let LoadCompletion {
            target,
            intent,
            outcome,
            ..
        } = completion;
        match outcome {
            Ok((listing, handle)) => {
                info!("Loaded '{}' ({} entries)", target, listing.len());
                if let Some(descriptor) = self.pending.take() {
                    self.descriptor = Some(descriptor);
                }
                self.navigation.commit(intent, &target);
                self.handle = Some(handle);
                self.listing = Some(listing.clone());
                self.listener.on_event(ExplorerEvent::LoadFinished(listing));
                self.listener.on_event(ExplorerEvent::NavigationChanged {
                    path: self.navigation.current().unwrap_or_default().to_string(),
                    can_go_back: self.navigation.can_go_back(),
                    can_go_forward: self.navigation.can_go_forward(),
                });
            }
            Err(err) => {
                warn!("Loading '{}' failed: {}", target, err);
                if let Some(descriptor) = self.pending.take() {
                    if self.descriptor.is_none() {
                        // nothing shown yet: reload retries this descriptor
                        self.descriptor = Some(descriptor);
                    } else {
                        debug!("Keeping the previous session after a failed open");
                    }
                }
                if self.navigation.is_empty() {
                    self.clear_listing();
                }
                self.emit_failure(&err);
            }
        }
    }

    fn clear_listing(&mut self) {
        self.listing = None;
        self.listener.on_event(ExplorerEvent::ListingCleared);
    }

    fn emit_failure(&mut self, err: &StorageError) {
        self.listener.on_event(ExplorerEvent::LoadFailed {
            kind: err.kind(),
            message: err.message().to_string(),
        });
    }

    fn retained(&self) -> Result<ConnectionHandle, StorageError> {
        self.handle.clone().ok_or_else(not_connected)
    }

    /// Download an entry of the current directory (or any root-relative
    /// path) over the retained handle.
    pub async fn download(
        &self,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<u64, StorageError> {
        self.retained()?.download(remote_path, local_path).await
    }

    /// Download `name` from the displayed directory.
    pub async fn download_entry(
        &self,
        name: &str,
        local_path: &Path,
    ) -> Result<u64, StorageError> {
        let remote = join_path(self.current_path().unwrap_or_default(), name);
        self.download(&remote, local_path).await
    }

    /// Upload to the storage root, then reload the displayed directory.
    pub async fn upload(&mut self, local_path: &Path) -> Result<String, StorageError> {
        let remote = self.retained()?.upload(local_path).await?;
        match self.reload() {
            Navigate::Started => {}
            other => warn!(
                "Uploaded '{}' but the listing was not refreshed: {:?}",
                remote, other
            ),
        }
        Ok(remote)
    }
}

fn not_connected() -> StorageError {
    StorageError::NotConnected("no storage session has been opened".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockBehavior};
    use dualstore_core::DirectoryEntry;
    use std::sync::{Arc, Mutex};

    type Events = Arc<Mutex<Vec<ExplorerEvent>>>;

    fn controller(backend: Arc<MockBackend>) -> (NavigationController, Events) {
        let events: Events = Arc::default();
        let sink = events.clone();
        let controller = NavigationController::new(
            BackendSelector::new(backend.clone(), backend),
            move |e: ExplorerEvent| sink.lock().unwrap().push(e),
        );
        (controller, events)
    }

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor::share("nas", "media", "u", "p")
    }

    async fn go(c: &mut NavigationController, nav: Navigate) {
        assert!(nav.is_started(), "expected Started, got {:?}", nav);
        assert!(c.settle().await);
    }

    #[tokio::test]
    async fn test_history_truncates_on_diverging_push() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, _) = controller(backend);

        let nav = c.open(descriptor());
        go(&mut c, nav).await;
        let nav = c.push("a");
        go(&mut c, nav).await;
        let nav = c.push("a/b");
        go(&mut c, nav).await;
        let nav = c.back();
        go(&mut c, nav).await;
        let nav = c.push("c");
        go(&mut c, nav).await;

        assert_eq!(c.navigation().history(), &["", "a", "c"]);
        assert_eq!(c.navigation().cursor(), 2);
    }

    #[tokio::test]
    async fn test_overlapping_navigation_is_busy() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default().gated()));
        let (mut c, _) = controller(backend.clone());

        assert!(c.open(descriptor()).is_started());
        assert!(matches!(c.push("x"), Navigate::Busy));
        assert!(matches!(c.reload(), Navigate::Busy));

        backend.release();
        assert!(c.settle().await);
        assert_eq!(backend.connects(), 1);
        assert_eq!(backend.lists(), 1);
        assert_eq!(c.current_path(), Some(""));
    }

    #[tokio::test]
    async fn test_push_same_path_is_noop() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, _) = controller(backend);
        let nav = c.open(descriptor().with_path("/docs/"));
        go(&mut c, nav).await;
        assert!(matches!(c.push("docs"), Navigate::Unchanged));
        assert!(matches!(c.back(), Navigate::Unchanged));
        assert!(matches!(c.forward(), Navigate::Unchanged));
    }

    #[tokio::test]
    async fn test_first_failure_clears_later_failure_keeps_listing() {
        let backend = Arc::new(MockBackend::new(
            MockBehavior::default().fail_connect(StorageError::Connectivity("down".into())),
        ));
        let (mut c, events) = controller(backend.clone());

        let nav = c.open(descriptor());
        go(&mut c, nav).await;
        assert!(c.listing().is_none());
        assert!(events.lock().unwrap().contains(&ExplorerEvent::ListingCleared));

        backend.set_behavior(
            MockBehavior::default()
                .with_listing("", vec![DirectoryEntry::file("a.txt", 1)])
                .missing("gone"),
        );
        let nav = c.reload();
        go(&mut c, nav).await;
        assert_eq!(c.listing().unwrap().len(), 1);

        events.lock().unwrap().clear();
        let nav = c.push("gone");
        go(&mut c, nav).await;

        let events = events.lock().unwrap();
        assert!(!events.contains(&ExplorerEvent::ListingCleared));
        assert!(events.iter().any(|e| matches!(
            e,
            ExplorerEvent::LoadFailed { kind: ErrorKind::NotFound, .. }
        )));
        assert_eq!(c.listing().unwrap().len(), 1);
        assert_eq!(c.current_path(), Some(""));
        assert_eq!(c.navigation().history(), &[""]);
    }

    #[tokio::test]
    async fn test_not_connected_without_credentials() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, events) = controller(backend.clone());

        let nav = c.open(SessionDescriptor::cloud("https://h", "", ""));
        assert!(matches!(nav, Navigate::NotConnected(_)));
        assert!(!c.is_loading());
        assert_eq!(backend.connects(), 0);
        assert!(events.lock().unwrap().iter().any(|e| matches!(
            e,
            ExplorerEvent::LoadFailed { kind: ErrorKind::NotConnected, .. }
        )));

        let (mut fresh, _) = controller(backend);
        assert!(matches!(fresh.push("a"), Navigate::NotConnected(_)));
    }

    #[tokio::test]
    async fn test_events_on_success() {
        let backend = Arc::new(MockBackend::new(
            MockBehavior::default().with_listing("docs", vec![DirectoryEntry::directory("x")]),
        ));
        let (mut c, events) = controller(backend.clone());
        let nav = c.open(descriptor());
        go(&mut c, nav).await;
        events.lock().unwrap().clear();

        let nav = c.enter("docs");
        go(&mut c, nav).await;
        let events = events.lock().unwrap();
        assert_eq!(
            events[0],
            ExplorerEvent::LoadStarted {
                path: "docs".into()
            }
        );
        assert!(matches!(&events[1], ExplorerEvent::LoadFinished(l) if l.len() == 1));
        assert_eq!(
            events[2],
            ExplorerEvent::NavigationChanged {
                path: "docs".into(),
                can_go_back: true,
                can_go_forward: false,
            }
        );
        // drill-down reuses the session
        assert_eq!(backend.connects(), 1);
        assert_eq!(backend.listed_paths(), vec!["", "docs"]);
    }

    #[tokio::test]
    async fn test_up_goes_to_parent() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, _) = controller(backend);
        let nav = c.open(descriptor().with_path("a/b"));
        go(&mut c, nav).await;
        let nav = c.up();
        go(&mut c, nav).await;
        assert_eq!(c.current_path(), Some("a"));
        assert!(c.can_go_back());
    }

    #[tokio::test]
    async fn test_upload_while_loading_keeps_running_load() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, _) = controller(backend.clone());
        let nav = c.open(descriptor());
        go(&mut c, nav).await;

        backend.set_behavior(MockBehavior::default().gated());
        assert!(c.push("x").is_started());

        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("up.bin");
        std::fs::write(&local, b"x").unwrap();
        assert_eq!(c.upload(&local).await.unwrap(), "up.bin");

        backend.release();
        assert!(c.settle().await);
        // the refresh was refused, not queued behind the push
        assert!(!c.settle().await);
        assert_eq!(backend.lists(), 2);
        assert_eq!(c.current_path(), Some("x"));
    }

    #[tokio::test]
    async fn test_failed_reopen_keeps_previous_session() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, _) = controller(backend.clone());
        let nav = c.open(descriptor());
        go(&mut c, nav).await;
        let nav = c.push("docs");
        go(&mut c, nav).await;

        backend.set_behavior(
            MockBehavior::default().fail_connect(StorageError::Authentication("nope".into())),
        );
        let other = SessionDescriptor::share("other", "backup", "u", "p");
        let nav = c.open(other.clone());
        go(&mut c, nav).await;

        assert_eq!(c.descriptor(), Some(&descriptor()));
        assert_eq!(c.navigation().history(), &["", "docs"]);
        assert_eq!(c.current_path(), Some("docs"));

        // the old handle still serves navigation without reconnecting
        backend.set_behavior(MockBehavior::default());
        let nav = c.back();
        go(&mut c, nav).await;
        assert_eq!(backend.connects(), 2);
        assert_eq!(c.current_path(), Some(""));

        // an open that cannot start changes nothing either
        let nav = c.open(SessionDescriptor::share("other", "backup", "", ""));
        assert!(matches!(nav, Navigate::NotConnected(_)));
        assert_eq!(c.descriptor(), Some(&descriptor()));

        let nav = c.open(other.clone());
        go(&mut c, nav).await;
        assert_eq!(c.descriptor(), Some(&other));
        assert_eq!(c.navigation().history(), &[""]);
    }

    #[tokio::test]
    async fn test_transfers_need_a_session() {
        let backend = Arc::new(MockBackend::new(MockBehavior::default()));
        let (mut c, _) = controller(backend.clone());
        let dir = tempfile::tempdir().unwrap();

        let err = c
            .download("a.txt", &dir.path().join("a.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotConnected);

        let nav = c.open(descriptor().with_path("docs"));
        go(&mut c, nav).await;
        let dest = dir.path().join("a.txt");
        c.download_entry("a.txt", &dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "contents of docs/a.txt");

        let local = dir.path().join("up.bin");
        std::fs::write(&local, b"x").unwrap();
        assert_eq!(c.upload(&local).await.unwrap(), "up.bin");
        // upload triggers a reload of the displayed directory
        assert!(c.is_loading());
        assert!(c.settle().await);
        assert_eq!(backend.uploads(), vec![local]);
    }
}
