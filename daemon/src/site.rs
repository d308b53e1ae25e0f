/// The site adapter: one directory, one watch-list, one set of captures.
///
/// This is the surface the runtime drives each cycle:
/// `process_pending_changes` → `reconcile` → `poll_all` → `record_all`.
use std::sync::Arc;

use tracing::{error, info};

use crate::directory::{DirectoryClient, EntitySnapshot};
use crate::error::DirectoryError;
use crate::orchestrator::Orchestrator;
use crate::pending::{PendingChangeBundle, PendingChangeLoader};
use crate::reconcile;
use crate::state::StreamerListEntry;
use crate::tracker::StateTracker;

pub struct Site {
    client: Arc<dyn DirectoryClient>,
    loader: PendingChangeLoader,
    watch_list: Vec<u64>,
    tracker: StateTracker,
    capture: Orchestrator,
}

impl Site {
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        loader: PendingChangeLoader,
        watch_list: Vec<u64>,
        capture: Orchestrator,
    ) -> Self {
        Self {
            client,
            loader,
            watch_list,
            tracker: StateTracker::new(),
            capture,
        }
    }

    pub async fn connect(&self) -> Result<(), DirectoryError> {
        self.client.connect().await
    }

    pub fn disconnect(&self) {
        self.client.disconnect();
    }

    /// Claims pending include/exclude requests.  A broken updates file is
    /// logged and treated as empty.
    pub fn process_pending_changes(&self) -> PendingChangeBundle {
        match self.loader.load() {
            Ok(bundle) => bundle,
            Err(e) => {
                error!("{e:#}");
                PendingChangeBundle::default()
            }
        }
    }

    /// Applies `bundle` to the watch-list.  Returns `true` when the persisted
    /// watch-list must be rewritten.
    pub async fn reconcile(&mut self, bundle: PendingChangeBundle) -> bool {
        let outcome = reconcile::reconcile(self.client.as_ref(), &mut self.watch_list, bundle).await;
        for entity in &outcome.removed {
            if self.capture.halt(entity.id) {
                info!("Stopped capturing {}", entity.display_name);
                self.tracker.clear_filename(entity.id);
            }
        }
        outcome.dirty
    }

    /// Polls every watched broadcaster and returns the ones to capture.
    pub async fn poll_all(&mut self) -> Vec<EntitySnapshot> {
        let outcome = self
            .tracker
            .poll_all(self.client.as_ref(), &self.watch_list, &mut self.capture)
            .await;
        for uid in &outcome.halted {
            self.tracker.clear_filename(*uid);
        }
        outcome.capturable
    }

    pub async fn record_all(&mut self, capturable: &[EntitySnapshot], shutting_down: bool) {
        let started = self.capture.record_all(capturable, shutting_down).await;
        for capture in started {
            self.tracker.set_filename(capture.uid, &capture.filename);
        }
    }

    /// Handles a capture subprocess that ended.
    pub fn capture_exited(&mut self, uid: u64) {
        if self.capture.capture_exited(uid) {
            self.tracker.clear_filename(uid);
        }
    }

    /// Stops every capture and waits for the subprocesses to exit.
    pub async fn shutdown(&mut self) {
        for uid in self.capture.capturing() {
            self.tracker.clear_filename(uid);
        }
        self.capture.halt_all().await;
    }

    pub fn watch_list(&self) -> &[u64] {
        &self.watch_list
    }

    pub fn entries(&self) -> Vec<StreamerListEntry> {
        self.tracker.entries()
    }

    pub fn capturing(&self) -> Vec<u64> {
        self.capture.capturing()
    }
}
