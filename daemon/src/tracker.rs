/// Broadcast-state tracking for the watch-list.
///
/// Every poll queries each watched broadcaster concurrently, waits for all of
/// the queries to settle, then classifies each result on its own.  Results are
/// applied one entity at a time with no suspension in between, so the maps
/// below never need a lock.
use std::collections::{HashMap, HashSet};

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryClient, EntitySnapshot, RawState};
use crate::orchestrator::Orchestrator;
use crate::state::{classify, BroadcastState, StreamerListEntry};

/// Result of classifying one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub state: BroadcastState,
    /// Transition message, when one should be shown.
    pub announcement: Option<String>,
}

/// Result of one poll cycle.
#[derive(Debug, Default)]
pub struct PollOutcome {
    /// Broadcasters in a capturable state this cycle, in no particular order.
    pub capturable: Vec<EntitySnapshot>,
    pub announcements: Vec<String>,
    /// Ids whose capture was halted during this cycle.
    pub halted: Vec<u64>,
}

#[derive(Debug, Default)]
pub struct StateTracker {
    /// Keyed by display name.
    entries: HashMap<String, StreamerListEntry>,
    /// Last raw state per uid; only used to suppress repeat announcements.
    last_state: HashMap<u64, RawState>,
    /// Current display name per uid.  Older entries of a renamed broadcaster
    /// stay in `entries` but never carry a filename.
    names: HashMap<u64, String>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `snapshot` for `uid` and decides whether to announce it.
    ///
    /// A change of raw state is announced, except that the first sighting of
    /// an offline broadcaster is kept quiet.
    pub fn observe(&mut self, uid: u64, snapshot: &EntitySnapshot) -> Observation {
        let state = classify(snapshot);

        if let Some(old) = self.names.insert(uid, snapshot.name.clone()) {
            if old != snapshot.name {
                info!("{old} is now known as {}", snapshot.name);
                let filename = self
                    .entries
                    .get_mut(&old)
                    .map(|e| std::mem::take(&mut e.filename))
                    .unwrap_or_default();
                self.entries
                    .entry(snapshot.name.clone())
                    .or_insert_with(|| StreamerListEntry::new(uid, &snapshot.name))
                    .filename = filename;
            }
        }

        let entry = self
            .entries
            .entry(snapshot.name.clone())
            .or_insert_with(|| StreamerListEntry::new(uid, &snapshot.name));
        entry.uid = uid;
        entry.state = state;

        let announce = match self.last_state.insert(uid, snapshot.state) {
            Some(previous) => previous != snapshot.state,
            None => state != BroadcastState::Offline,
        };

        Observation {
            state,
            announcement: announce.then(|| state.announcement(&snapshot.name)),
        }
    }

    /// Queries every id in `watch_list`, updates state, and halts captures
    /// whose broadcaster is no longer capturable.
    ///
    /// After this returns every id still in the capturing set was seen in a
    /// capturable state during this cycle.
    pub async fn poll_all(
        &mut self,
        client: &dyn DirectoryClient,
        watch_list: &[u64],
        capture: &mut Orchestrator,
    ) -> PollOutcome {
        let results = join_all(watch_list.iter().map(|&uid| async move {
            let id = uid.to_string();
            (uid, client.query(&id).await)
        }))
        .await;

        let mut outcome = PollOutcome::default();
        let mut confirmed = HashSet::new();

        for (uid, result) in results {
            let snapshot = match result {
                Ok(Some(snapshot)) => snapshot,
                Ok(None) => {
                    warn!("Streamer {uid} was not found in the directory");
                    continue;
                }
                Err(e) => {
                    warn!("{e}");
                    continue;
                }
            };

            let observation = self.observe(uid, &snapshot);
            if let Some(message) = observation.announcement {
                info!("{message}");
                outcome.announcements.push(message);
            }

            if observation.state.is_capturable() {
                confirmed.insert(uid);
                outcome.capturable.push(snapshot);
            } else if capture.is_capturing(uid) {
                // The subprocess does not always exit when the broadcast ends.
                debug!("{} is no longer broadcasting, ending capture", snapshot.name);
                capture.halt(uid);
                outcome.halted.push(uid);
            }
        }

        for uid in capture.capturing() {
            if !confirmed.contains(&uid) {
                info!(
                    "Capture of {} could not be confirmed this cycle, ending it",
                    self.display_name(uid)
                );
                capture.halt(uid);
                outcome.halted.push(uid);
            }
        }

        outcome
    }

    pub fn set_filename(&mut self, uid: u64, filename: &str) {
        let Some(name) = self.names.get(&uid) else {
            return;
        };
        if let Some(entry) = self.entries.get_mut(name) {
            entry.filename = filename.to_string();
        }
    }

    pub fn clear_filename(&mut self, uid: u64) {
        self.set_filename(uid, "");
    }

    /// Current name of `uid` with the uid attached, or the bare uid if it
    /// was never seen.
    pub fn display_name(&self, uid: u64) -> String {
        match self.names.get(&uid) {
            Some(name) => format!("{name} ({uid})"),
            None => uid.to_string(),
        }
    }

    pub fn entry(&self, name: &str) -> Option<&StreamerListEntry> {
        self.entries.get(name)
    }

    /// All known entries, sorted by name.
    pub fn entries(&self) -> Vec<StreamerListEntry> {
        let mut entries: Vec<StreamerListEntry> = self.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }
}
