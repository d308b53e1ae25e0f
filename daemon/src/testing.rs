/// In-memory collaborators for unit tests.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::capture::{CaptureLauncher, CommandSpec};
use crate::directory::{DirectoryClient, EntitySnapshot, RawState};
use crate::error::{CaptureError, DirectoryError};

pub fn snapshot(uid: u64, name: &str, state: RawState) -> EntitySnapshot {
    EntitySnapshot {
        uid,
        name: name.to_string(),
        state,
        truepvt: false,
        camserv: Some(1000),
    }
}

enum Reply {
    Found(EntitySnapshot),
    /// Answered only after the paired `Notify` fires.
    Held(EntitySnapshot, Arc<Notify>),
    Fail,
}

/// Directory answering from a table.  Each snapshot is reachable by uid and
/// by name; unknown ids resolve to "not found".
#[derive(Default)]
pub struct MockDirectory {
    replies: Mutex<HashMap<String, Reply>>,
    queries: Mutex<Vec<String>>,
    fail_connect: bool,
}

impl MockDirectory {
    pub fn unreachable() -> Self {
        Self {
            fail_connect: true,
            ..Self::default()
        }
    }

    pub fn set(&self, snapshot: EntitySnapshot) {
        let mut replies = self.replies.lock();
        replies.insert(snapshot.name.clone(), Reply::Found(snapshot.clone()));
        replies.insert(snapshot.uid.to_string(), Reply::Found(snapshot));
    }

    /// Makes queries for `snapshot` (by uid or name) wait until the returned
    /// handle is notified.
    pub fn gate(&self, snapshot: EntitySnapshot) -> Arc<Notify> {
        let release = Arc::new(Notify::new());
        let mut replies = self.replies.lock();
        replies.insert(
            snapshot.name.clone(),
            Reply::Held(snapshot.clone(), Arc::clone(&release)),
        );
        replies.insert(
            snapshot.uid.to_string(),
            Reply::Held(snapshot, Arc::clone(&release)),
        );
        release
    }

    pub fn fail(&self, id: &str) {
        self.replies.lock().insert(id.to_string(), Reply::Fail);
    }

    pub fn with(snapshots: impl IntoIterator<Item = EntitySnapshot>) -> Self {
        let dir = Self::default();
        for s in snapshots {
            dir.set(s);
        }
        dir
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl DirectoryClient for MockDirectory {
    async fn connect(&self) -> Result<(), DirectoryError> {
        if self.fail_connect {
            return Err(DirectoryError::Connection("connection refused".to_string()));
        }
        Ok(())
    }

    async fn query(&self, id: &str) -> Result<Option<EntitySnapshot>, DirectoryError> {
        self.queries.lock().push(id.to_string());
        tokio::task::yield_now().await;
        let held = match self.replies.lock().get(id) {
            Some(Reply::Held(_, release)) => Some(Arc::clone(release)),
            _ => None,
        };
        if let Some(release) = held {
            release.notified().await;
        }
        match self.replies.lock().get(id) {
            Some(Reply::Found(s)) | Some(Reply::Held(s, _)) => Ok(Some(s.clone())),
            Some(Reply::Fail) => Err(DirectoryError::query(id, "simulated failure")),
            None => Ok(None),
        }
    }

    fn disconnect(&self) {}
}

/// Launcher that tracks "running" captures without spawning anything.
#[derive(Default)]
pub struct MockLauncher {
    running: Mutex<HashSet<u64>>,
    started: Mutex<Vec<u64>>,
    stopped: Mutex<Vec<u64>>,
    fail_uids: HashSet<u64>,
}

impl MockLauncher {
    pub fn failing(uids: &[u64]) -> Self {
        Self {
            fail_uids: uids.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Simulates the subprocess for `uid` exiting on its own.
    pub fn finish(&self, uid: u64) {
        self.running.lock().remove(&uid);
    }

    pub fn started(&self) -> Vec<u64> {
        let mut v = self.started.lock().clone();
        v.sort_unstable();
        v
    }

    pub fn stopped(&self) -> Vec<u64> {
        self.stopped.lock().clone()
    }

    pub fn running(&self) -> Vec<u64> {
        let mut v: Vec<u64> = self.running.lock().iter().copied().collect();
        v.sort_unstable();
        v
    }
}

#[async_trait]
impl CaptureLauncher for MockLauncher {
    fn build_command(&self, media_url: &str, filename: &str) -> CommandSpec {
        CommandSpec {
            program: "ffmpeg".to_string(),
            args: vec![media_url.to_string(), filename.to_string()],
        }
    }

    async fn start(
        &self,
        _command: CommandSpec,
        _filename: &str,
        entity: &EntitySnapshot,
        shutting_down: bool,
    ) -> Result<(), CaptureError> {
        if shutting_down {
            return Err(CaptureError::ShuttingDown);
        }
        tokio::task::yield_now().await;
        if self.fail_uids.contains(&entity.uid) {
            return Err(CaptureError::Spawn {
                name: entity.name.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "ffmpeg not found"),
            });
        }
        self.running.lock().insert(entity.uid);
        self.started.lock().push(entity.uid);
        Ok(())
    }

    fn stop(&self, uid: u64) -> bool {
        if self.running.lock().remove(&uid) {
            self.stopped.lock().push(uid);
            true
        } else {
            false
        }
    }

    fn is_running(&self, uid: u64) -> bool {
        self.running.lock().contains(&uid)
    }

    async fn stop_all(&self) {
        let ids: Vec<u64> = self.running.lock().drain().collect();
        self.stopped.lock().extend(ids);
    }
}
