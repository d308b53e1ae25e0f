/// Capture orchestration: decides which capturable broadcasters get a
/// recording, fans out capture setup, and owns the set of live captures.
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Local};
use futures::future::join_all;
use tracing::{debug, error, info};

use crate::capture::{CaptureLauncher, CommandSpec};
use crate::directory::EntitySnapshot;
use crate::error::CaptureError;

const CAMSERV_OFFSET: u32 = 500;
const STREAM_ID_BASE: u64 = 100_000_000;

/// Where and how capture files are named.
#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub capture_dir: PathBuf,
    /// Where finished captures end up; a name taken there is taken for good.
    pub complete_dir: PathBuf,
    /// chrono strftime pattern for the filename timestamp.
    pub date_format: String,
    pub extension: String,
}

/// Everything needed to start one capture.
#[derive(Debug, Clone)]
pub struct PreparedCapture {
    pub entity: EntitySnapshot,
    pub command: CommandSpec,
    pub filename: String,
}

/// A capture that was successfully launched this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedCapture {
    pub uid: u64,
    pub name: String,
    pub filename: String,
}

pub struct Orchestrator {
    launcher: Arc<dyn CaptureLauncher>,
    settings: CaptureSettings,
    capturing: HashSet<u64>,
}

impl Orchestrator {
    pub fn new(launcher: Arc<dyn CaptureLauncher>, settings: CaptureSettings) -> Self {
        Self {
            launcher,
            settings,
            capturing: HashSet::new(),
        }
    }

    pub fn is_capturing(&self, uid: u64) -> bool {
        self.capturing.contains(&uid)
    }

    /// Ids with a live capture, sorted.
    pub fn capturing(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self.capturing.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Builds `<name>_<timestamp>.<ext>`.  The result is always a single path
    /// component.
    pub fn file_name(&self, name: &str, now: DateTime<Local>) -> String {
        let stem = format!("{name}_{}", now.format(&self.settings.date_format));
        format!("{}.{}", sanitize_name(&stem), self.settings.extension)
    }

    /// Gate consulted before preparing a capture.
    async fn may_capture(&self, entity: &EntitySnapshot, filename: &str, shutting_down: bool) -> bool {
        if shutting_down {
            debug!("Not capturing {}: shutting down", entity.name);
            return false;
        }
        if self.is_capturing(entity.uid) {
            debug!("{} is already being captured", entity.name);
            return false;
        }
        for dir in [&self.settings.capture_dir, &self.settings.complete_dir] {
            let path = dir.join(filename);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                info!("Not capturing {}: {} already exists", entity.name, path.display());
                return false;
            }
        }
        true
    }

    /// Computes the filename and subprocess invocation for `entity`.
    /// `Ok(None)` when the gate declines.
    pub async fn prepare(
        &self,
        entity: &EntitySnapshot,
        shutting_down: bool,
    ) -> Result<Option<PreparedCapture>, CaptureError> {
        let filename = self.file_name(&entity.name, Local::now());
        if !self.may_capture(entity, &filename, shutting_down).await {
            return Ok(None);
        }

        let url = media_url(entity)?;
        let command = self.launcher.build_command(&url, &filename);
        Ok(Some(PreparedCapture {
            entity: entity.clone(),
            command,
            filename,
        }))
    }

    /// Starts the subprocess for a prepared capture.  Registration in the
    /// capturing set is done by the caller once the fan-out settles.
    pub async fn launch(
        &self,
        prepared: PreparedCapture,
        shutting_down: bool,
    ) -> Result<StartedCapture, CaptureError> {
        self.launcher
            .start(prepared.command, &prepared.filename, &prepared.entity, shutting_down)
            .await?;
        Ok(StartedCapture {
            uid: prepared.entity.uid,
            name: prepared.entity.name,
            filename: prepared.filename,
        })
    }

    /// Prepares and launches captures for every entity concurrently.  One
    /// entity failing never affects the others.
    pub async fn record_all(
        &mut self,
        entities: &[EntitySnapshot],
        shutting_down: bool,
    ) -> Vec<StartedCapture> {
        if entities.is_empty() {
            return Vec::new();
        }
        debug!("{} streamer(s) to capture", entities.len());

        let mut seen = HashSet::new();
        let unique: Vec<&EntitySnapshot> = entities.iter().filter(|e| seen.insert(e.uid)).collect();

        let outcomes = {
            let this = &*self;
            join_all(unique.into_iter().map(|entity| async move {
                let outcome = match this.prepare(entity, shutting_down).await {
                    Ok(Some(prepared)) => this.launch(prepared, shutting_down).await.map(Some),
                    Ok(None) => Ok(None),
                    Err(e) => Err(e),
                };
                (entity, outcome)
            }))
            .await
        };

        let mut started = Vec::new();
        for (entity, outcome) in outcomes {
            match outcome {
                Ok(Some(capture)) => {
                    self.capturing.insert(capture.uid);
                    started.push(capture);
                }
                Ok(None) => {}
                Err(e) => error!("{}", failure_message(&entity.name, &e)),
            }
        }
        started
    }

    /// Terminates the capture for `uid`.  Idempotent.
    pub fn halt(&mut self, uid: u64) -> bool {
        let was_capturing = self.capturing.remove(&uid);
        let stopped = self.launcher.stop(uid);
        was_capturing || stopped
    }

    /// Drops `uid` from the capturing set once its subprocess is gone.
    pub fn capture_exited(&mut self, uid: u64) -> bool {
        if self.launcher.is_running(uid) {
            return false;
        }
        self.capturing.remove(&uid)
    }

    /// Stops every capture and waits for the subprocesses to be reaped.
    pub async fn halt_all(&mut self) {
        self.capturing.clear();
        self.launcher.stop_all().await;
    }
}

/// HLS playlist URL for a broadcaster's current camera server.
pub fn media_url(entity: &EntitySnapshot) -> Result<String, CaptureError> {
    let camserv = entity
        .camserv
        .ok_or_else(|| CaptureError::prepare(&entity.name, "no camera server reported"))?;
    let server = camserv.checked_sub(CAMSERV_OFFSET).ok_or_else(|| {
        CaptureError::prepare(&entity.name, format!("invalid camera server {camserv}"))
    })?;
    Ok(format!(
        "http://video{server}.myfreecams.com:1935/NxServer/ngrp:mfc_{}.f4v_mobile/playlist.m3u8",
        STREAM_ID_BASE + entity.uid
    ))
}

/// Log line for a capture that could not be set up.
fn failure_message(name: &str, e: &CaptureError) -> String {
    match e {
        CaptureError::Prepare { .. } | CaptureError::Spawn { .. } => e.to_string(),
        CaptureError::ShuttingDown => format!("{name}: {e}"),
    }
}

/// Replaces characters that are illegal in file names with `_`.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}
