/// Capture subprocess management.
///
/// Each running capture is one `ffmpeg` child process copying the broadcaster's
/// HLS stream into `<capture_dir>/<filename>`.  A session owns:
///   - a `watch` stop channel used by [`CaptureLauncher::stop`]
///   - a waiter task that reaps the child and moves the finished file into
///     `<complete_dir>`.  A subprocess that exits on its own is reported with
///     [`DaemonEvent::CaptureExited`]
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::directory::EntitySnapshot;
use crate::error::CaptureError;
use crate::event::DaemonEvent;

/// Program and arguments for one capture subprocess.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

#[async_trait]
pub trait CaptureLauncher: Send + Sync {
    /// Builds the subprocess invocation recording `media_url` into `filename`.
    fn build_command(&self, media_url: &str, filename: &str) -> CommandSpec;

    /// Starts the subprocess for `entity`.  Refused while shutting down.
    async fn start(
        &self,
        command: CommandSpec,
        filename: &str,
        entity: &EntitySnapshot,
        shutting_down: bool,
    ) -> Result<(), CaptureError>;

    /// Signals the capture for `uid` to terminate.  Returns `false` when no
    /// capture was running.
    fn stop(&self, uid: u64) -> bool;

    fn is_running(&self, uid: u64) -> bool;

    /// Stops every capture and waits for the subprocesses to be reaped.
    async fn stop_all(&self);
}

struct CaptureSession {
    /// Distinguishes a restarted capture from a stale waiter for the same uid.
    id: u64,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// [`CaptureLauncher`] that records with an external `ffmpeg` binary.
pub struct FfmpegLauncher {
    ffmpeg_path: String,
    capture_dir: PathBuf,
    complete_dir: PathBuf,
    sessions: Arc<Mutex<HashMap<u64, CaptureSession>>>,
    next_session: AtomicU64,
    event_tx: mpsc::Sender<DaemonEvent>,
}

impl FfmpegLauncher {
    pub fn new(
        ffmpeg_path: &str,
        capture_dir: PathBuf,
        complete_dir: PathBuf,
        event_tx: mpsc::Sender<DaemonEvent>,
    ) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.to_string(),
            capture_dir,
            complete_dir,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_session: AtomicU64::new(0),
            event_tx,
        }
    }
}

#[async_trait]
impl CaptureLauncher for FfmpegLauncher {
    fn build_command(&self, media_url: &str, filename: &str) -> CommandSpec {
        let output = self.capture_dir.join(filename);
        CommandSpec {
            program: self.ffmpeg_path.clone(),
            args: vec![
                "-hide_banner".to_string(),
                "-v".to_string(),
                "fatal".to_string(),
                "-i".to_string(),
                media_url.to_string(),
                "-c".to_string(),
                "copy".to_string(),
                output.to_string_lossy().into_owned(),
            ],
        }
    }

    async fn start(
        &self,
        command: CommandSpec,
        filename: &str,
        entity: &EntitySnapshot,
        shutting_down: bool,
    ) -> Result<(), CaptureError> {
        if shutting_down {
            return Err(CaptureError::ShuttingDown);
        }

        let spawn_error = |source| CaptureError::Spawn {
            name: entity.name.clone(),
            source,
        };

        tokio::fs::create_dir_all(&self.capture_dir)
            .await
            .map_err(spawn_error)?;

        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        info!("Starting capture of {} into {filename}", entity.name);

        let uid = entity.uid;
        let name = entity.name.clone();
        let session_id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let capture_path = self.capture_dir.join(filename);
        let complete_dir = self.complete_dir.clone();
        let event_tx = self.event_tx.clone();
        let (stop_tx, mut stop_rx) = watch::channel(false);

        // Hold the lock across the spawn so the waiter cannot deregister
        // before the session is inserted.
        let mut sessions = self.sessions.lock();
        let sessions_ref = Arc::clone(&self.sessions);
        let handle = tokio::spawn(async move {
            let stopped = tokio::select! {
                _ = stop_rx.changed() => {
                    if let Err(e) = child.kill().await {
                        warn!("Failed to kill capture for {name}: {e}");
                    }
                    info!("Capture of {name} stopped");
                    true
                }
                status = child.wait() => {
                    match status {
                        Ok(s) if s.success() => info!("Capture of {name} finished"),
                        Ok(s) => warn!("Capture of {name} exited with {s}"),
                        Err(e) => error!("Failed to wait on capture for {name}: {e}"),
                    }
                    false
                }
            };

            finish_file(&capture_path, &complete_dir).await;

            // A stopped session was already deregistered by `stop`.
            if !stopped {
                {
                    let mut sessions = sessions_ref.lock();
                    if sessions.get(&uid).map(|s| s.id) == Some(session_id) {
                        sessions.remove(&uid);
                    }
                }
                let _ = event_tx.send(DaemonEvent::CaptureExited { uid }).await;
            }
        });

        sessions.insert(
            uid,
            CaptureSession {
                id: session_id,
                stop_tx,
                handle,
            },
        );
        Ok(())
    }

    fn stop(&self, uid: u64) -> bool {
        match self.sessions.lock().remove(&uid) {
            Some(session) => {
                let _ = session.stop_tx.send(true);
                true
            }
            None => false,
        }
    }

    fn is_running(&self, uid: u64) -> bool {
        self.sessions.lock().contains_key(&uid)
    }

    async fn stop_all(&self) {
        let sessions: Vec<CaptureSession> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in &sessions {
            let _ = session.stop_tx.send(true);
        }
        for session in sessions {
            let _ = session.handle.await;
        }
    }
}

/// Moves a finished capture into `complete_dir`; deletes it if nothing was
/// recorded.
async fn finish_file(capture_path: &Path, complete_dir: &Path) {
    let Some(file_name) = capture_path.file_name() else {
        return;
    };
    let size = match tokio::fs::metadata(capture_path).await {
        Ok(meta) => meta.len(),
        Err(_) => return,
    };

    if size == 0 {
        debug!("Removing empty capture {}", capture_path.display());
        if let Err(e) = tokio::fs::remove_file(capture_path).await {
            warn!("Failed to remove {}: {e}", capture_path.display());
        }
        return;
    }

    if let Err(e) = tokio::fs::create_dir_all(complete_dir).await {
        warn!("Failed to create {}: {e}", complete_dir.display());
        return;
    }
    let target = free_target(complete_dir, Path::new(file_name)).await;
    if let Err(e) = tokio::fs::rename(capture_path, &target).await {
        warn!("Failed to move {} to {}: {e}", capture_path.display(), target.display());
    }
}

/// First of `<stem>.<ext>`, `<stem>-1.<ext>`, `<stem>-2.<ext>`, ... that does
/// not exist yet in `dir`.  A rename never replaces an earlier recording.
async fn free_target(dir: &Path, file_name: &Path) -> PathBuf {
    let candidate = dir.join(file_name);
    if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let stem = file_name
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = file_name.extension().map(|e| e.to_string_lossy().into_owned());
    let mut n = 1u32;
    loop {
        let name = match &ext {
            Some(ext) => format!("{stem}-{n}.{ext}"),
            None => format!("{stem}-{n}"),
        };
        let candidate = dir.join(name);
        if !tokio::fs::try_exists(&candidate).await.unwrap_or(false) {
            return candidate;
        }
        n += 1;
    }
}
