use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

use crate::state::StreamerListEntry;

/// Current operational state of the daemon.
#[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    /// Connecting to the directory.
    Starting,
    /// Polling; no capture is running.
    Idle,
    /// At least one capture subprocess is running.
    Capturing,
    /// Stopping captures before exit.
    Stopping,
}

/// Runtime status written by the daemon to `status.toml` for external viewers.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: DaemonState,
    /// RFC 3339 timestamp of the last completed poll cycle.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<String>,
    /// Human-readable error message if the daemon encountered a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Uids with a running capture.
    #[serde(default)]
    pub capturing: Vec<u64>,
    /// Last-known state of every broadcaster seen so far.
    #[serde(default)]
    pub streamers: Vec<StreamerListEntry>,
}

impl DaemonStatus {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: DaemonState::Starting,
            last_poll: None,
            error: None,
            capturing: Vec::new(),
            streamers: Vec::new(),
        }
    }

    /// Refreshes the capture/streamer sections and derives the state from them.
    pub fn update(&mut self, streamers: Vec<StreamerListEntry>, capturing: Vec<u64>) {
        self.state = if capturing.is_empty() {
            DaemonState::Idle
        } else {
            DaemonState::Capturing
        };
        self.streamers = streamers;
        self.capturing = capturing;
    }
}

/// Serializes `status` to TOML and writes it to `path`.
/// Creates the parent directory if it does not exist.
/// A status write failure is logged and never stops the daemon.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!("Failed to create directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!("Failed to write status file: {e}");
            }
        }
        Err(e) => warn!("Failed to serialize status: {e}"),
    }
}
