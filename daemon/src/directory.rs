/// Broadcaster directory: the read-only service that answers "what is this
/// broadcaster doing right now?".
///
/// The daemon only depends on the [`DirectoryClient`] trait.  The shipped
/// implementation, [`HttpDirectoryClient`], talks JSON over HTTP:
///   - `GET {base}/roster`      initial roster push, fetched once on connect
///   - `GET {base}/users/{id}`  one broadcaster by numeric id or name (404 = unknown)
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::DirectoryError;

const REQUEST_TIMEOUT_SECS: u64 = 15;

/// Raw video-state code reported by the directory.
///
/// Open-ended on the wire: values outside the known constants are legal and
/// classified as offline by [`crate::state::classify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawState(pub u32);

impl RawState {
    pub const FREE_CHAT: RawState = RawState(0);
    pub const AWAY: RawState = RawState(2);
    pub const PRIVATE: RawState = RawState(12);
    pub const GROUP_SHOW: RawState = RawState(13);
    /// Logged in, camera not streaming.
    pub const ONLINE: RawState = RawState(90);
    pub const OFFLINE: RawState = RawState(127);
}

/// Public state of one broadcaster as returned by the directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub uid: u64,
    #[serde(alias = "nm")]
    pub name: String,
    #[serde(alias = "vs")]
    pub state: RawState,
    /// Set when a private show is a "true private" (no spy access).
    #[serde(default, deserialize_with = "flag")]
    pub truepvt: bool,
    /// Camera server the stream is served from, when broadcasting.
    #[serde(default)]
    pub camserv: Option<u32>,
}

/// Accepts both JSON booleans and the `0`/`1` integers the directory uses.
fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Int(i) => i != 0,
    })
}

#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Connects and waits for the initial roster.  Fatal to startup on error.
    async fn connect(&self) -> Result<(), DirectoryError>;

    /// Resolves `id` (numeric uid or display name).  `Ok(None)` means the
    /// directory has no such broadcaster.
    async fn query(&self, id: &str) -> Result<Option<EntitySnapshot>, DirectoryError>;

    fn disconnect(&self);
}

/// [`DirectoryClient`] backed by a JSON/HTTP directory service.
pub struct HttpDirectoryClient {
    http: reqwest::Client,
    base_url: String,
    connected: AtomicBool,
}

impl HttpDirectoryClient {
    pub fn new(base_url: &str) -> Result<Self, DirectoryError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            connected: AtomicBool::new(false),
        })
    }

    fn roster_url(&self) -> String {
        format!("{}/roster", self.base_url)
    }

    fn user_url(&self, id: &str) -> String {
        format!("{}/users/{}", self.base_url, id)
    }
}

#[async_trait]
impl DirectoryClient for HttpDirectoryClient {
    async fn connect(&self) -> Result<(), DirectoryError> {
        let roster: Vec<EntitySnapshot> = self
            .http
            .get(self.roster_url())
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| DirectoryError::Connection(e.to_string()))?
            .json()
            .await
            .map_err(|e| DirectoryError::Connection(e.to_string()))?;

        self.connected.store(true, Ordering::SeqCst);
        info!("Connected to directory at {} ({} broadcasters online)", self.base_url, roster.len());
        Ok(())
    }

    async fn query(&self, id: &str) -> Result<Option<EntitySnapshot>, DirectoryError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(DirectoryError::NotConnected);
        }

        let response = self
            .http
            .get(self.user_url(id))
            .send()
            .await
            .map_err(|e| DirectoryError::query(id, e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!("Directory has no broadcaster '{id}'");
            return Ok(None);
        }

        let snapshot = response
            .error_for_status()
            .map_err(|e| DirectoryError::query(id, e))?
            .json::<EntitySnapshot>()
            .await
            .map_err(|e| DirectoryError::query(id, e))?;
        Ok(Some(snapshot))
    }

    fn disconnect(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            info!("Disconnected from directory");
        }
    }
}
