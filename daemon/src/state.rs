/// Normalized broadcast states and the per-broadcaster record kept for display.
use serde::{Deserialize, Serialize};

use crate::directory::{EntitySnapshot, RawState};

/// Broadcast state derived from a directory snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BroadcastState {
    Offline,
    PublicChat,
    GroupShow,
    Private,
    TruePrivate,
    Away,
    CameraOff,
}

impl BroadcastState {
    /// Only public chat authorizes a recording.
    pub fn is_capturable(self) -> bool {
        self == BroadcastState::PublicChat
    }

    /// Human-readable transition announcement for `name` entering this state.
    pub fn announcement(self, name: &str) -> String {
        match self {
            BroadcastState::PublicChat => format!("{name} is in public chat!"),
            BroadcastState::GroupShow => format!("{name} is in a group show"),
            BroadcastState::TruePrivate => format!("{name} is in a true private show."),
            BroadcastState::Private => format!("{name} is in a private show."),
            BroadcastState::Away => format!("{name} is away."),
            BroadcastState::CameraOff => format!("{name}'s cam is off."),
            BroadcastState::Offline => format!("{name} has logged off."),
        }
    }
}

/// Maps a raw directory snapshot to a [`BroadcastState`].
///
/// Total: unknown raw codes are treated as [`BroadcastState::Offline`].
pub fn classify(snapshot: &EntitySnapshot) -> BroadcastState {
    match snapshot.state {
        RawState::FREE_CHAT => BroadcastState::PublicChat,
        RawState::GROUP_SHOW => BroadcastState::GroupShow,
        RawState::PRIVATE if snapshot.truepvt => BroadcastState::TruePrivate,
        RawState::PRIVATE => BroadcastState::Private,
        RawState::AWAY => BroadcastState::Away,
        RawState::ONLINE => BroadcastState::CameraOff,
        RawState::OFFLINE => BroadcastState::Offline,
        _ => BroadcastState::Offline,
    }
}

/// Last-known record for one broadcaster.  Created on the first successful
/// query and never removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamerListEntry {
    pub uid: u64,
    pub name: String,
    pub state: BroadcastState,
    /// Name of the capture file currently being written, empty when idle.
    pub filename: String,
}

impl StreamerListEntry {
    pub fn new(uid: u64, name: &str) -> Self {
        Self {
            uid,
            name: name.to_string(),
            state: BroadcastState::Offline,
            filename: String::new(),
        }
    }
}
