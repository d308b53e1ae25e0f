/// Pending watch-list changes written by the operator to `updates.toml`.
///
/// The file is shared by every site adapter; this one only claims the
/// `include_mfc` and `exclude_mfc` keys and leaves the rest untouched:
///
/// ```toml
/// include_mfc = ["alice", "1234567"]
/// exclude_mfc = ["bob"]
/// ```
use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::event::DaemonEvent;

pub const INCLUDE_KEY: &str = "include_mfc";
pub const EXCLUDE_KEY: &str = "exclude_mfc";

/// Identifiers claimed from the pending-changes file for one reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingChangeBundle {
    pub include_ids: Vec<String>,
    pub exclude_ids: Vec<String>,
    /// Set by reconciliation when the watch-list was mutated.
    pub dirty: bool,
}

impl PendingChangeBundle {
    pub fn is_empty(&self) -> bool {
        self.include_ids.is_empty() && self.exclude_ids.is_empty()
    }
}

/// Reads and clears this adapter's entries in the pending-changes file.
pub struct PendingChangeLoader {
    path: PathBuf,
}

impl PendingChangeLoader {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Claims the pending include/exclude lists.
    ///
    /// The claimed lists are emptied on disk before returning, so the bundle is
    /// processed at most once.  A missing file yields an empty bundle.
    pub fn load(&self) -> Result<PendingChangeBundle> {
        if !self.path.exists() {
            return Ok(PendingChangeBundle::default());
        }
        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read updates file: {}", self.path.display()))?;
        let mut table: toml::Table = toml::from_str(&content)
            .with_context(|| format!("Failed to parse updates file: {}", self.path.display()))?;

        let bundle = PendingChangeBundle {
            include_ids: take_ids(&mut table, INCLUDE_KEY),
            exclude_ids: take_ids(&mut table, EXCLUDE_KEY),
            dirty: false,
        };

        if !bundle.include_ids.is_empty() {
            info!("{} streamer(s) to include", bundle.include_ids.len());
        }
        if !bundle.exclude_ids.is_empty() {
            info!("{} streamer(s) to exclude", bundle.exclude_ids.len());
        }

        if !bundle.is_empty() {
            let content = toml::to_string_pretty(&table)
                .context("Failed to serialize updates file")?;
            std::fs::write(&self.path, content)
                .with_context(|| format!("Failed to rewrite updates file: {}", self.path.display()))?;
        }

        Ok(bundle)
    }
}

/// Removes the id list under `key`, leaving an empty list in its place.
/// Numeric entries are accepted and converted to strings.
fn take_ids(table: &mut toml::Table, key: &str) -> Vec<String> {
    let taken = table.insert(key.to_string(), toml::Value::Array(Vec::new()));
    let Some(toml::Value::Array(values)) = taken else {
        return Vec::new();
    };
    values
        .into_iter()
        .filter_map(|v| match v {
            toml::Value::String(s) => Some(s),
            toml::Value::Integer(i) => Some(i.to_string()),
            other => {
                warn!("Ignoring invalid entry in {key}: {other}");
                None
            }
        })
        .collect()
}

/// Watches the parent directory of `path` and sends
/// [`DaemonEvent::UpdatesChanged`] whenever the updates file is written.
pub async fn watch_updates(path: PathBuf, tx: mpsc::Sender<DaemonEvent>) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!("Failed to create updates file watcher: {e}");
            return;
        }
    };

    // Watch the directory so editor-style atomic saves (write + rename) are seen.
    let watch_dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!("Updates path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!("Failed to watch {}: {e}", watch_dir.display());
        return;
    }

    while let Some(event) = watch_rx.recv().await {
        let affects_updates = event.paths.iter().any(|p| p == path.as_path());
        let is_write = matches!(
            event.kind,
            notify::EventKind::Create(_) | notify::EventKind::Modify(_)
        );

        if affects_updates && is_write && tx.send(DaemonEvent::UpdatesChanged).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader(dir: &Path, content: Option<&str>) -> PendingChangeLoader {
        let path = dir.join("updates.toml");
        if let Some(content) = content {
            std::fs::write(&path, content).unwrap();
        }
        PendingChangeLoader::new(path)
    }

    #[test]
    fn missing_file_yields_empty_bundle() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = loader(dir.path(), None).load().unwrap();
        assert!(bundle.is_empty());
        assert!(!bundle.dirty);
    }

    #[test]
    fn load_claims_both_lists() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(
            dir.path(),
            Some("include_mfc = [\"alice\", 1234]\nexclude_mfc = [\"bob\"]\n"),
        );

        let bundle = l.load().unwrap();

        assert_eq!(bundle.include_ids, vec!["alice".to_string(), "1234".to_string()]);
        assert_eq!(bundle.exclude_ids, vec!["bob".to_string()]);
    }

    #[test]
    fn load_clears_claimed_entries_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(dir.path(), Some("include_mfc = [\"alice\"]\n"));

        l.load().unwrap();
        let second = l.load().unwrap();

        assert!(second.is_empty());
    }

    #[test]
    fn load_preserves_other_sites_keys() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(
            dir.path(),
            Some("include_mfc = [\"alice\"]\ninclude_cb = [\"carol\"]\n"),
        );

        l.load().unwrap();

        let content = std::fs::read_to_string(l.path()).unwrap();
        let table: toml::Table = toml::from_str(&content).unwrap();
        assert_eq!(table["include_cb"].as_array().unwrap().len(), 1);
        assert!(table[INCLUDE_KEY].as_array().unwrap().is_empty());
    }

    #[test]
    fn load_does_not_rewrite_when_nothing_claimed() {
        let dir = tempfile::tempdir().unwrap();
        let original = "# operator notes\ninclude_cb = [\"carol\"]\n";
        let l = loader(dir.path(), Some(original));

        l.load().unwrap();

        assert_eq!(std::fs::read_to_string(l.path()).unwrap(), original);
    }

    #[test]
    fn load_skips_invalid_entries() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(dir.path(), Some("include_mfc = [\"alice\", true, 1.5]\n"));
        let bundle = l.load().unwrap();
        assert_eq!(bundle.include_ids, vec!["alice".to_string()]);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let l = loader(dir.path(), Some("not valid ][[["));
        assert!(l.load().is_err());
    }
}
