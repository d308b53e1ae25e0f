/// Applies pending include/exclude requests to the watch-list.
///
/// Every identifier is resolved through the directory first, so operators can
/// use display names while the watch-list stores stable uids.
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::directory::{DirectoryClient, EntitySnapshot};
use crate::error::DirectoryError;
use crate::pending::PendingChangeBundle;

/// A broadcaster on (or leaving) the watch-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEntity {
    pub id: u64,
    pub display_name: String,
}

impl From<&EntitySnapshot> for WatchedEntity {
    fn from(s: &EntitySnapshot) -> Self {
        Self {
            id: s.uid,
            display_name: s.name.clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    /// At least one add or remove changed the watch-list.
    pub dirty: bool,
    pub added: Vec<WatchedEntity>,
    pub removed: Vec<WatchedEntity>,
}

/// Adds `entity` unless it is already watched.
pub fn add_entity(watch_list: &mut Vec<u64>, entity: &WatchedEntity) -> bool {
    if watch_list.contains(&entity.id) {
        info!("{} is already in the capture list", entity.display_name);
        return false;
    }
    watch_list.push(entity.id);
    info!("{} added to the capture list", entity.display_name);
    true
}

/// Removes `entity` by id.
pub fn remove_entity(watch_list: &mut Vec<u64>, entity: &WatchedEntity) -> bool {
    let before = watch_list.len();
    watch_list.retain(|&id| id != entity.id);
    if watch_list.len() == before {
        debug!("{} was not in the capture list", entity.display_name);
        return false;
    }
    info!("{} removed from the capture list", entity.display_name);
    true
}

async fn resolve_all(
    client: &dyn DirectoryClient,
    ids: &[String],
) -> Vec<(String, Result<Option<EntitySnapshot>, DirectoryError>)> {
    join_all(ids.iter().map(|id| async move {
        debug!("Checking if {id} exists");
        (id.clone(), client.query(id).await)
    }))
    .await
}

/// Resolves the bundle's ids concurrently and applies them to `watch_list`.
/// Includes are applied before excludes.  No single failure stops the rest.
pub async fn reconcile(
    client: &dyn DirectoryClient,
    watch_list: &mut Vec<u64>,
    mut bundle: PendingChangeBundle,
) -> ReconcileOutcome {
    let mut outcome = ReconcileOutcome::default();
    if bundle.is_empty() {
        return outcome;
    }

    let (includes, excludes) = futures::join!(
        resolve_all(client, &bundle.include_ids),
        resolve_all(client, &bundle.exclude_ids),
    );

    for (id, result) in includes {
        match result {
            Ok(Some(snapshot)) => {
                let entity = WatchedEntity::from(&snapshot);
                if add_entity(watch_list, &entity) {
                    bundle.dirty = true;
                    outcome.added.push(entity);
                }
            }
            Ok(None) => warn!("Could not find streamer {id} to include"),
            Err(e) => warn!("Could not include {id}: {e}"),
        }
    }

    for (id, result) in excludes {
        match result {
            Ok(Some(snapshot)) => {
                let entity = WatchedEntity::from(&snapshot);
                if remove_entity(watch_list, &entity) {
                    bundle.dirty = true;
                    outcome.removed.push(entity);
                }
            }
            Ok(None) => warn!("Could not find streamer {id} to exclude"),
            Err(e) => warn!("Could not exclude {id}: {e}"),
        }
    }

    outcome.dirty = bundle.dirty;
    outcome
}
