/// Canonical file paths for the daemon's data files.
///
/// All files live in the data directory (`$STREAMCAP_HOME`, or the working
/// directory when unset):
///   - config.toml   Settings and the watch-list.  Rewritten when the watch-list changes.
///   - updates.toml  Pending include/exclude requests, written by the operator.
///   - status.toml   Written by the daemon for external viewers.
use std::path::{Path, PathBuf};

pub const HOME_ENV_VAR: &str = "STREAMCAP_HOME";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const UPDATES_FILE_NAME: &str = "updates.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Returns the data directory.
pub fn app_data_dir() -> PathBuf {
    match std::env::var_os(HOME_ENV_VAR) {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir),
        _ => PathBuf::from("."),
    }
}

pub fn config_file_path() -> PathBuf {
    app_data_dir().join(CONFIG_FILE_NAME)
}

pub fn updates_file_path() -> PathBuf {
    app_data_dir().join(UPDATES_FILE_NAME)
}

pub fn status_file_path() -> PathBuf {
    app_data_dir().join(STATUS_FILE_NAME)
}

/// Resolves a configured directory against the data directory unless it is absolute.
pub fn resolve_dir(base: &Path, configured: &str) -> PathBuf {
    let path = Path::new(configured);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_paths_have_correct_names() {
        assert_eq!(config_file_path().file_name().unwrap(), CONFIG_FILE_NAME);
        assert_eq!(updates_file_path().file_name().unwrap(), UPDATES_FILE_NAME);
        assert_eq!(status_file_path().file_name().unwrap(), STATUS_FILE_NAME);
    }

    #[test]
    fn data_files_share_same_parent_dir() {
        let config = config_file_path();
        assert_eq!(config.parent(), updates_file_path().parent());
        assert_eq!(config.parent(), status_file_path().parent());
    }

    #[test]
    fn resolve_dir_joins_relative_paths() {
        let base = Path::new("/data");
        assert_eq!(resolve_dir(base, "captures"), PathBuf::from("/data/captures"));
    }

    #[test]
    fn resolve_dir_keeps_absolute_paths() {
        let base = Path::new("/data");
        assert_eq!(resolve_dir(base, "/srv/complete"), PathBuf::from("/srv/complete"));
    }
}
