use anyhow::{Context, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::path::Path;

pub const MIN_POLL_INTERVAL_SECS: u64 = 5;
pub const MAX_POLL_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const DEFAULT_CAPTURE_DIR: &str = "captures";
pub const DEFAULT_COMPLETE_DIR: &str = "complete";
pub const DEFAULT_FFMPEG_PATH: &str = "ffmpeg";
pub const DEFAULT_CAPTURE_EXTENSION: &str = "ts";
pub const DEFAULT_DATE_FORMAT: &str = "%Y%m%d-%H%M%S";
pub const DEFAULT_DIRECTORY_URL: &str = "http://127.0.0.1:8080";

/// Root configuration structure. Deserialized from `<data dir>/config.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub mfc: SiteConfig,
}

/// Settings shared by every site adapter.
#[derive(Debug, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Seconds between poll cycles. Clamped to [5, 3600].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Directory captures are written to while recording.
    #[serde(default = "default_capture_dir")]
    pub capture_dir: String,
    /// Directory finished captures are moved to.
    #[serde(default = "default_complete_dir")]
    pub complete_dir: String,
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    /// File extension of capture files, without the dot.
    #[serde(default = "default_capture_extension")]
    pub capture_extension: String,
    /// strftime pattern used for the timestamp in capture file names.
    #[serde(default = "default_date_format")]
    pub date_format: String,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            capture_dir: DEFAULT_CAPTURE_DIR.to_string(),
            complete_dir: DEFAULT_COMPLETE_DIR.to_string(),
            ffmpeg_path: DEFAULT_FFMPEG_PATH.to_string(),
            capture_extension: DEFAULT_CAPTURE_EXTENSION.to_string(),
            date_format: DEFAULT_DATE_FORMAT.to_string(),
        }
    }
}

impl GlobalConfig {
    pub fn effective_poll_interval(&self) -> u64 {
        self.poll_interval_secs
            .clamp(MIN_POLL_INTERVAL_SECS, MAX_POLL_INTERVAL_SECS)
    }

    /// Returns the configured date format, or the default if it contains
    /// specifiers chrono cannot render or renders a path separator.
    pub fn effective_date_format(&self) -> &str {
        let valid = !self.date_format.is_empty()
            && StrftimeItems::new(&self.date_format).all(|item| !matches!(item, Item::Error))
            && renders_single_component(&self.date_format);
        if valid {
            &self.date_format
        } else {
            DEFAULT_DATE_FORMAT
        }
    }
}

fn renders_single_component(format: &str) -> bool {
    let mut rendered = String::new();
    write!(rendered, "{}", Local::now().format(format)).is_ok()
        && !rendered.contains(['/', '\\'])
}

/// Site-specific settings, including the persisted watch-list.
#[derive(Debug, Serialize, Deserialize)]
pub struct SiteConfig {
    #[serde(default = "default_directory_url")]
    pub directory_url: String,
    /// Uids of watched broadcasters.
    #[serde(default)]
    pub watch: Vec<u64>,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            directory_url: DEFAULT_DIRECTORY_URL.to_string(),
            watch: Vec::new(),
        }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Writes `config` to `path`, creating the parent directory if needed.
pub fn save(path: &Path, config: &Config) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write config file: {}", path.display()))
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_capture_dir() -> String {
    DEFAULT_CAPTURE_DIR.to_string()
}

fn default_complete_dir() -> String {
    DEFAULT_COMPLETE_DIR.to_string()
}

fn default_ffmpeg_path() -> String {
    DEFAULT_FFMPEG_PATH.to_string()
}

fn default_capture_extension() -> String {
    DEFAULT_CAPTURE_EXTENSION.to_string()
}

fn default_date_format() -> String {
    DEFAULT_DATE_FORMAT.to_string()
}

fn default_directory_url() -> String {
    DEFAULT_DIRECTORY_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_global(poll_secs: u64) -> GlobalConfig {
        GlobalConfig {
            poll_interval_secs: poll_secs,
            ..GlobalConfig::default()
        }
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn global_config_default_values() {
        let g = GlobalConfig::default();
        assert_eq!(g.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(g.capture_dir, DEFAULT_CAPTURE_DIR);
        assert_eq!(g.complete_dir, DEFAULT_COMPLETE_DIR);
        assert_eq!(g.ffmpeg_path, DEFAULT_FFMPEG_PATH);
        assert_eq!(g.date_format, DEFAULT_DATE_FORMAT);
    }

    #[test]
    fn config_default_has_empty_watch_list() {
        let c = Config::default();
        assert!(c.mfc.watch.is_empty());
        assert_eq!(c.mfc.directory_url, DEFAULT_DIRECTORY_URL);
    }

    // ── effective_poll_interval ───────────────────────────────────────────────

    #[test]
    fn effective_poll_interval_passes_valid_values() {
        assert_eq!(make_global(60).effective_poll_interval(), 60);
    }

    #[test]
    fn effective_poll_interval_clamps() {
        assert_eq!(make_global(1).effective_poll_interval(), MIN_POLL_INTERVAL_SECS);
        assert_eq!(make_global(99_999).effective_poll_interval(), MAX_POLL_INTERVAL_SECS);
    }

    // ── effective_date_format ─────────────────────────────────────────────────

    #[test]
    fn effective_date_format_keeps_valid_pattern() {
        let g = GlobalConfig {
            date_format: "%Y-%m-%d".to_string(),
            ..GlobalConfig::default()
        };
        assert_eq!(g.effective_date_format(), "%Y-%m-%d");
    }

    #[test]
    fn effective_date_format_rejects_invalid_pattern() {
        let g = GlobalConfig {
            date_format: "%Q%".to_string(),
            ..GlobalConfig::default()
        };
        assert_eq!(g.effective_date_format(), DEFAULT_DATE_FORMAT);
    }

    #[test]
    fn effective_date_format_rejects_path_separators() {
        for pattern in ["%Y/%m/%d", "%D", "%Y\\%m"] {
            let g = GlobalConfig {
                date_format: pattern.to_string(),
                ..GlobalConfig::default()
            };
            assert_eq!(g.effective_date_format(), DEFAULT_DATE_FORMAT, "{pattern}");
        }
    }

    // ── load_or_default / save ────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nonexistent.toml");
        let config = load_or_default(&path).unwrap();
        assert_eq!(config.global.poll_interval_secs, DEFAULT_POLL_INTERVAL_SECS);
        assert!(config.mfc.watch.is_empty());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[global]
poll_interval_secs = 45
capture_dir = "/srv/captures"

[mfc]
directory_url = "http://directory.local"
watch = [101, 202]
"#,
        )
        .unwrap();

        let config = load_or_default(&path).unwrap();
        assert_eq!(config.global.poll_interval_secs, 45);
        assert_eq!(config.global.capture_dir, "/srv/captures");
        assert_eq!(config.global.complete_dir, DEFAULT_COMPLETE_DIR);
        assert_eq!(config.mfc.directory_url, "http://directory.local");
        assert_eq!(config.mfc.watch, vec![101, 202]);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn save_then_load_keeps_watch_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = Config::default();
        config.mfc.watch = vec![7, 8, 9];
        config.global.poll_interval_secs = 12;

        save(&path, &config).unwrap();
        let loaded = load_or_default(&path).unwrap();

        assert_eq!(loaded.mfc.watch, vec![7, 8, 9]);
        assert_eq!(loaded.global.poll_interval_secs, 12);
    }
}
