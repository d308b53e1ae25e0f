mod capture;
mod config;
mod directory;
mod error;
mod event;
mod logging;
mod monitor;
mod orchestrator;
mod paths;
mod pending;
mod reconcile;
mod site;
mod state;
mod status;
#[cfg(test)]
mod testing;
mod tracker;

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{error, info};

use crate::capture::FfmpegLauncher;
use crate::directory::HttpDirectoryClient;
use crate::orchestrator::{CaptureSettings, Orchestrator};
use crate::pending::PendingChangeLoader;
use crate::site::Site;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    logging::init();

    // ── Data directory ────────────────────────────────────────────────────────
    let app_dir = paths::app_data_dir();
    if let Err(e) = std::fs::create_dir_all(&app_dir) {
        error!("Failed to create data directory {}: {e}", app_dir.display());
        std::process::exit(1);
    }

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths::config_file_path();
    let mut config = match config::load_or_default(&config_path) {
        Ok(c) => c,
        Err(e) => {
            error!("{e:#}");
            std::process::exit(1);
        }
    };

    // ── Initial status ────────────────────────────────────────────────────────
    let status_path = paths::status_file_path();
    let mut current_status = status::DaemonStatus::new();
    status::write_status(&status_path, &current_status);

    let (event_tx, mut event_rx) = mpsc::channel::<event::DaemonEvent>(32);

    // ── Site ──────────────────────────────────────────────────────────────────
    let client = match HttpDirectoryClient::new(&config.mfc.directory_url) {
        Ok(c) => Arc::new(c),
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };
    let launcher = Arc::new(FfmpegLauncher::new(
        &config.global.ffmpeg_path,
        paths::resolve_dir(&app_dir, &config.global.capture_dir),
        paths::resolve_dir(&app_dir, &config.global.complete_dir),
        event_tx.clone(),
    ));
    let orchestrator = Orchestrator::new(
        launcher,
        CaptureSettings {
            capture_dir: paths::resolve_dir(&app_dir, &config.global.capture_dir),
            complete_dir: paths::resolve_dir(&app_dir, &config.global.complete_dir),
            date_format: config.global.effective_date_format().to_string(),
            extension: config.global.capture_extension.clone(),
        },
    );
    let updates_path = paths::updates_file_path();
    let mut site = Site::new(
        client,
        PendingChangeLoader::new(updates_path.clone()),
        config.mfc.watch.clone(),
        orchestrator,
    );

    if let Err(e) = site.connect().await {
        error!("{e}");
        current_status.error = Some(e.to_string());
        status::write_status(&status_path, &current_status);
        std::process::exit(1);
    }

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(pending::watch_updates(updates_path, event_tx.clone()));
    tokio::spawn(monitor::run(
        config.global.effective_poll_interval(),
        event_tx.clone(),
    ));

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(event::DaemonEvent::Shutdown).await;
            }
        });
    }
    drop(event_tx);

    info!(
        "streamcap-daemon v{} started, watching {} streamer(s)",
        env!("CARGO_PKG_VERSION"),
        site.watch_list().len()
    );

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            event::DaemonEvent::Poll => {
                apply_pending_changes(&mut site, &mut config, &config_path).await;
                let capturable = site.poll_all().await;
                site.record_all(&capturable, false).await;

                current_status.last_poll = Some(chrono::Local::now().to_rfc3339());
                current_status.update(site.entries(), site.capturing());
                status::write_status(&status_path, &current_status);
            }

            event::DaemonEvent::UpdatesChanged => {
                apply_pending_changes(&mut site, &mut config, &config_path).await;
            }

            event::DaemonEvent::CaptureExited { uid } => {
                site.capture_exited(uid);
                current_status.update(site.entries(), site.capturing());
                status::write_status(&status_path, &current_status);
            }

            event::DaemonEvent::Shutdown => {
                info!("Shutting down");
                current_status.state = status::DaemonState::Stopping;
                status::write_status(&status_path, &current_status);

                site.shutdown().await;
                site.disconnect();

                current_status.update(site.entries(), site.capturing());
                status::write_status(&status_path, &current_status);
                break;
            }
        }
    }
}

/// Claims pending changes, applies them, and persists the watch-list when it changed.
async fn apply_pending_changes(
    site: &mut Site,
    config: &mut config::Config,
    config_path: &std::path::Path,
) {
    let bundle = site.process_pending_changes();
    if bundle.is_empty() {
        return;
    }
    if site.reconcile(bundle).await {
        config.mfc.watch = site.watch_list().to_vec();
        if let Err(e) = config::save(config_path, config) {
            error!("{e:#}");
        }
    }
}
