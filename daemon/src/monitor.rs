use tokio::sync::mpsc;
use tokio::time::{interval, Duration, MissedTickBehavior};

use crate::event::DaemonEvent;

/// Emits [`DaemonEvent::Poll`] immediately and then every `interval_secs`
/// seconds.  Ticks missed while a slow cycle is running are skipped rather
/// than queued.
pub async fn run(interval_secs: u64, tx: mpsc::Sender<DaemonEvent>) {
    let mut ticker = interval(Duration::from_secs(interval_secs));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if tx.send(DaemonEvent::Poll).await.is_err() {
            break;
        }
    }
}
