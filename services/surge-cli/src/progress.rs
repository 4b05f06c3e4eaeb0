//! Live progress line fed from the controller's snapshots.

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use std::time::Duration;
use surge_core::duration::format_duration;
use surge_engine::{ControllerSnapshot, RunStats};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Render snapshots until the controller drops its sender.
pub fn spawn(
    mut snapshots: watch::Receiver<ControllerSnapshot>,
    stats: Arc<RunStats>,
    total: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let pb = ProgressBar::new_spinner();
        let style =
            ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}");
        if let Ok(style) = style {
            pb.set_style(style);
        }
        pb.enable_steady_tick(Duration::from_millis(120));
        pb.set_message("Starting workers...");

        let total = format_duration(total);
        while snapshots.changed().await.is_ok() {
            let snapshot = *snapshots.borrow_and_update();
            pb.set_message(format!(
                "{} / {} | workers {} (desired {}, retiring {}) | requests {} ({} failed)",
                format_duration(Duration::from_secs(snapshot.elapsed.as_secs())),
                total,
                snapshot.live,
                snapshot.desired,
                snapshot.retiring,
                stats.total(),
                stats.failed()
            ));
        }

        pb.finish_and_clear();
    })
}
