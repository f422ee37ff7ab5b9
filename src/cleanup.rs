use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::fs;
use tracing::{error, info, warn};

use crate::config::Config;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub bytes_freed: u64,
}

/// Removes uploads left behind by requests that never handed their file to
/// the media host.
pub async fn sweep_stale_uploads(
    upload_dir: &Path,
    max_age: Duration,
    now: SystemTime,
) -> anyhow::Result<SweepReport> {
    let mut report = SweepReport::default();

    if !upload_dir.exists() {
        return Ok(report);
    }

    let mut entries = fs::read_dir(upload_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        let metadata = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                warn!("[cleanup] Failed to get metadata for {:?}: {}", path, e);
                continue;
            }
        };

        let modified = match metadata.modified() {
            Ok(m) => m,
            Err(e) => {
                warn!("[cleanup] Failed to get modification time for {:?}: {}", path, e);
                continue;
            }
        };

        let age = match now.duration_since(modified) {
            Ok(d) => d,
            Err(_) => continue,
        };

        if age <= max_age {
            continue;
        }

        let (size, removed) = if metadata.is_dir() {
            let size = dir_size(&path).await.unwrap_or(0);
            (size, fs::remove_dir_all(&path).await)
        } else {
            (metadata.len(), fs::remove_file(&path).await)
        };

        match removed {
            Ok(()) => {
                report.deleted += 1;
                report.bytes_freed += size;
                info!(
                    "[cleanup] ✅ Deleted stale upload: {:?} (age: {:.1} min)",
                    path,
                    age.as_secs_f64() / 60.0
                );
            }
            Err(e) => error!("[cleanup] ❌ Failed to delete {:?}: {}", path, e),
        }
    }

    Ok(report)
}

async fn dir_size(dir: &Path) -> anyhow::Result<u64> {
    let mut total_size = 0u64;
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = match fs::read_dir(&current).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!("[cleanup] Failed to read directory {:?}: {}", current, e);
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                pending.push(entry.path());
            } else {
                total_size += metadata.len();
            }
        }
    }

    Ok(total_size)
}

pub fn start_cleanup_task(config: Arc<Config>) -> tokio::task::JoinHandle<()> {
    let max_age = Duration::from_secs(config.limits.cleanup_max_age_seconds);
    let every = Duration::from_secs(config.limits.cleanup_interval_seconds.max(1));

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            "[cleanup] 🧹 Sweeping {:?} every {:.1} min (max age: {:.1} min)",
            config.upload_dir,
            every.as_secs_f64() / 60.0,
            max_age.as_secs_f64() / 60.0
        );

        loop {
            interval.tick().await;

            match sweep_stale_uploads(&config.upload_dir, max_age, SystemTime::now()).await {
                Ok(report) if report.deleted > 0 => info!(
                    "[cleanup] {} stale uploads removed, {:.2} MB freed",
                    report.deleted,
                    report.bytes_freed as f64 / 1024.0 / 1024.0
                ),
                Ok(_) => {}
                Err(e) => error!("[cleanup] Periodic sweep error: {}", e),
            }
        }
    })
}
