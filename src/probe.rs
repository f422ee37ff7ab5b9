use std::path::Path;

use anyhow::{Context, Result};
use tokio::process::Command;

/// Container duration in seconds, as reported by ffprobe.
pub async fn video_duration<P: AsRef<Path>>(file_path: P) -> Result<f64> {
    let output = Command::new("ffprobe")
        .arg("-v")
        .arg("error")
        .arg("-show_entries")
        .arg("format=duration")
        .arg("-of")
        .arg("default=noprint_wrappers=1:nokey=1")
        .arg(file_path.as_ref())
        .output()
        .await
        .context("Failed to execute ffprobe")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("ffprobe failed: {}", stderr);
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

fn parse_duration(raw: &str) -> Result<f64> {
    let duration = raw
        .trim()
        .parse::<f64>()
        .context("Failed to parse duration")?;

    if !duration.is_finite() || duration < 0.0 {
        anyhow::bail!("ffprobe reported a nonsensical duration: {}", duration);
    }
    Ok(duration)
}

/// Whole seconds, rounded half away from zero.
pub fn whole_seconds(duration: f64) -> i64 {
    duration.round() as i64
}

/// First line of `ffprobe -version`, if the binary is on the path.
pub fn ffprobe_version() -> Option<String> {
    let output = std::process::Command::new("ffprobe")
        .arg("-version")
        .output()
        .ok()?;

    if !output.status.success() {
        return None;
    }

    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
}
