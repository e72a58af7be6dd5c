use std::process::Stdio;
use tokio::process::Command;

/// Ask ffprobe for the container duration of `media_url`, in seconds.
pub async fn probe_duration(ffprobe: &str, media_url: &str) -> Result<f64, ProbeError> {
    let output = Command::new(ffprobe)
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            media_url,
        ])
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ProbeError::Spawn(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::Failed(stderr.trim().to_string()));
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's bare duration output (`"3600.042000\n"`).
pub fn parse_duration(stdout: &str) -> Result<f64, ProbeError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| ProbeError::Unparseable(String::new()))?;

    match line.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Ok(secs),
        _ => Err(ProbeError::Unparseable(line.to_string())),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("failed to spawn ffprobe: {0}")]
    Spawn(String),
    #[error("ffprobe exited with error: {0}")]
    Failed(String),
    #[error("unparseable duration '{0}'")]
    Unparseable(String),
}
