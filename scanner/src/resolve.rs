use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;
use vodscan_common::config::ResolverConfig;

/// Turns a content page URL into a directly playable media URL via
/// `streamlink <url> <quality> --stream-url`.
pub struct MediaResolver {
    config: ResolverConfig,
}

impl MediaResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self { config }
    }

    pub async fn resolve(&self, url: &str) -> Result<String, ResolveError> {
        if !self.config.enabled {
            return Ok(url.to_string());
        }

        let output = Command::new(&self.config.program)
            .arg(url)
            .arg(&self.config.quality)
            .arg("--stream-url")
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| ResolveError::Spawn(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        if !output.status.success() {
            // streamlink reports its errors on stdout
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = format!("{} {}", stdout.trim(), stderr.trim());
            return Err(ResolveError::Failed(message.trim().to_string()));
        }

        let media_url = parse_stream_url(&stdout)?;
        debug!(url, media_url, "media url resolved");
        Ok(media_url)
    }
}

/// The resolved URL is the last non-empty line of output.
pub fn parse_stream_url(stdout: &str) -> Result<String, ResolveError> {
    let line = stdout
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or_default();

    if line.contains("://") {
        Ok(line.to_string())
    } else {
        Err(ResolveError::NoUrl(line.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("failed to spawn resolver: {0}")]
    Spawn(String),
    #[error("resolver failed: {0}")]
    Failed(String),
    #[error("resolver printed no url (got '{0}')")]
    NoUrl(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(enabled: bool, program: &str) -> ResolverConfig {
        ResolverConfig {
            enabled,
            program: program.into(),
            quality: "best".into(),
        }
    }

    #[test]
    fn picks_last_url_line() {
        let out = "[cli][info] Found matching plugin\nhttps://cdn.example/hls/index.m3u8\n\n";
        assert_eq!(
            parse_stream_url(out).unwrap(),
            "https://cdn.example/hls/index.m3u8"
        );
    }

    #[test]
    fn rejects_output_without_url() {
        assert!(matches!(parse_stream_url(""), Err(ResolveError::NoUrl(_))));
        assert!(matches!(
            parse_stream_url("error: No playable streams found"),
            Err(ResolveError::NoUrl(_))
        ));
    }

    #[tokio::test]
    async fn disabled_resolver_passes_url_through() {
        let resolver = MediaResolver::new(config(false, "/nonexistent/streamlink"));
        assert_eq!(resolver.resolve("/data/vod.mp4").await.unwrap(), "/data/vod.mp4");
    }

    #[tokio::test]
    async fn missing_binary_is_spawn_error() {
        let resolver = MediaResolver::new(config(true, "/nonexistent/streamlink"));
        assert!(matches!(
            resolver.resolve("https://videos.example/v/1").await,
            Err(ResolveError::Spawn(_))
        ));
    }
}
