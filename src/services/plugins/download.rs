//! Archive Download
//!
//! Fetches plugin archives to a local file with retry and exponential
//! backoff. `http(s)://` URLs are streamed through reqwest; `file://` URLs
//! (local mirrors) are copied.

use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use url::Url;

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};

/// How often and how patiently a download is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub attempts: u32,
    /// Delay after the first failure; doubled after each further failure
    pub initial_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, initial_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            initial_backoff,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.download_attempts,
            Duration::from_millis(config.download_backoff_ms),
        )
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Archive downloader.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Downloader {
    pub fn new(policy: RetryPolicy) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .user_agent("inkpad-desktop")
            .build()
            .map_err(|e| AppError::download(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client, policy })
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Download `url` to `dest`, returning the number of bytes written.
    ///
    /// An attempt that yields an empty file counts as failed.
    pub async fn download(&self, url: &str, dest: &Path) -> AppResult<u64> {
        let parsed = Url::parse(url)
            .map_err(|e| AppError::download(format!("Invalid download URL '{}': {}", url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https" | "file") {
            return Err(AppError::download(format!(
                "Unsupported URL scheme '{}'",
                parsed.scheme()
            )));
        }

        let mut last_error = None;
        for attempt in 1..=self.policy.attempts {
            match self.attempt(&parsed, dest).await {
                Ok(0) => {
                    warn!(url = %url, attempt, "Downloaded archive is empty");
                    last_error = Some(AppError::download("downloaded archive is empty"));
                }
                Ok(bytes) => {
                    info!(url = %url, bytes, attempt, "Downloaded plugin archive");
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(url = %url, attempt, "Download attempt failed: {}", e);
                    last_error = Some(e);
                }
            }

            if attempt < self.policy.attempts {
                let delay = self.policy.delay_after(attempt);
                debug!(url = %url, delay_ms = delay.as_millis() as u64, "Retrying download");
                tokio::time::sleep(delay).await;
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no attempts made".to_string());
        Err(AppError::download(format!(
            "{} failed after {} attempts: {}",
            url, self.policy.attempts, reason
        )))
    }

    async fn attempt(&self, url: &Url, dest: &Path) -> AppResult<u64> {
        if url.scheme() == "file" {
            let source = url
                .to_file_path()
                .map_err(|_| AppError::download(format!("Invalid file URL {}", url)))?;
            return Ok(tokio::fs::copy(&source, dest).await?);
        }

        let response = self.client.get(url.clone()).send().await?;
        if !response.status().is_success() {
            return Err(AppError::download(format!("HTTP {}", response.status())));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        Ok(written)
    }
}
