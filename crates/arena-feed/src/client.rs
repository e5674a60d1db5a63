//! HTTP client for the arena feed
//!
//! One GET per call, bounded by the configured timeout. No retries: a
//! failure surfaces to the caller immediately.

use crate::{ArenaSnapshot, FeedError, Result};
use std::time::Duration;
use tracing::debug;

/// Feed client configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Whole-request timeout (connect, headers and body)
    pub timeout: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

/// Arena feed client
#[derive(Debug, Clone)]
pub struct FeedClient {
    config: FeedConfig,
    client: reqwest::Client,
}

impl FeedClient {
    pub fn new(config: FeedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FeedError::Unreachable(format!("HTTP client init failed: {}", e)))?;

        Ok(Self { config, client })
    }

    pub fn timeout(&self) -> Duration {
        self.config.timeout
    }

    /// Download and parse one arena snapshot
    pub async fn fetch(&self, url: &str) -> Result<ArenaSnapshot> {
        debug!("Fetching arena feed from {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FeedError::Unreachable(describe(&e)))?;

        if !response.status().is_success() {
            return Err(FeedError::Unreachable(format!(
                "feed returned status: {}",
                response.status()
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FeedError::Unreachable(describe(&e)))?;

        let snapshot = ArenaSnapshot::from_slice(&body)?;
        debug!(
            "Arena feed: {} turrets, {} globes",
            snapshot.turret_count(),
            snapshot.globe_count()
        );
        Ok(snapshot)
    }
}

fn describe(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        format!("request timed out: {}", err)
    } else {
        err.to_string()
    }
}
