//! Revoked access tokens, kept until their natural expiry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::utils::hash_token;

#[async_trait]
pub trait TokenBlacklist: Send + Sync {
    /// Shadow `token` until `expires_at`. Idempotent.
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<(), anyhow::Error>;

    async fn is_revoked(&self, token: &str) -> Result<bool, anyhow::Error>;

    /// Drop entries whose expiry has passed. Returns the number removed.
    async fn sweep(&self) -> Result<usize, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

/// Single-process blacklist keyed by token hash.
///
/// Revocations are not visible to other instances; use the Redis backend
/// when running more than one.
#[derive(Default)]
pub struct InMemoryBlacklist {
    entries: DashMap<String, DateTime<Utc>>,
}

impl InMemoryBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.entries.len())
    }
}

#[async_trait]
impl TokenBlacklist for InMemoryBlacklist {
    async fn revoke(&self, token: &str, expires_at: DateTime<Utc>) -> Result<(), anyhow::Error> {
        self.entries
            .entry(hash_token(token))
            .and_modify(|existing| {
                if expires_at > *existing {
                    *existing = expires_at;
                }
            })
            .or_insert(expires_at);
        Ok(())
    }

    async fn is_revoked(&self, token: &str) -> Result<bool, anyhow::Error> {
        Ok(self.entries.contains_key(&hash_token(token)))
    }

    async fn sweep(&self) -> Result<usize, anyhow::Error> {
        Ok(self.sweep_at(Utc::now()))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// Run `sweep` every `period` until `cancel` fires.
pub fn spawn_sweeper(
    blacklist: Arc<dyn TokenBlacklist>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick completes immediately.
        interval.tick().await;

        tracing::info!(period_secs = period.as_secs(), "Blacklist sweeper started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Blacklist sweeper stopping");
                    break;
                }
                _ = interval.tick() => {
                    match blacklist.sweep().await {
                        Ok(0) => {}
                        Ok(removed) => tracing::debug!(removed, "Swept expired blacklist entries"),
                        Err(e) => tracing::error!(error = %e, "Blacklist sweep failed"),
                    }
                }
            }
        }
    })
}
