//! Periodic refresh task
//!
//! Runs once on startup, then on every tick: syncs each playlist whose
//! refresh interval has elapsed (or that was never synced).

use std::time::Duration;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::SyncError;
use crate::services::sync::SyncEngine;

/// Configuration for the refresh task
pub struct RefreshConfig {
    /// How often to look for due playlists (in seconds)
    pub tick_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            tick_secs: 300, // Every 5 minutes
        }
    }
}

impl RefreshConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick_secs: config.scheduler_tick_secs.max(1),
        }
    }
}

/// Result of one refresh pass
#[derive(Debug, Default)]
pub struct RefreshResult {
    pub synced: usize,
    pub cancelled: usize,
    pub errors: Vec<String>,
}

impl RefreshResult {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn attempted(&self) -> usize {
        self.synced + self.cancelled + self.errors.len()
    }
}

/// Run a single refresh pass
pub async fn run_refresh(engine: &SyncEngine) -> RefreshResult {
    let mut result = RefreshResult::default();

    match engine.sync_stale().await {
        Ok(outcomes) => {
            for (playlist_id, outcome) in outcomes {
                match outcome {
                    Ok(_) => result.synced += 1,
                    Err(SyncError::Cancelled) => result.cancelled += 1,
                    Err(e) => result.errors.push(format!("{}: {}", playlist_id, e)),
                }
            }
        }
        Err(e) => {
            result.errors.push(format!("Listing playlists failed: {}", e));
            tracing::error!("Refresh: listing playlists failed: {}", e);
        }
    }

    if result.attempted() > 0 {
        tracing::info!(
            "Refresh: {} synced, {} cancelled, {} failed",
            result.synced,
            result.cancelled,
            result.errors.len()
        );
    }
    result
}

/// Start the background refresh task
///
/// Runs immediately, then every `tick_secs` until `shutdown` is cancelled.
/// This should be spawned as a background task using `tokio::spawn`.
pub async fn start_refresh_task(engine: SyncEngine, config: RefreshConfig, shutdown: CancellationToken) {
    tracing::info!("Starting refresh task (tick: {}s)", config.tick_secs);

    let mut interval = time::interval(Duration::from_secs(config.tick_secs));
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Refresh task stopped");
                return;
            }
            _ = interval.tick() => {}
        }

        let result = run_refresh(&engine).await;
        if !result.is_success() {
            for error in &result.errors {
                tracing::warn!("Refresh error: {}", error);
            }
        }
    }
}
