//! Background sweep that deletes session directories past the retention
//! window.

use super::registry::SessionRegistry;
use crate::domain::session::SessionId;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Registered sessions evicted
    pub evicted: usize,
    /// Unregistered directories removed (left behind by an earlier process)
    pub orphans_removed: usize,
    pub failures: usize,
}

pub struct Reaper {
    registry: SessionRegistry,
    retention: Duration,
    interval: Duration,
}

impl Reaper {
    pub fn new(registry: SessionRegistry, retention: Duration, interval: Duration) -> Self {
        Self {
            registry,
            retention,
            interval,
        }
    }

    /// Sweep immediately, then every `interval`, until `shutdown` fires.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(
                retention_secs = self.retention.as_secs(),
                interval_secs = self.interval.as_secs(),
                "reaper started"
            );

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::info!("reaper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let report = self.sweep(Utc::now()).await;
                        if report != SweepReport::default() {
                            tracing::info!(
                                evicted = report.evicted,
                                orphans_removed = report.orphans_removed,
                                failures = report.failures,
                                "reaper sweep finished"
                            );
                        }
                    }
                }
            }
        })
    }

    /// One pass over the registry and the artifact root, as seen at `now`.
    /// Every failure is logged and skipped.
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = chrono::Duration::from_std(self.retention)
            .unwrap_or_else(|_| chrono::Duration::days(36500));
        let mut report = SweepReport::default();

        for id in self.registry.expired(now, retention) {
            match self.registry.evict(&id).await {
                Ok(true) => {
                    tracing::debug!(session_id = %id, "session expired");
                    report.evicted += 1;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(session_id = %id, error = %e, "failed to evict session");
                    report.failures += 1;
                }
            }
        }

        self.sweep_orphans(now, retention, &mut report).await;
        report
    }

    async fn sweep_orphans(
        &self,
        now: DateTime<Utc>,
        retention: chrono::Duration,
        report: &mut SweepReport,
    ) {
        let root = self.registry.root();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(root = %root.display(), error = %e, "cannot list artifact root");
                report.failures += 1;
                return;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(error = %e, "cannot read artifact root entry");
                    report.failures += 1;
                    break;
                }
            };

            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            if let Ok(id) = name.parse::<SessionId>() {
                if self.registry.contains(&id) {
                    continue;
                }
            }

            let metadata = match entry.metadata().await {
                Ok(metadata) if metadata.is_dir() => metadata,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "cannot stat directory");
                    report.failures += 1;
                    continue;
                }
            };
            let modified: DateTime<Utc> = match metadata.modified() {
                Ok(modified) => modified.into(),
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "no modification time");
                    report.failures += 1;
                    continue;
                }
            };
            if now - modified <= retention {
                continue;
            }

            match tokio::fs::remove_dir_all(entry.path()).await {
                Ok(()) => {
                    tracing::debug!(dir = %name, "orphaned directory removed");
                    report.orphans_removed += 1;
                }
                Err(e) => {
                    tracing::warn!(dir = %name, error = %e, "failed to remove orphaned directory");
                    report.failures += 1;
                }
            }
        }
    }
}
