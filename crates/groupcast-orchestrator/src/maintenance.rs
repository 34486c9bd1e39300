//! Periodic maintenance: full resync and orphan cleanup.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use groupcast_core::{Backend, NativeHandle};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::orchestrator::{Orchestrator, SyncScope};
use crate::report::SyncSummary;

/// Outcome of one maintenance sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub sync: Option<SyncSummary>,
    pub orphans_removed: usize,
    pub orphans_pending: usize,
}

pub struct Maintenance {
    orchestrator: Arc<Orchestrator>,
    /// Unowned groups seen in the previous sweep.
    suspects: Mutex<HashSet<(Backend, NativeHandle)>>,
}

impl Maintenance {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            orchestrator,
            suspects: Mutex::new(HashSet::new()),
        }
    }

    /// Resync everything, then sweep orphans.
    pub async fn run_once(&self) -> MaintenanceReport {
        let sync = match self.orchestrator.sync(SyncScope::All).await {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!(error = %e, "Periodic sync failed");
                None
            }
        };
        let (orphans_removed, orphans_pending) = self.cleanup_orphans().await;
        MaintenanceReport {
            sync,
            orphans_removed,
            orphans_pending,
        }
    }

    /// Delete managed native groups that no mapping references.
    ///
    /// A group has to be unowned in two consecutive sweeps before it is
    /// deleted, so groups created by a pass that has not persisted yet are
    /// left alone. Returns (removed, still suspected).
    pub async fn cleanup_orphans(&self) -> (usize, usize) {
        let previous = match self.suspects.lock() {
            Ok(mut suspects) => std::mem::take(&mut *suspects),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };
        let mut seen = HashSet::new();
        let mut removed = 0usize;

        for (backend, handler) in self.orchestrator.handlers().iter() {
            let listed = match self
                .orchestrator
                .guarded("list_managed_groups", handler.list_managed_groups())
                .await
            {
                Ok(listed) => listed,
                Err(e) => {
                    tracing::debug!(backend = %backend, error = %e, "Cannot enumerate native groups");
                    continue;
                }
            };

            for handle in listed {
                if self.orchestrator.store().handle_owner(&handle).is_some() {
                    continue;
                }
                let candidate = (backend, handle);
                if !previous.contains(&candidate) {
                    seen.insert(candidate);
                    continue;
                }
                let (_, handle) = &candidate;
                match self
                    .orchestrator
                    .guarded("delete_group", handler.delete_group(handle))
                    .await
                {
                    Ok(()) => {
                        tracing::info!(backend = %backend, handle = %handle, "Removed orphaned native group");
                        removed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(backend = %backend, handle = %handle, error = %e, "Failed to remove orphaned native group");
                        seen.insert(candidate);
                    }
                }
            }
        }

        let pending = seen.len();
        match self.suspects.lock() {
            Ok(mut suspects) => *suspects = seen,
            Err(poisoned) => *poisoned.into_inner() = seen,
        }
        (removed, pending)
    }

    /// Sweep every `reconcile_interval` until shutdown. The first sweep runs
    /// immediately.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let period = self.orchestrator.config().reconcile_interval();
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_secs = period.as_secs(), "Maintenance started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    let report = self.run_once().await;
                    tracing::debug!(
                        removed = report.orphans_removed,
                        pending = report.orphans_pending,
                        "Maintenance sweep finished"
                    );
                }
            }
        }
        tracing::info!("Maintenance stopped");
    }
}
