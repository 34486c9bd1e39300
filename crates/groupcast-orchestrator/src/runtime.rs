//! Background tasks around an [`Orchestrator`].

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::change::{intake, ChangeDetector, ChangeIntake};
use crate::maintenance::Maintenance;
use crate::orchestrator::Orchestrator;
use crate::scheduler::DebounceScheduler;

/// A started orchestrator: change intake, debounce scheduler and periodic
/// maintenance.
pub struct RunningOrchestrator {
    orchestrator: Arc<Orchestrator>,
    intake: ChangeIntake,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Spawn the scheduler and maintenance tasks.
    ///
    /// The store was loaded in full when the orchestrator was built, so
    /// signals are accepted right away.
    pub fn start(self: Arc<Self>) -> RunningOrchestrator {
        let config = self.config().clone();
        let (intake, rx) = intake(ChangeDetector::new(config.groupings.clone()), config.change_queue_capacity);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let scheduler = DebounceScheduler::new(
            Arc::clone(&self),
            rx,
            shutdown_rx.clone(),
            config.sync_debounce(),
            config.max_concurrent_reconciles,
        );
        let maintenance = Maintenance::new(Arc::clone(&self));
        let tasks = vec![
            tokio::spawn(scheduler.run()),
            tokio::spawn(maintenance.run(shutdown_rx)),
        ];
        tracing::info!(
            debounce_ms = config.sync_debounce_ms,
            backends = ?self.handlers().backends().collect::<Vec<_>>(),
            "Orchestrator started"
        );

        RunningOrchestrator {
            orchestrator: self,
            intake,
            shutdown,
            tasks,
        }
    }
}

impl RunningOrchestrator {
    pub fn orchestrator(&self) -> &Arc<Orchestrator> {
        &self.orchestrator
    }

    /// Handle for submitting change events.
    pub fn intake(&self) -> ChangeIntake {
        self.intake.clone()
    }

    /// Stop accepting signals and wait for running passes to finish.
    pub async fn shutdown(self) {
        tracing::info!("Shutting down orchestrator");
        let _ = self.shutdown.send(true);
        drop(self.intake);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Orchestrator task failed");
            }
        }
        tracing::info!("Orchestrator stopped");
    }
}
