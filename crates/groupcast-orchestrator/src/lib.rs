//! Groupcast orchestration engine.
//!
//! Keeps protocol-native groups in step with user groupings and routes
//! commands through them.
//!
//! ## Architecture
//!
//! ```text
//! ChangeEvent ──▶ ChangeDetector ──▶ ChangeIntake ──▶ DebounceScheduler
//!                                                         │
//!                                                         ▼
//!   dispatch() ─────────────────────────────────────▶ Orchestrator ──▶ HandlerSet
//!                                                         │
//!                                                         ▼
//!                                                    MappingStore
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use groupcast_core::GroupcastConfig;
//! use groupcast_handlers::HandlerSet;
//! use groupcast_orchestrator::Orchestrator;
//! # async fn example(
//! #     registry: Arc<dyn groupcast_core::GroupingRegistry>,
//! #     unicast: Arc<dyn groupcast_core::UnicastService>,
//! # ) -> groupcast_orchestrator::Result<()> {
//! let config = GroupcastConfig::from_env()?;
//! let handlers = HandlerSet::builder().config(&config).build();
//! let orchestrator = Arc::new(Orchestrator::open(config, registry, unicast, handlers)?);
//! let running = orchestrator.start();
//! // feed running.intake() from the host's event bus
//! running.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod dispatch;
pub mod error;
pub mod locks;
pub mod maintenance;
pub mod orchestrator;
pub mod report;
pub mod runtime;
pub mod scheduler;

pub use change::{intake, ChangeDetector, ChangeEvent, ChangeIntake, GroupingSignal, RegistryAction, SignalKey};
pub use error::{OrchestratorError, Result};
pub use locks::KeyedLocks;
pub use maintenance::{Maintenance, MaintenanceReport};
pub use orchestrator::{Orchestrator, StatusQuery, SyncScope};
pub use report::{
    DispatchOutcome, DispatchReport, DispatchRoute, EntityPlacement, EntityStatus, Failure, FailureKind, LastPass,
    GroupingState, GroupingStatus, KeyAction, KeyOutcome, KeyStatus, ReconcileReport, SceneFailure,
    StatusSnapshot, SyncResult, SyncSummary, UnmappedReason,
};
pub use runtime::RunningOrchestrator;
pub use scheduler::{DebounceScheduler, SignalHandler};
