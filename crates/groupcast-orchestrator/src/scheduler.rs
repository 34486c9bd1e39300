//! Trailing-edge debounce of grouping signals.
//!
//! Each signal key holds at most one pending signal; a new signal for the
//! same key replaces the pending one and restarts its window. A key is never
//! handed to the handler while a previous signal for it is still running.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::change::{GroupingSignal, SignalKey};

/// Receives debounced signals.
#[async_trait]
pub trait SignalHandler: Send + Sync + 'static {
    async fn handle_signal(&self, signal: GroupingSignal);
}

struct Pending {
    signal: GroupingSignal,
    due: Instant,
}

pub struct DebounceScheduler<H> {
    handler: Arc<H>,
    window: Duration,
    max_in_flight: usize,
    rx: mpsc::Receiver<GroupingSignal>,
    shutdown: watch::Receiver<bool>,
    pending: HashMap<SignalKey, Pending>,
    running: HashSet<SignalKey>,
}

impl<H: SignalHandler> DebounceScheduler<H> {
    pub fn new(
        handler: Arc<H>,
        rx: mpsc::Receiver<GroupingSignal>,
        shutdown: watch::Receiver<bool>,
        window: Duration,
        max_in_flight: usize,
    ) -> Self {
        Self {
            handler,
            window,
            max_in_flight: max_in_flight.max(1),
            rx,
            shutdown,
            pending: HashMap::new(),
            running: HashSet::new(),
        }
    }

    fn enqueue(&mut self, signal: GroupingSignal) {
        let key = signal.key();
        let due = Instant::now() + self.window;
        if let Some(previous) = self.pending.insert(key.clone(), Pending { signal, due }) {
            tracing::trace!(key = %key, superseded = %previous.signal, "Coalesced change signal");
        }
    }

    /// Earliest due time among keys that are free to run.
    fn next_due(&self) -> Option<Instant> {
        self.pending
            .iter()
            .filter(|(key, _)| !self.running.contains(*key))
            .map(|(_, pending)| pending.due)
            .min()
    }

    fn dispatch_due(&mut self, tasks: &mut JoinSet<SignalKey>) {
        let now = Instant::now();
        let mut due: Vec<SignalKey> = self
            .pending
            .iter()
            .filter(|(key, pending)| pending.due <= now && !self.running.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();
        due.sort();

        for key in due {
            if tasks.len() >= self.max_in_flight {
                break;
            }
            let Some(pending) = self.pending.remove(&key) else {
                continue;
            };
            self.running.insert(key.clone());
            let handler = Arc::clone(&self.handler);
            let signal = pending.signal;
            tasks.spawn(async move {
                tracing::debug!(%signal, "Handling change signal");
                let outcome = AssertUnwindSafe(handler.handle_signal(signal)).catch_unwind().await;
                if outcome.is_err() {
                    tracing::error!(key = %key, "Change signal handler panicked");
                }
                key
            });
        }
    }

    /// Run until shutdown is requested, or until the intake closes and all
    /// pending work is done. Pending signals are dropped on shutdown; running
    /// ones are awaited.
    pub async fn run(mut self) {
        let mut tasks: JoinSet<SignalKey> = JoinSet::new();
        let mut intake_open = true;
        tracing::info!(window_ms = self.window.as_millis() as u64, "Change scheduler started");

        loop {
            if !intake_open && self.pending.is_empty() && tasks.is_empty() {
                break;
            }
            let next_due = self.next_due();
            let sleep_target = next_due.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));
            let can_dispatch = next_due.is_some() && tasks.len() < self.max_in_flight;

            tokio::select! {
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                }
                signal = self.rx.recv(), if intake_open => match signal {
                    Some(signal) => self.enqueue(signal),
                    None => intake_open = false,
                },
                Some(done) = tasks.join_next(), if !tasks.is_empty() => match done {
                    Ok(key) => {
                        self.running.remove(&key);
                    }
                    Err(e) => tracing::warn!(error = %e, "Change signal task failed"),
                },
                _ = tokio::time::sleep_until(sleep_target), if can_dispatch => {
                    self.dispatch_due(&mut tasks);
                }
            }
        }

        if !self.pending.is_empty() {
            tracing::debug!(dropped = self.pending.len(), "Dropping pending change signals");
        }
        while let Some(done) = tasks.join_next().await {
            if let Err(e) = done {
                tracing::warn!(error = %e, "Change signal task failed");
            }
        }
        tracing::info!("Change scheduler stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groupcast_core::GroupingId;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<GroupingSignal>>,
    }

    #[async_trait]
    impl SignalHandler for Recorder {
        async fn handle_signal(&self, signal: GroupingSignal) {
            self.seen.lock().unwrap().push(signal);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_coalesces_to_latest() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(16);
        let (_stop, shutdown) = watch::channel(false);
        let scheduler = DebounceScheduler::new(Arc::clone(&recorder), rx, shutdown, Duration::from_secs(1), 4);
        let handle = tokio::spawn(scheduler.run());

        let id = GroupingId::group("g");
        for _ in 0..5 {
            tx.send(GroupingSignal::Changed(id.clone())).await.unwrap();
        }
        tx.send(GroupingSignal::Removed(id.clone())).await.unwrap();
        tx.send(GroupingSignal::Changed(GroupingId::area("a"))).await.unwrap();
        drop(tx);

        handle.await.unwrap();
        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort_by_key(|s| s.to_string());
        assert_eq!(
            seen,
            vec![
                GroupingSignal::Changed(GroupingId::area("a")),
                GroupingSignal::Removed(id),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_pending() {
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::channel(16);
        let (stop, shutdown) = watch::channel(false);
        let scheduler = DebounceScheduler::new(Arc::clone(&recorder), rx, shutdown, Duration::from_secs(10), 4);
        let handle = tokio::spawn(scheduler.run());

        tx.send(GroupingSignal::Changed(GroupingId::group("g"))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        stop.send(true).unwrap();
        handle.await.unwrap();
        assert!(recorder.seen.lock().unwrap().is_empty());
    }
}
