//! Sync orchestration
//!
//! Drives one push-then-pull cycle at a time: drain the outbound queue
//! sequentially, then fetch the authoritative delta and advance the
//! checkpoint only if the pull succeeded. Overlapping `sync` calls are
//! coalesced (single-flight), and an offline signal stops the cycle
//! between items without cancelling the one in flight.
//!
//! Push and pull are two independent calls with a retry gap in between;
//! the queue and the checkpoint each guarantee their own at-least-once
//! delivery, so no cross-call transaction is needed.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::db::EventStore;
use crate::error::Result;
use crate::sync::transport::{SendOutcome, SyncTransport, TransportError};

/// Where the engine currently is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncPhase {
    #[default]
    Idle,
    Pushing,
    Pulling,
    Offline,
}

/// Snapshot of the engine's state for the UI to poll or subscribe to
#[derive(Debug, Clone, Default)]
pub struct SyncStatus {
    pub phase: SyncPhase,
    pub is_online: bool,
    pub is_syncing: bool,
    /// Completion time of the last fully successful cycle
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Changes still waiting to be pushed
    pub pending_count: u64,
    /// Most recent sync problem, cleared by the next clean cycle
    pub error: Option<String>,
}

/// What a `sync` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncReport {
    /// Another cycle was already in flight; nothing was done
    AlreadyRunning,
    /// No connectivity; nothing was sent and the queue is intact
    Offline,
    /// The server refused the credential; external re-authentication is
    /// required before syncing can resume
    AuthRequired,
    /// A full cycle ran (though individual items or the pull may have
    /// failed; see the summary and status error)
    Completed(SyncSummary),
}

/// Per-cycle accounting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Items confirmed by the server and removed from the queue
    pub pushed: usize,
    /// Items that failed transiently and stay queued
    pub retried: usize,
    /// Items rejected permanently and parked
    pub failed: usize,
    /// Records applied from the pulled delta
    pub pulled: usize,
    /// Whether the pull succeeded and the checkpoint advanced
    pub pull_ok: bool,
}

/// Coordinates the queue, transport, and checkpoint
///
/// Constructed once at application start with its dependencies injected;
/// clients share it behind an `Arc`.
pub struct SyncOrchestrator<T: SyncTransport> {
    store: Arc<EventStore>,
    transport: T,
    connectivity: watch::Receiver<bool>,
    in_flight: Mutex<()>,
    status_tx: watch::Sender<SyncStatus>,
}

impl<T: SyncTransport> SyncOrchestrator<T> {
    /// Create an orchestrator over an event store, a transport, and an
    /// external connectivity signal (`true` = online)
    pub fn new(store: Arc<EventStore>, transport: T, connectivity: watch::Receiver<bool>) -> Self {
        let is_online = *connectivity.borrow();
        let pending_count = store.pending_count().unwrap_or(0);
        let (status_tx, _) = watch::channel(SyncStatus {
            phase: if is_online {
                SyncPhase::Idle
            } else {
                SyncPhase::Offline
            },
            is_online,
            pending_count,
            ..SyncStatus::default()
        });
        Self {
            store,
            transport,
            connectivity,
            in_flight: Mutex::new(()),
            status_tx,
        }
    }

    /// Current status snapshot
    pub fn status(&self) -> SyncStatus {
        self.status_tx.borrow().clone()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.status_tx.subscribe()
    }

    fn is_online(&self) -> bool {
        *self.connectivity.borrow()
    }

    fn publish(&self, phase: SyncPhase, error: Option<String>) {
        let is_online = self.is_online();
        let pending_count = self
            .store
            .pending_count()
            .unwrap_or_else(|_| self.status_tx.borrow().pending_count);
        self.status_tx.send_modify(|status| {
            status.phase = phase;
            status.is_online = is_online;
            status.is_syncing = matches!(phase, SyncPhase::Pushing | SyncPhase::Pulling);
            status.pending_count = pending_count;
            status.error = error;
        });
    }

    fn record_synced(&self, at: DateTime<Utc>) {
        self.status_tx
            .send_modify(|status| status.last_sync_at = Some(at));
    }

    /// Run one push-then-pull cycle
    ///
    /// Returns immediately if a cycle is already running or the device
    /// is offline. Local functionality is never blocked by a failing
    /// sync; failed items stay queued for the next cycle.
    pub async fn sync(&self) -> Result<SyncReport> {
        let Ok(_guard) = self.in_flight.try_lock() else {
            return Ok(SyncReport::AlreadyRunning);
        };

        if !self.is_online() {
            self.publish(SyncPhase::Offline, None);
            return Ok(SyncReport::Offline);
        }

        let mut summary = SyncSummary::default();
        let mut cycle_error: Option<String> = None;

        self.publish(SyncPhase::Pushing, None);
        for item in self.store.drain_queue()? {
            // An in-flight item is allowed to finish, but nothing new is
            // started once the connectivity signal drops.
            if !self.is_online() {
                self.publish(SyncPhase::Offline, cycle_error);
                return Ok(SyncReport::Offline);
            }

            match self.transport.push_item(&item).await {
                SendOutcome::Success => {
                    self.store.confirm(&item)?;
                    summary.pushed += 1;
                }
                SendOutcome::Retryable(reason) => {
                    tracing::warn!(
                        entity = %item.entity,
                        entity_id = %item.entity_id,
                        retry_count = item.retry_count,
                        "push failed transiently: {reason}"
                    );
                    self.store.record_failure(&item)?;
                    summary.retried += 1;
                }
                SendOutcome::Fatal(reason) => {
                    tracing::error!(
                        entity = %item.entity,
                        entity_id = %item.entity_id,
                        "push rejected permanently: {reason}"
                    );
                    self.store.mark_failed(&item)?;
                    summary.failed += 1;
                    cycle_error = Some(reason);
                }
                SendOutcome::Unauthorized => {
                    self.publish(
                        SyncPhase::Idle,
                        Some("re-authentication required".to_string()),
                    );
                    return Ok(SyncReport::AuthRequired);
                }
            }
        }

        self.publish(SyncPhase::Pulling, cycle_error.clone());
        match self.transport.pull(self.store.checkpoint()?).await {
            Ok(delta) => {
                summary.pulled = self.store.apply_remote(&delta)?;
                // The checkpoint moves only after the delta is safely
                // applied; a crash in between just replays the delta.
                self.store.set_checkpoint(delta.synced_at)?;
                summary.pull_ok = true;
                self.record_synced(delta.synced_at);
            }
            Err(TransportError::Unauthorized) => {
                self.publish(
                    SyncPhase::Idle,
                    Some("re-authentication required".to_string()),
                );
                return Ok(SyncReport::AuthRequired);
            }
            Err(error) => {
                tracing::warn!("pull failed, checkpoint not advanced: {error}");
                cycle_error = Some(error.to_string());
            }
        }

        self.publish(SyncPhase::Idle, cycle_error);
        Ok(SyncReport::Completed(summary))
    }

    /// Trigger a cycle now; same coalescing and offline rules as `sync`
    pub async fn force_sync(&self) -> Result<SyncReport> {
        self.sync().await
    }

    /// React to connectivity transitions until the signal's sender is
    /// dropped: sync on reconnect, publish `Offline` on loss
    pub async fn watch_connectivity(&self) {
        let mut signal = self.connectivity.clone();
        loop {
            if signal.changed().await.is_err() {
                return;
            }
            let online = *signal.borrow_and_update();
            if online {
                if let Err(error) = self.sync().await {
                    tracing::error!("sync after reconnect failed: {error}");
                }
            } else {
                self.publish(SyncPhase::Offline, None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::queue::SyncQueueItem;
    use crate::sync::protocol::{AnnotationRecord, PullResponse};
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Transport double that replays scripted outcomes
    #[derive(Default)]
    struct ScriptedTransport {
        outcomes: StdMutex<VecDeque<SendOutcome>>,
        pushed: StdMutex<Vec<SyncQueueItem>>,
        pull_delta: StdMutex<Option<PullResponse>>,
        fail_pull: bool,
        /// Flipped to offline after the first push completes
        drop_signal: Option<watch::Sender<bool>>,
    }

    impl ScriptedTransport {
        fn with_pull(delta: PullResponse) -> Self {
            Self {
                pull_delta: StdMutex::new(Some(delta)),
                ..Self::default()
            }
        }

        fn with_outcomes(outcomes: impl IntoIterator<Item = SendOutcome>) -> Self {
            Self {
                outcomes: StdMutex::new(outcomes.into_iter().collect()),
                ..Self::default()
            }
        }
    }

    impl SyncTransport for ScriptedTransport {
        async fn push_item(&self, item: &SyncQueueItem) -> SendOutcome {
            self.pushed.lock().unwrap().push(item.clone());
            if let Some(sender) = &self.drop_signal {
                sender.send(false).ok();
            }
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(SendOutcome::Success)
        }

        async fn pull(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> std::result::Result<PullResponse, TransportError> {
            if self.fail_pull {
                return Err(TransportError::Network("connection reset".to_string()));
            }
            Ok(self
                .pull_delta
                .lock()
                .unwrap()
                .take()
                .unwrap_or_default())
        }
    }

    fn online_signal(online: bool) -> (watch::Sender<bool>, watch::Receiver<bool>) {
        watch::channel(online)
    }

    fn store_with_changes(count: usize) -> Arc<EventStore> {
        let store = EventStore::open_in_memory().unwrap();
        for i in 0..count {
            store.add_note("Ps 23:1", format!("note {i}")).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_offline_short_circuits() {
        let store = store_with_changes(1);
        let (_tx, rx) = online_signal(false);
        let orchestrator = SyncOrchestrator::new(store.clone(), ScriptedTransport::default(), rx);

        let report = orchestrator.sync().await.unwrap();
        assert_eq!(report, SyncReport::Offline);
        assert_eq!(store.pending_count().unwrap(), 1);
        assert_eq!(orchestrator.status().phase, SyncPhase::Offline);
    }

    #[tokio::test]
    async fn test_push_then_pull_advances_checkpoint() {
        let store = store_with_changes(2);
        let (_tx, rx) = online_signal(true);

        let remote = crate::models::Annotation::note("Rom 8:1", "from elsewhere");
        let (_, record) = AnnotationRecord::from_annotation(&remote);
        let synced_at = Utc::now();
        let delta = PullResponse {
            notes: vec![record],
            synced_at,
            ..Default::default()
        };
        let orchestrator =
            SyncOrchestrator::new(store.clone(), ScriptedTransport::with_pull(delta), rx);

        let report = orchestrator.sync().await.unwrap();
        assert_eq!(
            report,
            SyncReport::Completed(SyncSummary {
                pushed: 2,
                pulled: 1,
                pull_ok: true,
                ..SyncSummary::default()
            })
        );
        assert_eq!(store.pending_count().unwrap(), 0);
        assert_eq!(store.checkpoint().unwrap(), Some(synced_at));

        let status = orchestrator.status();
        assert_eq!(status.phase, SyncPhase::Idle);
        assert_eq!(status.last_sync_at, Some(synced_at));
        assert_eq!(status.error, None);
    }

    #[tokio::test]
    async fn test_failed_pull_keeps_checkpoint() {
        let store = store_with_changes(1);
        let (_tx, rx) = online_signal(true);
        let transport = ScriptedTransport {
            fail_pull: true,
            ..ScriptedTransport::default()
        };
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, rx);

        let report = orchestrator.sync().await.unwrap();
        let SyncReport::Completed(summary) = report else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.pushed, 1);
        assert!(!summary.pull_ok);
        // At-least-once: the next successful pull replays everything.
        assert_eq!(store.checkpoint().unwrap(), None);
        assert!(orchestrator.status().error.is_some());
    }

    #[tokio::test]
    async fn test_retryable_failure_keeps_item_queued() {
        let store = store_with_changes(1);
        let (_tx, rx) = online_signal(true);
        let transport =
            ScriptedTransport::with_outcomes([SendOutcome::Retryable("timeout".to_string())]);
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, rx);

        let report = orchestrator.sync().await.unwrap();
        let SyncReport::Completed(summary) = report else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.retried, 1);

        let queued = store.drain_queue().unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].retry_count, 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_parks_item_and_surfaces_error() {
        let store = store_with_changes(1);
        let (_tx, rx) = online_signal(true);
        let transport = ScriptedTransport::with_outcomes([SendOutcome::Fatal(
            "verseRef is required (400)".to_string(),
        )]);
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, rx);

        let report = orchestrator.sync().await.unwrap();
        let SyncReport::Completed(summary) = report else {
            panic!("expected a completed cycle");
        };
        assert_eq!(summary.failed, 1);
        assert!(store.drain_queue().unwrap().is_empty());
        assert_eq!(store.stalled_items().unwrap().len(), 1);
        assert!(orchestrator
            .status()
            .error
            .is_some_and(|e| e.contains("verseRef")));
    }

    #[tokio::test]
    async fn test_unauthorized_aborts_cycle() {
        let store = store_with_changes(2);
        let (_tx, rx) = online_signal(true);
        let transport = ScriptedTransport::with_outcomes([SendOutcome::Unauthorized]);
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, rx);

        let report = orchestrator.sync().await.unwrap();
        assert_eq!(report, SyncReport::AuthRequired);
        // Nothing confirmed, nothing retried, checkpoint untouched.
        assert_eq!(store.pending_count().unwrap(), 2);
        assert_eq!(store.checkpoint().unwrap(), None);
        assert!(orchestrator
            .status()
            .error
            .is_some_and(|e| e.contains("re-authentication")));
    }

    #[tokio::test]
    async fn test_going_offline_stops_between_items() {
        let store = store_with_changes(2);
        let (tx, rx) = online_signal(true);
        let transport = ScriptedTransport {
            drop_signal: Some(tx),
            ..ScriptedTransport::default()
        };
        let orchestrator = SyncOrchestrator::new(store.clone(), transport, rx);

        let report = orchestrator.sync().await.unwrap();
        // First item completed (never cancelled mid-flight), second never
        // started, queue keeps it for the next cycle.
        assert_eq!(report, SyncReport::Offline);
        assert_eq!(store.pending_count().unwrap(), 1);
    }

    /// Transport that blocks in `push_item` until released
    struct BlockingTransport {
        started: Arc<tokio::sync::Notify>,
        release: Arc<tokio::sync::Notify>,
    }

    impl SyncTransport for BlockingTransport {
        async fn push_item(&self, _item: &SyncQueueItem) -> SendOutcome {
            self.started.notify_one();
            self.release.notified().await;
            SendOutcome::Success
        }

        async fn pull(
            &self,
            _since: Option<DateTime<Utc>>,
        ) -> std::result::Result<PullResponse, TransportError> {
            Ok(PullResponse::default())
        }
    }

    #[tokio::test]
    async fn test_concurrent_sync_is_single_flight() {
        let store = store_with_changes(1);
        let (_tx, rx) = online_signal(true);
        let started = Arc::new(tokio::sync::Notify::new());
        let release = Arc::new(tokio::sync::Notify::new());
        let transport = BlockingTransport {
            started: started.clone(),
            release: release.clone(),
        };
        let orchestrator = Arc::new(SyncOrchestrator::new(store, transport, rx));

        let background = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move { orchestrator.sync().await })
        };
        started.notified().await;

        // A second call while the first is mid-push is coalesced away.
        let report = orchestrator.sync().await.unwrap();
        assert_eq!(report, SyncReport::AlreadyRunning);

        release.notify_one();
        let first = background.await.unwrap().unwrap();
        assert!(matches!(first, SyncReport::Completed(_)));
    }
}
