//! In-memory progress store.
//!
//! Owns the current [`AssessmentProgress`] of every tracked assessment and
//! runs its lifecycle:
//!
//! ```text
//! Uninitialized -> Loading -> Tracking -> Terminal -> Untracked
//!                     |                      ^
//!                     +-- snapshot failed    +-- snapshot already complete
//!                         (back to Uninitialized)
//! ```
//!
//! All mutation goes through the pure reducer in [`crate::aggregate`]. Each
//! subscription delivers on its own task, so applies for one assessment are
//! serialized. Listeners run after the store lock is released.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::aggregate::{reduce, Reduced};
use crate::config::ClientConfig;
use crate::error::{ProgressError, ProgressResult};
use crate::fetcher::{ProgressFetcher, SubscriptionHandle};
use crate::stats::{derive_stats, Estimator};
use crate::types::{AssessmentProgress, ProgressStats, ProgressUpdate};

/// Change listener. Errors are logged and never reach the aggregator.
pub type Listener = Arc<dyn Fn(&AssessmentProgress) -> anyhow::Result<()> + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Lifecycle state of a tracked assessment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
    /// Initial snapshot in flight.
    Loading,
    /// Snapshot loaded, subscription open.
    Tracking,
    /// Assessment completed; subscription closed, late updates discarded.
    Terminal,
}

/// Store options.
#[derive(Clone, Default)]
pub struct StoreConfig {
    /// Evict completed assessments this long after they complete.
    pub terminal_grace: Option<Duration>,

    /// Remaining-time model for [`ProgressStore::get_stats`].
    pub estimator: Option<Arc<dyn Estimator>>,
}

impl StoreConfig {
    pub fn with_terminal_grace(mut self, grace: Duration) -> Self {
        self.terminal_grace = Some(grace);
        self
    }

    pub fn with_estimator(mut self, estimator: impl Estimator + 'static) -> Self {
        self.estimator = Some(Arc::new(estimator));
        self
    }
}

impl From<&ClientConfig> for StoreConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            terminal_grace: config.terminal_grace(),
            estimator: None,
        }
    }
}

/// Holds the aggregated progress of tracked assessments.
///
/// Cheap to clone; clones share state. Dropping the last clone cancels
/// every subscription.
#[derive(Clone)]
pub struct ProgressStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    fetcher: ProgressFetcher,
    config: StoreConfig,
    state: Mutex<StoreState>,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, Entry>,
    listeners: HashMap<String, Vec<(ListenerId, Listener)>>,
    next_listener: u64,
}

struct Entry {
    state: TrackState,
    progress: Option<AssessmentProgress>,
    handle: SubscriptionHandle,
    /// Set while the initial snapshot is in flight; resolves to its outcome.
    loading: Option<watch::Receiver<Option<ProgressResult<()>>>>,
}

enum Pending {
    Load(watch::Sender<Option<ProgressResult<()>>>, SubscriptionHandle),
    Wait(watch::Receiver<Option<ProgressResult<()>>>, SubscriptionHandle),
}

impl ProgressStore {
    pub fn new(fetcher: ProgressFetcher) -> Self {
        Self::with_config(fetcher, StoreConfig::default())
    }

    pub fn with_config(fetcher: ProgressFetcher, config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                fetcher,
                config,
                state: Mutex::new(StoreState::default()),
            }),
        }
    }

    /// Start tracking an assessment.
    ///
    /// Fetches the initial snapshot and opens a subscription. Tracking an
    /// assessment that is already tracked returns its existing handle; a
    /// call that arrives while the snapshot is loading waits for that load
    /// and returns the same outcome. On snapshot failure the assessment is
    /// left untracked and the error is returned, so the call can be retried.
    pub async fn track(&self, assessment_id: &str) -> ProgressResult<SubscriptionHandle> {
        loop {
            let pending = {
                let mut state = self.inner.lock();
                match state.entries.get(assessment_id) {
                    Some(entry) => match &entry.loading {
                        Some(loaded) => Pending::Wait(loaded.clone(), entry.handle.clone()),
                        None => {
                            debug!(assessment_id, state = ?entry.state, "already tracked");
                            return Ok(entry.handle.clone());
                        }
                    },
                    None => {
                        let handle = SubscriptionHandle::new();
                        let (done, loaded) = watch::channel(None);
                        state.entries.insert(
                            assessment_id.to_string(),
                            Entry {
                                state: TrackState::Loading,
                                progress: None,
                                handle: handle.clone(),
                                loading: Some(loaded),
                            },
                        );
                        Pending::Load(done, handle)
                    }
                }
            };

            match pending {
                Pending::Load(done, handle) => {
                    let outcome = self.load(assessment_id, &handle).await;
                    done.send_replace(Some(outcome.clone()));
                    return outcome.map(|()| handle);
                }
                Pending::Wait(mut loaded, handle) => {
                    debug!(assessment_id, "waiting for in-flight snapshot");
                    let outcome = match loaded.wait_for(Option::is_some).await {
                        Ok(outcome) => Option::clone(&outcome),
                        Err(_) => None,
                    };
                    match outcome {
                        Some(outcome) => return outcome.map(|()| handle),
                        None => {
                            // The loading caller was dropped mid-fetch; start over.
                            self.inner.remove_entry(assessment_id, &handle);
                        }
                    }
                }
            }
        }
    }

    /// Fetch the initial snapshot for a `Loading` entry owned by `handle`
    /// and open its subscription.
    async fn load(&self, assessment_id: &str, handle: &SubscriptionHandle) -> ProgressResult<()> {
        info!(assessment_id, "tracking assessment");

        let snapshot = match self.inner.fetcher.fetch_snapshot(assessment_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(assessment_id, error = %e, "initial snapshot failed");
                self.inner.remove_entry(assessment_id, handle);
                handle.cancel();
                return Err(e);
            }
        };

        let complete = snapshot.is_complete();
        {
            let mut state = self.inner.lock();
            match state.entries.get_mut(assessment_id) {
                Some(entry) if entry.handle.same(handle) => {
                    entry.progress = Some(snapshot);
                    entry.loading = None;
                    entry.state = if complete {
                        TrackState::Terminal
                    } else {
                        TrackState::Tracking
                    };
                }
                _ => {
                    debug!(assessment_id, "untracked while loading; discarding snapshot");
                    return Err(not_tracked(assessment_id));
                }
            }
        }

        if complete {
            info!(assessment_id, "assessment already complete; not subscribing");
            handle.cancel();
            StoreInner::schedule_eviction(&self.inner, assessment_id, handle);
            return Ok(());
        }

        let weak = Arc::downgrade(&self.inner);
        let id = assessment_id.to_string();
        let sub = handle.clone();
        self.inner
            .fetcher
            .subscribe_with(handle, assessment_id, move |update| {
                if let Some(inner) = Weak::upgrade(&weak) {
                    StoreInner::apply_update(&inner, &id, &sub, update);
                }
            });

        Ok(())
    }

    /// Stop tracking: cancel the subscription and drop state and listeners.
    ///
    /// No-op for assessments that are not tracked.
    pub fn untrack(&self, assessment_id: &str) {
        let removed = {
            let mut state = self.inner.lock();
            state.listeners.remove(assessment_id);
            state.entries.remove(assessment_id)
        };

        match removed {
            Some(entry) => {
                entry.handle.cancel();
                info!(assessment_id, "untracked assessment");
            }
            None => debug!(assessment_id, "untrack: not tracked"),
        }
    }

    /// Current aggregated progress.
    ///
    /// `NotTracked` while the initial snapshot is still loading.
    pub fn get_current(&self, assessment_id: &str) -> ProgressResult<AssessmentProgress> {
        self.inner
            .lock()
            .entries
            .get(assessment_id)
            .and_then(|entry| entry.progress.clone())
            .ok_or_else(|| not_tracked(assessment_id))
    }

    /// Stats derived from the current progress.
    pub fn get_stats(&self, assessment_id: &str) -> ProgressResult<ProgressStats> {
        let progress = self.get_current(assessment_id)?;
        Ok(derive_stats(&progress, self.inner.config.estimator.as_deref()))
    }

    /// Register a listener called with the new state after every applied update.
    pub fn on_change<F>(&self, assessment_id: &str, listener: F) -> ListenerId
    where
        F: Fn(&AssessmentProgress) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut state = self.inner.lock();
        state.next_listener += 1;
        let id = ListenerId(state.next_listener);
        state
            .listeners
            .entry(assessment_id.to_string())
            .or_default()
            .push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn remove_listener(&self, assessment_id: &str, listener: ListenerId) -> bool {
        let mut state = self.inner.lock();
        let Some(listeners) = state.listeners.get_mut(assessment_id) else {
            return false;
        };
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != listener);
        before != listeners.len()
    }

    /// Lifecycle state of a tracked assessment.
    pub fn state(&self, assessment_id: &str) -> ProgressResult<TrackState> {
        self.inner
            .lock()
            .entries
            .get(assessment_id)
            .map(|entry| entry.state)
            .ok_or_else(|| not_tracked(assessment_id))
    }

    /// Whether the assessment's subscription gave up reconnecting.
    pub fn is_degraded(&self, assessment_id: &str) -> ProgressResult<bool> {
        self.inner
            .lock()
            .entries
            .get(assessment_id)
            .map(|entry| entry.handle.is_degraded())
            .ok_or_else(|| not_tracked(assessment_id))
    }

    /// Tracked assessment ids, sorted.
    pub fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.lock().entries.keys().cloned().collect();
        ids.sort();
        ids
    }
}

fn not_tracked(assessment_id: &str) -> ProgressError {
    ProgressError::NotTracked {
        assessment_id: assessment_id.to_string(),
    }
}

impl StoreInner {
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove the entry only if it still belongs to `handle`.
    fn remove_entry(&self, assessment_id: &str, handle: &SubscriptionHandle) -> bool {
        let mut state = self.lock();
        let owned = state
            .entries
            .get(assessment_id)
            .is_some_and(|entry| entry.handle.same(handle));
        if owned {
            state.entries.remove(assessment_id);
        }
        owned
    }

    fn apply_update(
        inner: &Arc<Self>,
        assessment_id: &str,
        handle: &SubscriptionHandle,
        update: ProgressUpdate,
    ) {
        let (progress, listeners, completed) = {
            let mut guard = inner.lock();
            let StoreState {
                entries, listeners, ..
            } = &mut *guard;

            let Some(entry) = entries.get_mut(assessment_id) else {
                debug!(assessment_id, "update for untracked assessment dropped");
                return;
            };
            if !entry.handle.same(handle) {
                debug!(assessment_id, "update from a previous subscription dropped");
                return;
            }
            if entry.state == TrackState::Terminal {
                debug!(
                    assessment_id,
                    domain_id = %update.domain_id,
                    sequence = update.sequence,
                    "update after completion discarded as stale"
                );
                return;
            }
            let Some(current) = entry.progress.as_ref() else {
                return;
            };

            let next = match reduce(current, &update) {
                Ok(Reduced::Changed(next)) => next,
                Ok(Reduced::Stale) => {
                    debug!(
                        assessment_id,
                        domain_id = %update.domain_id,
                        sequence = update.sequence,
                        "stale update discarded"
                    );
                    return;
                }
                Err(e) => {
                    warn!(
                        assessment_id,
                        domain_id = %update.domain_id,
                        sequence = update.sequence,
                        error = %e,
                        "dropping malformed progress update"
                    );
                    return;
                }
            };

            let completed = next.is_complete();
            if completed {
                entry.state = TrackState::Terminal;
            }
            entry.progress = Some(next.clone());

            let listeners: Vec<Listener> = listeners
                .get(assessment_id)
                .map(|ls| ls.iter().map(|(_, l)| Arc::clone(l)).collect())
                .unwrap_or_default();

            (next, listeners, completed)
        };

        if completed {
            info!(assessment_id, "assessment complete; closing subscription");
            handle.cancel();
            Self::schedule_eviction(inner, assessment_id, handle);
        }

        for listener in &listeners {
            if let Err(e) = listener(&progress) {
                warn!(assessment_id, error = %e, "progress listener failed");
            }
        }
    }

    /// Evict a terminal entry once the grace period elapses.
    fn schedule_eviction(inner: &Arc<Self>, assessment_id: &str, handle: &SubscriptionHandle) {
        let Some(grace) = inner.config.terminal_grace else {
            return;
        };

        let weak = Arc::downgrade(inner);
        let assessment_id = assessment_id.to_string();
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let mut state = inner.lock();
            let evict = state
                .entries
                .get(&assessment_id)
                .is_some_and(|e| e.handle.same(&handle) && e.state == TrackState::Terminal);
            if evict {
                state.entries.remove(&assessment_id);
                state.listeners.remove(&assessment_id);
                info!(assessment_id = %assessment_id, "evicted completed assessment");
            }
        });
    }
}

impl Drop for StoreInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in state.entries.values() {
            entry.handle.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::{PushProvider, SnapshotSource};
    use crate::types::DomainStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Snapshots served from memory; ids in `failing` return `Transport` once.
    #[derive(Default)]
    struct MemorySnapshots {
        snapshots: Mutex<HashMap<String, AssessmentProgress>>,
        failing: Mutex<Vec<String>>,
        fetches: AtomicUsize,
        latency: Mutex<Duration>,
    }

    impl MemorySnapshots {
        fn with(progress: AssessmentProgress) -> Arc<Self> {
            let source = Arc::new(Self::default());
            source.put(progress);
            source
        }

        fn put(&self, progress: AssessmentProgress) {
            self.snapshots
                .lock()
                .unwrap()
                .insert(progress.assessment_id().to_string(), progress);
        }

        fn fail_once(&self, assessment_id: &str) {
            self.failing.lock().unwrap().push(assessment_id.to_string());
        }

        fn with_latency(&self, latency: Duration) {
            *self.latency.lock().unwrap() = latency;
        }
    }

    #[async_trait]
    impl SnapshotSource for MemorySnapshots {
        async fn fetch_snapshot(&self, assessment_id: &str) -> ProgressResult<AssessmentProgress> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            let latency = *self.latency.lock().unwrap();
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            {
                let mut failing = self.failing.lock().unwrap();
                if let Some(pos) = failing.iter().position(|id| id == assessment_id) {
                    failing.remove(pos);
                    return Err(ProgressError::Transport {
                        message: "connection refused".into(),
                    });
                }
            }
            self.snapshots
                .lock()
                .unwrap()
                .get(assessment_id)
                .cloned()
                .ok_or_else(|| ProgressError::NotFound {
                    assessment_id: assessment_id.to_string(),
                })
        }
    }

    struct Harness {
        store: ProgressStore,
        push: PushProvider,
        snapshots: Arc<MemorySnapshots>,
    }

    fn harness_with(snapshots: Arc<MemorySnapshots>, config: StoreConfig) -> Harness {
        let push = PushProvider::new(64);
        let fetcher = ProgressFetcher::new(snapshots.clone(), Arc::new(push.clone()));
        Harness {
            store: ProgressStore::with_config(fetcher, config),
            push,
            snapshots,
        }
    }

    fn harness() -> Harness {
        harness_with(
            MemorySnapshots::with(AssessmentProgress::new("A1", ["d1", "d2"])),
            StoreConfig::default(),
        )
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    /// Track and wait for the push channel to be open.
    async fn track(h: &Harness, id: &str) -> SubscriptionHandle {
        let handle = h.store.track(id).await.unwrap();
        wait_until(|| h.push.receiver_count(id) == 1).await;
        handle
    }

    fn changes(store: &ProgressStore, id: &str) -> mpsc::UnboundedReceiver<AssessmentProgress> {
        let (tx, rx) = mpsc::unbounded_channel();
        store.on_change(id, move |p| {
            tx.send(p.clone())?;
            Ok(())
        });
        rx
    }

    fn update(domain: &str, status: DomainStatus, percent: u8, seq: u64) -> ProgressUpdate {
        ProgressUpdate::new("A1", domain, status, percent, seq)
    }

    #[tokio::test]
    async fn test_two_domain_completion_scenario() {
        let h = harness();
        let mut rx = changes(&h.store, "A1");
        let handle = track(&h, "A1").await;
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Tracking);

        h.push.publish(update("d1", DomainStatus::Completed, 100, 1));
        let state = rx.recv().await.unwrap();
        assert_eq!(state.status(), DomainStatus::InProgress);
        assert_eq!(h.store.get_stats("A1").unwrap().percent_complete, 50);

        h.push.publish(update("d2", DomainStatus::Completed, 100, 1));
        let state = rx.recv().await.unwrap();
        assert_eq!(state.status(), DomainStatus::Completed);
        assert_eq!(h.store.get_stats("A1").unwrap().percent_complete, 100);
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Terminal);
        assert!(handle.is_cancelled());

        wait_until(|| h.push.receiver_count("A1") == 0).await;
    }

    #[tokio::test]
    async fn test_out_of_order_updates() {
        let h = harness();
        let mut rx = changes(&h.store, "A1");
        track(&h, "A1").await;

        h.push.publish(update("d1", DomainStatus::InProgress, 40, 5));
        h.push.publish(update("d1", DomainStatus::InProgress, 30, 3));
        h.push.publish(update("d2", DomainStatus::InProgress, 10, 1));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.domain("d1").unwrap().percent_complete, 40);
        // The stale fragment produced no notification.
        let second = rx.recv().await.unwrap();
        assert_eq!(second.domain("d2").unwrap().percent_complete, 10);

        let current = h.store.get_current("A1").unwrap();
        assert_eq!(current.domain("d1").unwrap().percent_complete, 40);
        assert_eq!(current.domain("d1").unwrap().sequence, 5);
    }

    #[test]
    fn test_store_config_from_client_config() {
        let client = ClientConfig::default().with_terminal_grace(Duration::from_secs(90));
        let config = StoreConfig::from(&client);
        assert_eq!(config.terminal_grace, Some(Duration::from_secs(90)));
        assert!(config.estimator.is_none());
        assert!(StoreConfig::from(&ClientConfig::default()).terminal_grace.is_none());
    }

    #[tokio::test]
    async fn test_untrack_unknown_is_noop() {
        let h = harness();
        h.store.untrack("never-tracked");
        assert!(h.store.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_track_is_idempotent() {
        let h = harness();
        let first = track(&h, "A1").await;
        let second = h.store.track("A1").await.unwrap();

        assert!(first.same(&second));
        assert_eq!(h.snapshots.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(h.push.receiver_count("A1"), 1);
        assert_eq!(h.store.tracked(), vec!["A1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_track_shares_failed_load() {
        let h = harness();
        h.snapshots.with_latency(Duration::from_millis(100));
        h.snapshots.fail_once("A1");

        let first = {
            let store = h.store.clone();
            tokio::spawn(async move { store.track("A1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Loading);

        let second = h.store.track("A1").await;
        let first = first.await.unwrap();

        assert!(matches!(first, Err(ProgressError::Transport { .. })));
        assert!(matches!(second, Err(ProgressError::Transport { .. })));
        assert_eq!(h.snapshots.fetches.load(Ordering::SeqCst), 1);
        assert!(h.store.tracked().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_track_waits_for_snapshot() {
        let h = harness();
        h.snapshots.with_latency(Duration::from_millis(100));

        let first = {
            let store = h.store.clone();
            tokio::spawn(async move { store.track("A1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = h.store.track("A1").await.unwrap();
        assert!(h.store.get_current("A1").is_ok());
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Tracking);

        let first = first.await.unwrap().unwrap();
        assert!(first.same(&second));
        assert_eq!(h.snapshots.fetches.load(Ordering::SeqCst), 1);
        wait_until(|| h.push.receiver_count("A1") == 1).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_track_recovers_from_abandoned_load() {
        let h = harness();
        h.snapshots.with_latency(Duration::from_millis(100));

        let abandoned = {
            let store = h.store.clone();
            tokio::spawn(async move { store.track("A1").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        abandoned.abort();
        let _ = abandoned.await;

        h.store.track("A1").await.unwrap();
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Tracking);
        assert_eq!(h.snapshots.fetches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_snapshot_failure_allows_retry() {
        let h = harness();
        h.snapshots.fail_once("A1");

        let err = h.store.track("A1").await.unwrap_err();
        assert!(matches!(err, ProgressError::Transport { .. }));
        assert!(matches!(
            h.store.state("A1"),
            Err(ProgressError::NotTracked { .. })
        ));

        track(&h, "A1").await;
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Tracking);
    }

    #[tokio::test]
    async fn test_not_found_surfaces_to_caller() {
        let h = harness();
        let err = h.store.track("missing").await.unwrap_err();
        assert!(matches!(err, ProgressError::NotFound { .. }));
        assert!(h.store.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_get_current_not_tracked() {
        let h = harness();
        assert!(matches!(
            h.store.get_current("A1"),
            Err(ProgressError::NotTracked { .. })
        ));
        assert!(matches!(
            h.store.get_stats("A1"),
            Err(ProgressError::NotTracked { .. })
        ));
    }

    #[tokio::test]
    async fn test_unknown_domain_dropped() {
        let h = harness();
        let mut rx = changes(&h.store, "A1");
        track(&h, "A1").await;

        h.push.publish(update("d9", DomainStatus::Completed, 100, 1));
        let misrouted = ProgressUpdate::new("A2", "d1", DomainStatus::Completed, 100, 1);
        h.push.publish(misrouted);
        h.push.publish(update("d1", DomainStatus::InProgress, 20, 1));

        let state = rx.recv().await.unwrap();
        assert_eq!(state.domain("d1").unwrap().percent_complete, 20);
        assert!(state.domain("d9").is_none());
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Tracking);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let h = harness();
        h.store.on_change("A1", |_| Err(anyhow::anyhow!("render failed")));
        let mut rx = changes(&h.store, "A1");
        track(&h, "A1").await;

        h.push.publish(update("d1", DomainStatus::InProgress, 20, 1));
        assert!(rx.recv().await.is_some());
        assert_eq!(
            h.store
                .get_current("A1")
                .unwrap()
                .domain("d1")
                .unwrap()
                .sequence,
            1
        );
    }

    #[tokio::test]
    async fn test_remove_listener() {
        let h = harness();
        let calls = Arc::new(AtomicUsize::new(0));
        let counted = calls.clone();
        let id = h.store.on_change("A1", move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let mut rx = changes(&h.store, "A1");
        track(&h, "A1").await;

        assert!(h.store.remove_listener("A1", id));
        assert!(!h.store.remove_listener("A1", id));

        h.push.publish(update("d1", DomainStatus::InProgress, 20, 1));
        rx.recv().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_completed_snapshot_goes_terminal() {
        let done = crate::aggregate::apply(
            &AssessmentProgress::new("A1", ["d1"]),
            &update("d1", DomainStatus::Completed, 100, 1),
        )
        .unwrap();
        let h = harness_with(MemorySnapshots::with(done), StoreConfig::default());

        let handle = h.store.track("A1").await.unwrap();
        assert!(handle.is_cancelled());
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Terminal);
        assert_eq!(h.push.receiver_count("A1"), 0);
        assert_eq!(h.store.get_stats("A1").unwrap().percent_complete, 100);
    }

    #[tokio::test]
    async fn test_untrack_cancels_subscription() {
        let h = harness();
        let handle = track(&h, "A1").await;

        h.store.untrack("A1");
        assert!(handle.is_cancelled());
        assert!(h.store.tracked().is_empty());
        wait_until(|| h.push.receiver_count("A1") == 0).await;

        // Tracking again starts a fresh subscription.
        let again = track(&h, "A1").await;
        assert!(!again.same(&handle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_grace_evicts() {
        let h = harness_with(
            MemorySnapshots::with(AssessmentProgress::new("A1", ["d1"])),
            StoreConfig::default().with_terminal_grace(Duration::from_secs(30)),
        );
        let mut rx = changes(&h.store, "A1");
        track(&h, "A1").await;

        h.push.publish(update("d1", DomainStatus::Completed, 100, 1));
        rx.recv().await.unwrap();
        assert_eq!(h.store.state("A1").unwrap(), TrackState::Terminal);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(h.store.tracked().is_empty());
    }

    #[tokio::test]
    async fn test_stats_use_configured_estimator() {
        let estimator = |p: &AssessmentProgress| {
            Some(Duration::from_secs(
                60 * (p.total_domains() - p.count(DomainStatus::Completed)) as u64,
            ))
        };
        let h = harness_with(
            MemorySnapshots::with(AssessmentProgress::new("A1", ["d1", "d2"])),
            StoreConfig::default().with_estimator(estimator),
        );
        h.store.track("A1").await.unwrap();

        let stats = h.store.get_stats("A1").unwrap();
        assert_eq!(stats.estimated_time_remaining, Some(Duration::from_secs(120)));
    }

    #[tokio::test]
    async fn test_dropping_store_cancels_subscriptions() {
        let h = harness();
        let handle = track(&h, "A1").await;

        drop(h.store);
        assert!(handle.is_cancelled());
        wait_until(|| h.push.receiver_count("A1") == 0).await;
    }
}
