//! Update channels: how fragments reach a subscription.
//!
//! The fetcher only sees [`ChannelProvider`] and [`UpdateChannel`]; whether
//! updates are polled or pushed is decided by the injected provider.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::ProgressResult;
use crate::types::{AssessmentProgress, ProgressUpdate};

use super::SnapshotSource;

/// An open stream of fragments for one assessment.
#[async_trait]
pub trait UpdateChannel: Send {
    /// Wait for the next batch. `Ok(None)` means the source closed the channel.
    async fn recv(&mut self) -> ProgressResult<Option<Vec<ProgressUpdate>>>;
}

/// Opens update channels. Called again on every reconnect.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    async fn open(&self, assessment_id: &str) -> ProgressResult<Box<dyn UpdateChannel>>;
}

/// Fragments restating every domain that has received at least one update.
pub fn snapshot_fragments(snapshot: &AssessmentProgress) -> Vec<ProgressUpdate> {
    snapshot
        .domains()
        .values()
        .filter(|d| d.sequence > 0)
        .map(|d| ProgressUpdate::from_domain(snapshot.assessment_id(), d))
        .collect()
}

/// Subscribes by re-fetching the snapshot on a fixed interval.
///
/// Each poll restates all domains; unchanged ones carry their old sequence
/// and are dropped as stale by the aggregator.
#[derive(Clone)]
pub struct PollingProvider {
    source: Arc<dyn SnapshotSource>,
    interval: Duration,
}

impl PollingProvider {
    pub fn new(source: Arc<dyn SnapshotSource>, interval: Duration) -> Self {
        Self { source, interval }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

struct PollingChannel {
    source: Arc<dyn SnapshotSource>,
    assessment_id: String,
    interval: Duration,
}

#[async_trait]
impl ChannelProvider for PollingProvider {
    async fn open(&self, assessment_id: &str) -> ProgressResult<Box<dyn UpdateChannel>> {
        debug!(
            assessment_id,
            interval_ms = self.interval.as_millis() as u64,
            "opening polling channel"
        );
        Ok(Box::new(PollingChannel {
            source: Arc::clone(&self.source),
            assessment_id: assessment_id.to_string(),
            interval: self.interval,
        }))
    }
}

#[async_trait]
impl UpdateChannel for PollingChannel {
    async fn recv(&mut self) -> ProgressResult<Option<Vec<ProgressUpdate>>> {
        tokio::time::sleep(self.interval).await;
        let snapshot = self.source.fetch_snapshot(&self.assessment_id).await?;
        Ok(Some(snapshot_fragments(&snapshot)))
    }
}

/// In-process hub for pushed fragments.
///
/// The application's push transport (websocket, SSE, message queue
/// consumer) decodes fragments and hands them to [`PushProvider::publish`];
/// every open channel for that assessment receives them. A topic is dropped
/// once its last channel closes.
#[derive(Debug, Clone)]
pub struct PushProvider {
    topics: Arc<Mutex<Topics>>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Topics {
    senders: HashMap<String, Topic>,
    created: u64,
}

#[derive(Debug)]
struct Topic {
    tx: broadcast::Sender<ProgressUpdate>,
    /// Distinguishes a topic from one recreated under the same id after `close`.
    generation: u64,
}

fn lock_topics(topics: &Mutex<Topics>) -> MutexGuard<'_, Topics> {
    topics.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PushProvider {
    pub fn new(capacity: usize) -> Self {
        Self {
            topics: Arc::new(Mutex::new(Topics::default())),
            capacity: capacity.max(1),
        }
    }

    /// Deliver a fragment to every open channel for its assessment.
    ///
    /// Returns how many channels received it.
    pub fn publish(&self, update: ProgressUpdate) -> usize {
        let mut topics = lock_topics(&self.topics);
        let Some(topic) = topics.senders.get(&update.assessment_id) else {
            debug!(
                assessment_id = %update.assessment_id,
                "no open channel; dropping pushed update"
            );
            return 0;
        };

        match topic.tx.send(update) {
            Ok(received) => received,
            Err(broadcast::error::SendError(update)) => {
                topics.senders.remove(&update.assessment_id);
                0
            }
        }
    }

    /// Close every channel for an assessment. Open channels end with `Ok(None)`.
    pub fn close(&self, assessment_id: &str) {
        lock_topics(&self.topics).senders.remove(assessment_id);
    }

    /// Number of open channels for an assessment.
    pub fn receiver_count(&self, assessment_id: &str) -> usize {
        lock_topics(&self.topics)
            .senders
            .get(assessment_id)
            .map(|topic| topic.tx.receiver_count())
            .unwrap_or(0)
    }
}

impl Default for PushProvider {
    fn default() -> Self {
        Self::new(256)
    }
}

struct PushChannel {
    assessment_id: String,
    generation: u64,
    rx: broadcast::Receiver<ProgressUpdate>,
    topics: Arc<Mutex<Topics>>,
}

#[async_trait]
impl ChannelProvider for PushProvider {
    async fn open(&self, assessment_id: &str) -> ProgressResult<Box<dyn UpdateChannel>> {
        let (rx, generation) = {
            let mut guard = lock_topics(&self.topics);
            let Topics { senders, created } = &mut *guard;
            let topic = senders.entry(assessment_id.to_string()).or_insert_with(|| {
                *created += 1;
                Topic {
                    tx: broadcast::channel(self.capacity).0,
                    generation: *created,
                }
            });
            (topic.tx.subscribe(), topic.generation)
        };
        debug!(assessment_id, "opened push channel");
        Ok(Box::new(PushChannel {
            assessment_id: assessment_id.to_string(),
            generation,
            rx,
            topics: Arc::clone(&self.topics),
        }))
    }
}

#[async_trait]
impl UpdateChannel for PushChannel {
    async fn recv(&mut self) -> ProgressResult<Option<Vec<ProgressUpdate>>> {
        loop {
            match self.rx.recv().await {
                Ok(first) => {
                    let mut batch = vec![first];
                    while let Ok(next) = self.rx.try_recv() {
                        batch.push(next);
                    }
                    return Ok(Some(batch));
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        assessment_id = %self.assessment_id,
                        skipped,
                        "push channel lagged; skipped updates are lost"
                    );
                }
            }
        }
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        let mut topics = lock_topics(&self.topics);
        // `self.rx` is still counted here.
        let last = topics
            .senders
            .get(&self.assessment_id)
            .is_some_and(|topic| {
                topic.generation == self.generation && topic.tx.receiver_count() <= 1
            });
        if last {
            topics.senders.remove(&self.assessment_id);
            debug!(
                assessment_id = %self.assessment_id,
                "last push channel closed; topic dropped"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::apply;
    use crate::types::DomainStatus;

    #[tokio::test]
    async fn test_push_delivers_batches() {
        let push = PushProvider::new(16);
        let mut channel = push.open("a1").await.unwrap();
        assert_eq!(push.receiver_count("a1"), 1);

        let u1 = ProgressUpdate::new("a1", "d1", DomainStatus::InProgress, 10, 1);
        let u2 = ProgressUpdate::new("a1", "d1", DomainStatus::InProgress, 20, 2);
        assert_eq!(push.publish(u1.clone()), 1);
        assert_eq!(push.publish(u2.clone()), 1);

        let batch = channel.recv().await.unwrap().unwrap();
        assert_eq!(batch, vec![u1, u2]);
    }

    #[tokio::test]
    async fn test_push_without_channel_drops() {
        let push = PushProvider::default();
        let u = ProgressUpdate::new("a1", "d1", DomainStatus::InProgress, 10, 1);
        assert_eq!(push.publish(u), 0);
    }

    #[tokio::test]
    async fn test_push_close_ends_channel() {
        let push = PushProvider::default();
        let mut channel = push.open("a1").await.unwrap();
        push.close("a1");
        assert_eq!(channel.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_push_lag_recovers() {
        let push = PushProvider::new(2);
        let mut channel = push.open("a1").await.unwrap();
        for seq in 1..=5 {
            push.publish(ProgressUpdate::new(
                "a1",
                "d1",
                DomainStatus::InProgress,
                seq as u8 * 10,
                seq,
            ));
        }
        let batch = channel.recv().await.unwrap().unwrap();
        assert_eq!(batch.last().unwrap().sequence, 5);
    }

    fn topic_count(push: &PushProvider) -> usize {
        lock_topics(&push.topics).senders.len()
    }

    #[tokio::test]
    async fn test_push_topic_dropped_with_last_channel() {
        let push = PushProvider::default();
        let first = push.open("a1").await.unwrap();
        let second = push.open("a1").await.unwrap();
        push.open("a2").await.unwrap();
        assert_eq!(topic_count(&push), 1);

        drop(first);
        assert_eq!(push.receiver_count("a1"), 1);
        drop(second);
        assert_eq!(push.receiver_count("a1"), 0);
        assert_eq!(topic_count(&push), 0);
    }

    #[tokio::test]
    async fn test_push_stale_channel_keeps_reopened_topic() {
        let push = PushProvider::default();
        let stale = push.open("a1").await.unwrap();
        push.close("a1");
        let mut fresh = push.open("a1").await.unwrap();

        drop(stale);
        assert_eq!(push.receiver_count("a1"), 1);

        let u = ProgressUpdate::new("a1", "d1", DomainStatus::InProgress, 10, 1);
        assert_eq!(push.publish(u.clone()), 1);
        assert_eq!(fresh.recv().await.unwrap().unwrap(), vec![u]);
    }

    #[test]
    fn test_snapshot_fragments_skip_untouched_domains() {
        let start = AssessmentProgress::new("a1", ["d1", "d2"]);
        let state = apply(
            &start,
            &ProgressUpdate::new("a1", "d2", DomainStatus::Blocked, 15, 3),
        )
        .unwrap();

        let fragments = snapshot_fragments(&state);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].domain_id, "d2");
        assert_eq!(fragments[0].sequence, 3);
        assert_eq!(apply(&state, &fragments[0]).unwrap(), state);
    }
}
