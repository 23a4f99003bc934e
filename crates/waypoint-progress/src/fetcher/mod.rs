//! Snapshot fetch and update subscriptions for one assessment.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::client::ProgressClient;
use crate::error::{ProgressError, ProgressResult};
use crate::types::{AssessmentProgress, ProgressUpdate};

mod backoff;
mod channel;
mod handle;

pub use backoff::BackoffPolicy;
pub use channel::{
    snapshot_fragments, ChannelProvider, PollingProvider, PushProvider, UpdateChannel,
};
pub use handle::SubscriptionHandle;

/// Source of full progress snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, assessment_id: &str) -> ProgressResult<AssessmentProgress>;
}

/// Fetches snapshots and runs update subscriptions.
#[derive(Clone)]
pub struct ProgressFetcher {
    snapshots: Arc<dyn SnapshotSource>,
    channels: Arc<dyn ChannelProvider>,
    reconnect: BackoffPolicy,
}

impl ProgressFetcher {
    pub fn new(snapshots: Arc<dyn SnapshotSource>, channels: Arc<dyn ChannelProvider>) -> Self {
        Self {
            snapshots,
            channels,
            reconnect: BackoffPolicy::reconnects(),
        }
    }

    /// HTTP snapshots with subscriptions by polling, configured from the
    /// client's poll interval and reconnect policy.
    pub fn polling(client: ProgressClient) -> Self {
        let interval = client.config().poll_interval();
        let reconnect = client.config().reconnect.clone();
        let client: Arc<dyn SnapshotSource> = Arc::new(client);
        let polling = PollingProvider::new(Arc::clone(&client), interval);
        Self::new(client, Arc::new(polling)).with_reconnect(reconnect)
    }

    pub fn with_reconnect(mut self, reconnect: BackoffPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub async fn fetch_snapshot(&self, assessment_id: &str) -> ProgressResult<AssessmentProgress> {
        debug!(assessment_id, "fetching snapshot");
        self.snapshots.fetch_snapshot(assessment_id).await
    }

    /// Deliver fragments for `assessment_id` to `on_update` until cancelled.
    ///
    /// Runs on a spawned task; must be called within a tokio runtime.
    /// Delivery order is whatever the channel yields.
    pub fn subscribe<F>(&self, assessment_id: &str, on_update: F) -> SubscriptionHandle
    where
        F: FnMut(ProgressUpdate) + Send + 'static,
    {
        let handle = SubscriptionHandle::new();
        self.subscribe_with(&handle, assessment_id, on_update);
        handle
    }

    pub(crate) fn subscribe_with<F>(
        &self,
        handle: &SubscriptionHandle,
        assessment_id: &str,
        on_update: F,
    ) where
        F: FnMut(ProgressUpdate) + Send + 'static,
    {
        let subscription = Subscription {
            channels: Arc::clone(&self.channels),
            reconnect: self.reconnect.clone(),
            assessment_id: assessment_id.to_string(),
            handle: handle.clone(),
        };
        tokio::spawn(subscription.run(on_update));
    }
}

struct Subscription {
    channels: Arc<dyn ChannelProvider>,
    reconnect: BackoffPolicy,
    assessment_id: String,
    handle: SubscriptionHandle,
}

enum Flow {
    Reconnect,
    Stop,
}

impl Subscription {
    async fn run<F>(self, mut on_update: F)
    where
        F: FnMut(ProgressUpdate) + Send + 'static,
    {
        let id = self.assessment_id.as_str();
        let mut failures: u32 = 0;

        info!(assessment_id = id, "subscription started");

        while !self.handle.is_cancelled() {
            let opened = tokio::select! {
                biased;
                _ = self.handle.cancelled() => break,
                opened = self.channels.open(id) => opened,
            };

            let flow = match opened {
                Ok(mut channel) => self.pump(&mut *channel, &mut on_update, &mut failures).await,
                Err(e) => self.on_failure(e, &mut failures),
            };

            match flow {
                Flow::Stop => break,
                Flow::Reconnect => {
                    let delay = self.reconnect.delay(failures);
                    warn!(
                        assessment_id = id,
                        retry = failures,
                        max_retries = self.reconnect.max_attempts,
                        backoff_ms = delay.as_millis() as u64,
                        "reconnecting update channel"
                    );
                    tokio::select! {
                        biased;
                        _ = self.handle.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        info!(
            assessment_id = id,
            degraded = self.handle.is_degraded(),
            "subscription stopped"
        );
    }

    /// Receive and deliver batches until the channel fails, ends, or the
    /// subscription is cancelled.
    async fn pump<F>(
        &self,
        channel: &mut dyn UpdateChannel,
        on_update: &mut F,
        failures: &mut u32,
    ) -> Flow
    where
        F: FnMut(ProgressUpdate) + Send,
    {
        loop {
            let received = tokio::select! {
                biased;
                _ = self.handle.cancelled() => return Flow::Stop,
                received = channel.recv() => received,
            };

            match received {
                Ok(Some(batch)) => {
                    *failures = 0;
                    self.handle.set_degraded(false);
                    for update in batch {
                        if self.handle.is_cancelled() {
                            return Flow::Stop;
                        }
                        on_update(update);
                    }
                }
                Ok(None) => {
                    debug!(assessment_id = %self.assessment_id, "update channel closed by source");
                    return Flow::Stop;
                }
                Err(e) => return self.on_failure(e, failures),
            }
        }
    }

    fn on_failure(&self, error: ProgressError, failures: &mut u32) -> Flow {
        if !error.is_retryable() {
            warn!(
                assessment_id = %self.assessment_id,
                error = %error,
                "update channel failed; not retrying"
            );
            self.handle.set_degraded(true);
            return Flow::Stop;
        }

        *failures += 1;
        if !self.reconnect.allows(*failures) {
            warn!(
                assessment_id = %self.assessment_id,
                error = %error,
                attempts = *failures - 1,
                "reconnect attempts exhausted; subscription degraded"
            );
            self.handle.set_degraded(true);
            return Flow::Stop;
        }
        Flow::Reconnect
    }
}
