//! Cancellation and health handle for one subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::watch;

/// Handle returned by `subscribe` and `track`.
///
/// Clones share state. Cancelling is idempotent; once `cancel` returns no
/// further update callbacks start.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    inner: Arc<HandleInner>,
}

#[derive(Debug)]
struct HandleInner {
    cancel: watch::Sender<bool>,
    degraded: AtomicBool,
}

impl SubscriptionHandle {
    pub(crate) fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            inner: Arc::new(HandleInner {
                cancel,
                degraded: AtomicBool::new(false),
            }),
        }
    }

    /// Stop delivering updates.
    pub fn cancel(&self) {
        self.inner.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancel.borrow()
    }

    /// True once reconnecting was abandoned; aggregated state is kept.
    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub(crate) fn set_degraded(&self, degraded: bool) {
        self.inner.degraded.store(degraded, Ordering::SeqCst);
    }

    /// Resolves once `cancel` has been called, including before this call.
    pub(crate) async fn cancelled(&self) {
        let mut rx = self.inner.cancel.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Whether both handles refer to the same subscription.
    pub(crate) fn same(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
