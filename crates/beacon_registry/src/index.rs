//! Snapshot-then-live subscription assembly.
//!
//! [`IndexEngine::open`] builds the race-free hand-off for a new
//! subscription: register the subscriber paused, serve the current matching
//! registry state as an `Add` batch bracketed by buffer markers, then flush
//! whatever was published meanwhile and switch to direct delivery. Every
//! notification published after registration lands in the subscriber's
//! private buffer, so nothing is skipped; the flush reconciliation in
//! [`crate::bus`] drops what the snapshot already represents, so nothing is
//! delivered twice for the same effective state.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

use crate::bus::NotificationBus;
use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::notification::ChangeNotification;

pub struct IndexEngine {
    bus: Arc<NotificationBus>,
}

impl IndexEngine {
    pub fn new(bus: Arc<NotificationBus>) -> Self {
        Self { bus }
    }

    /// Open a subscription for `interest`. `snapshot` is invoked exactly once,
    /// after the subscriber is registered, and must yield the registry's
    /// current winners (the engine filters them by the interest).
    pub fn open<F>(&self, interest: Interest, snapshot: F) -> NotificationStream
    where
        F: FnOnce() -> Vec<InstanceInfo>,
    {
        let (sub, rx) = self.bus.subscribe(interest.clone());

        let mut seen = HashMap::new();
        sub.deliver_direct(ChangeNotification::BufferStart(None));
        for info in snapshot() {
            if interest.matches(&info) {
                seen.insert(info.instance_id.clone(), info.clone());
                sub.deliver_direct(ChangeNotification::Add(info));
            }
        }
        sub.deliver_direct(ChangeNotification::BufferEnd(None));
        self.bus.resume(&sub, seen);

        NotificationStream {
            rx,
            bus: self.bus.clone(),
            id: sub.id(),
        }
    }
}

/// Live notification stream for one subscription.
///
/// Ends with `None` when the registry shuts down; dropping it detaches the
/// subscriber without affecting anything else.
pub struct NotificationStream {
    rx: mpsc::UnboundedReceiver<ChangeNotification>,
    bus: Arc<NotificationBus>,
    id: u64,
}

impl NotificationStream {
    pub async fn recv(&mut self) -> Option<ChangeNotification> {
        self.rx.recv().await
    }

    /// Non-blocking poll; `None` when nothing is currently queued or the
    /// stream has completed.
    pub fn try_recv(&mut self) -> Option<ChangeNotification> {
        self.rx.try_recv().ok()
    }
}

impl Stream for NotificationStream {
    type Item = ChangeNotification;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for NotificationStream {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}
