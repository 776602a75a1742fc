//! Ordered, pausable notification broadcast.
//!
//! The bus fans every published [`ChangeNotification`] out to all
//! subscribers whose interest matches. Each subscriber owns a small delivery
//! state machine: it starts `Buffering` (notifications queue up privately
//! while the subscriber's initial snapshot is taken), is flipped to `Live`
//! once the buffer has been flushed through reconciliation, and becomes
//! `Closed` when the downstream is dropped or the registry shuts down.
//! Pausing one subscriber never blocks writers or other subscribers.
//!
//! A subscriber whose receiver has gone away is detached on the next
//! publish; nothing else observes the failure.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::notification::ChangeNotification;

enum DeliveryState {
    Buffering {
        queue: VecDeque<ChangeNotification>,
        out: mpsc::UnboundedSender<ChangeNotification>,
    },
    Live {
        out: mpsc::UnboundedSender<ChangeNotification>,
    },
    Closed,
}

pub(crate) struct BusSubscriber {
    id: u64,
    interest: Interest,
    state: Mutex<DeliveryState>,
}

impl BusSubscriber {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Accept a published notification. Returns false once the downstream is
    /// gone and the subscriber should be detached.
    fn offer(&self, notification: &ChangeNotification) -> bool {
        if !notification.matches(&self.interest) {
            return true;
        }
        let mut state = self.state.lock().unwrap();
        match &mut *state {
            DeliveryState::Buffering { queue, .. } => {
                queue.push_back(notification.clone());
                true
            }
            DeliveryState::Live { out } => {
                if out.send(notification.clone()).is_ok() {
                    true
                } else {
                    *state = DeliveryState::Closed;
                    false
                }
            }
            DeliveryState::Closed => false,
        }
    }

    /// Push straight to the downstream channel, bypassing the buffer. Used
    /// only for the snapshot batch, before `resume` flips the state.
    pub(crate) fn deliver_direct(&self, notification: ChangeNotification) {
        let state = self.state.lock().unwrap();
        match &*state {
            DeliveryState::Buffering { out, .. } | DeliveryState::Live { out } => {
                let _ = out.send(notification);
            }
            DeliveryState::Closed => {}
        }
    }

    fn close(&self) {
        *self.state.lock().unwrap() = DeliveryState::Closed;
    }
}

/// Registry-scoped broadcast channel. Created and torn down with its
/// registry; never a process-wide static.
pub struct NotificationBus {
    subscribers: Mutex<Vec<Arc<BusSubscriber>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a new subscriber in the buffering state. On a closed bus the
    /// subscriber is born closed and its stream completes immediately.
    pub(crate) fn subscribe(
        &self,
        interest: Interest,
    ) -> (Arc<BusSubscriber>, mpsc::UnboundedReceiver<ChangeNotification>) {
        let (out, rx) = mpsc::unbounded_channel();
        let sub = Arc::new(BusSubscriber {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            interest,
            state: Mutex::new(DeliveryState::Buffering {
                queue: VecDeque::new(),
                out,
            }),
        });
        if self.closed.load(Ordering::Acquire) {
            sub.close();
        } else {
            self.subscribers.lock().unwrap().push(sub.clone());
        }
        (sub, rx)
    }

    /// Flush the subscriber's buffered notifications through reconciliation
    /// against the snapshot it was just served, then switch it to direct
    /// delivery. `seen` maps instance id to the value delivered during the
    /// snapshot batch.
    pub(crate) fn resume(&self, sub: &BusSubscriber, mut seen: HashMap<String, InstanceInfo>) {
        let mut state = sub.state.lock().unwrap();
        if let DeliveryState::Buffering { queue, out } = &mut *state {
            let out = out.clone();
            let buffered = std::mem::take(queue);
            let mut alive = true;
            for notification in buffered {
                if let Some(n) = reconcile(&mut seen, notification) {
                    if out.send(n).is_err() {
                        alive = false;
                        break;
                    }
                }
            }
            *state = if alive {
                DeliveryState::Live { out }
            } else {
                DeliveryState::Closed
            };
        }
    }

    /// Fan out to every matching subscriber, detaching dead ones.
    pub fn publish(&self, notification: ChangeNotification) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let subs: Vec<Arc<BusSubscriber>> = self.subscribers.lock().unwrap().clone();
        let mut dead = Vec::new();
        for sub in &subs {
            if !sub.offer(&notification) {
                dead.push(sub.id);
            }
        }
        if !dead.is_empty() {
            self.subscribers
                .lock()
                .unwrap()
                .retain(|s| !dead.contains(&s.id));
        }
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        let removed = {
            let mut subs = self.subscribers.lock().unwrap();
            match subs.iter().position(|s| s.id == id) {
                Some(idx) => Some(subs.swap_remove(idx)),
                None => None,
            }
        };
        if let Some(sub) = removed {
            sub.close();
        }
    }

    /// Complete every subscriber's stream and refuse further publishes.
    /// Idempotent; partial failure on one subscriber cannot affect others
    /// (closing is just dropping its sender).
    pub fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let subs = std::mem::take(&mut *self.subscribers.lock().unwrap());
        for sub in subs {
            sub.close();
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Decide what a buffered notification means to a subscriber that was just
/// served a snapshot. `seen` tracks the latest value the subscriber has been
/// shown per instance id; it is updated as the flush progresses so that later
/// buffered notifications compare against what was actually delivered.
///
/// - `Add`/`Modify` equal in content to the delivered value: drop (the
///   snapshot already represents it).
/// - `Add`/`Modify` differing for a shown id: deliver as `Modify`.
/// - `Add`/`Modify` for an unseen id: deliver as `Add`.
/// - `Delete` for a shown id: deliver; for an unseen id: drop (the
///   subscriber never saw the instance exist).
/// - Buffer markers pass through untouched.
fn reconcile(
    seen: &mut HashMap<String, InstanceInfo>,
    notification: ChangeNotification,
) -> Option<ChangeNotification> {
    match notification {
        ChangeNotification::Add(info) | ChangeNotification::Modify(info) => {
            match seen.get(&info.instance_id) {
                Some(prev) if *prev == info => None,
                Some(_) => {
                    seen.insert(info.instance_id.clone(), info.clone());
                    Some(ChangeNotification::Modify(info))
                }
                None => {
                    seen.insert(info.instance_id.clone(), info.clone());
                    Some(ChangeNotification::Add(info))
                }
            }
        }
        ChangeNotification::Delete(info) => {
            if seen.remove(&info.instance_id).is_some() {
                Some(ChangeNotification::Delete(info))
            } else {
                None
            }
        }
        marker @ (ChangeNotification::BufferStart(_) | ChangeNotification::BufferEnd(_)) => {
            Some(marker)
        }
    }
}
