//! Concurrent instance registry.
//!
//! The registry maps instance id to its multi-source record in a sharded
//! concurrent map; unrelated ids never contend on a common lock. All
//! mutations for one id are funneled through that id's serialized task lane,
//! and the resulting winner-transition notifications are published from
//! inside the lane task, so the per-id notification order on the bus is
//! exactly the lane execution order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use thiserror::Error;

use crate::bus::NotificationBus;
use crate::index::{IndexEngine, NotificationStream};
use crate::instance::{Delta, InstanceInfo};
use crate::interest::Interest;
use crate::invoker::SerializedInvoker;
use crate::notification::ChangeNotification;
use crate::record::{InstanceRecord, Status};
use crate::source::{Source, SourceMatcher};

/// Genuine registry failures. The expected distributed-systems races are
/// [`Status`] values, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("registry is shut down")]
    ShutDown,
    #[error("registry task aborted before completion")]
    TaskAborted,
}

struct RegistryInner {
    records: DashMap<String, Mutex<InstanceRecord>>,
    bus: Arc<NotificationBus>,
    invoker: SerializedInvoker,
    index: IndexEngine,
    shut: AtomicBool,
}

/// Cheaply cloneable handle to one registry instance. The notification bus
/// is owned by the registry and torn down with it.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<RegistryInner>,
}

impl Registry {
    pub fn new() -> Self {
        let bus = Arc::new(NotificationBus::new());
        Self {
            inner: Arc::new(RegistryInner {
                records: DashMap::new(),
                bus: bus.clone(),
                invoker: SerializedInvoker::new(),
                index: IndexEngine::new(bus),
                shut: AtomicBool::new(false),
            }),
        }
    }

    /// Register `info` as asserted by `source`, creating the record on first
    /// use. Stale versions come back as `Status::AddExpired`.
    pub async fn register(
        &self,
        info: InstanceInfo,
        source: Source,
    ) -> Result<Status, RegistryError> {
        let id = info.instance_id.clone();
        tracing::debug!(instance = %id, source = %source, version = info.version, "register");
        self.apply(id, true, move |rec| rec.update(&source, info))
            .await
    }

    /// Update `source`'s copy to `info`. `deltas` describe the field changes
    /// for external read-models; the core re-derives winner changes from the
    /// full value.
    pub async fn update(
        &self,
        info: InstanceInfo,
        deltas: Vec<Delta>,
        source: Source,
    ) -> Result<Status, RegistryError> {
        let id = info.instance_id.clone();
        tracing::debug!(
            instance = %id,
            source = %source,
            version = info.version,
            deltas = deltas.len(),
            "update"
        );
        self.apply(id, true, move |rec| rec.update(&source, info))
            .await
    }

    /// Remove `source`'s copy of `info`'s instance. Unknown instance or
    /// absent copy is `Status::RemoveExpired`, an idempotent no-op.
    pub async fn unregister(
        &self,
        info: InstanceInfo,
        source: Source,
    ) -> Result<Status, RegistryError> {
        let id = info.instance_id.clone();
        tracing::debug!(instance = %id, source = %source, "unregister");
        self.apply(id, false, move |rec| rec.remove(&source)).await
    }

    /// Records currently present (non-empty source set).
    pub fn size(&self) -> usize {
        self.inner.records.len()
    }

    /// Total number of source copies across all records; the denominator for
    /// eviction self-preservation.
    pub fn source_count(&self) -> usize {
        self.inner
            .records
            .iter()
            .map(|entry| entry.value().lock().unwrap().source_count())
            .sum()
    }

    /// Dry-run count of the sources a sweep with `matcher` would remove.
    pub fn count_sources(&self, matcher: &SourceMatcher) -> usize {
        self.inner
            .records
            .iter()
            .map(|entry| entry.value().lock().unwrap().count_matching(matcher))
            .sum()
    }

    /// One eventually-consistent pass over the current winners matching
    /// `interest`. Concurrent mutations may or may not be reflected; every
    /// element was a valid winner at some instant during the call.
    pub fn for_snapshot(&self, interest: &Interest) -> Vec<InstanceInfo> {
        self.inner
            .records
            .iter()
            .filter_map(|entry| {
                let rec = entry.value().lock().unwrap();
                rec.winner().filter(|info| interest.matches(info)).cloned()
            })
            .collect()
    }

    /// Subscribe to `interest`: the current matching state as an `Add` batch
    /// (bracketed by `BufferStart(None)`/`BufferEnd(None)`), then every
    /// subsequent matching notification, gap-free and without duplicates
    /// across the boundary. The stream completes on shutdown; dropping it
    /// cancels the subscription.
    pub fn for_interest(&self, interest: Interest) -> NotificationStream {
        let inner = self.inner.clone();
        self.inner.index.open(interest, move || {
            inner
                .records
                .iter()
                .filter_map(|entry| entry.value().lock().unwrap().winner().cloned())
                .collect()
        })
    }

    /// Remove every source copy matched by `matcher`, through the ordinary
    /// per-id remove path (so the usual `Modify`/`Delete` notifications are
    /// emitted). Returns the number of copies removed.
    pub async fn evict_all(&self, matcher: &SourceMatcher) -> Result<usize, RegistryError> {
        if self.inner.shut.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }
        let ids: Vec<String> = self
            .inner
            .records
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        let mut total = 0usize;
        for id in ids {
            let inner = self.inner.clone();
            let key = id.clone();
            let matcher = matcher.clone();
            let rx = self.inner.invoker.submit(&id, move || {
                let Some(entry) = inner.records.get(&key) else {
                    return (0usize, false);
                };
                let mut rec = entry.value().lock().unwrap();
                let (removed, notes) = rec.remove_matching(&matcher);
                let emptied = rec.is_empty();
                drop(rec);
                drop(entry);
                if emptied {
                    inner
                        .records
                        .remove_if(&key, |_, rec| rec.lock().unwrap().is_empty());
                }
                for n in notes {
                    inner.bus.publish(n);
                }
                (removed, emptied)
            });
            let (removed, gone) = rx.await.map_err(|_| RegistryError::TaskAborted)?;
            if gone {
                self.inner.invoker.retire(&id);
            }
            total += removed;
        }
        if total > 0 {
            tracing::info!(removed = total, "eviction removed source copies");
        }
        Ok(total)
    }

    /// Remove every source copy *not* matched by `retain`.
    pub async fn evict_all_except(&self, retain: &SourceMatcher) -> Result<usize, RegistryError> {
        self.evict_all(&retain.negate()).await
    }

    /// Publish a replication-batch start marker for `source`.
    pub fn mark_buffer_start(&self, source: Source) {
        self.inner
            .bus
            .publish(ChangeNotification::BufferStart(Some(source)));
    }

    /// Publish a replication-batch end marker for `source`.
    pub fn mark_buffer_end(&self, source: Source) {
        self.inner
            .bus
            .publish(ChangeNotification::BufferEnd(Some(source)));
    }

    /// Complete all outstanding interest streams cleanly and refuse further
    /// mutations. Idempotent.
    pub fn shutdown(&self) {
        if self.inner.shut.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(records = self.size(), "registry shutting down");
        self.inner.bus.close_all();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut.load(Ordering::Acquire)
    }

    /// Run `op` on `id`'s record inside its serialized lane, publish the
    /// resulting notifications, and drop the record (and retire its lane)
    /// once its source set empties.
    async fn apply<F>(
        &self,
        id: String,
        create_missing: bool,
        op: F,
    ) -> Result<Status, RegistryError>
    where
        F: FnOnce(&mut InstanceRecord) -> (Status, Vec<ChangeNotification>) + Send + 'static,
    {
        if self.inner.shut.load(Ordering::Acquire) {
            return Err(RegistryError::ShutDown);
        }
        let inner = self.inner.clone();
        let key = id.clone();
        let rx = self.inner.invoker.submit(&id, move || {
            let (status, notes, emptied) = if create_missing {
                let entry = inner
                    .records
                    .entry(key.clone())
                    .or_insert_with(|| Mutex::new(InstanceRecord::new(key.clone())));
                let mut rec = entry.lock().unwrap();
                let (status, notes) = op(&mut rec);
                let emptied = rec.is_empty();
                drop(rec);
                drop(entry);
                (status, notes, emptied)
            } else {
                match inner.records.get(&key) {
                    None => (Status::RemoveExpired, Vec::new(), false),
                    Some(entry) => {
                        let mut rec = entry.value().lock().unwrap();
                        let (status, notes) = op(&mut rec);
                        let emptied = rec.is_empty();
                        drop(rec);
                        drop(entry);
                        (status, notes, emptied)
                    }
                }
            };
            if emptied {
                inner
                    .records
                    .remove_if(&key, |_, rec| rec.lock().unwrap().is_empty());
            }
            for n in notes {
                inner.bus.publish(n);
            }
            (status, emptied)
        });

        let (status, emptied) = rx.await.map_err(|_| RegistryError::TaskAborted)?;
        if emptied {
            self.inner.invoker.retire(&id);
        }
        Ok(status)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
