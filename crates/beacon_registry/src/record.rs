//! Multi-source instance record and winner arbitration.
//!
//! One [`InstanceRecord`] owns every per-source copy of a single instance's
//! data and caches the winning copy. Arbitration is a fixed total order so
//! that every node fed the same source set computes the same winner with no
//! coordination: highest `(origin_priority, version, source_id, source_name)`
//! wins, with `Local > Replicated > Bootstrap`. The trailing fields only
//! break ties; they make the order total, they carry no semantic weight.
//!
//! Mutations are expected to arrive through the instance id's serialized
//! lane, so this type is single-writer and keeps no internal locking.

use std::collections::HashMap;

use crate::instance::InstanceInfo;
use crate::notification::ChangeNotification;
use crate::source::Source;

/// Outcome of a registry mutation. Expired variants are normal
/// distributed-systems races (reordered replication traffic, redundant
/// unregister), never errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    AddOk,
    AddExpired,
    RemoveOk,
    RemoveExpired,
}

/// Per-instance holder of all source copies plus the cached winner.
#[derive(Debug)]
pub struct InstanceRecord {
    instance_id: String,
    copies: HashMap<Source, InstanceInfo>,
    winner: Option<(Source, InstanceInfo)>,
}

impl InstanceRecord {
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            copies: HashMap::new(),
            winner: None,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Insert or replace `source`'s copy. A write whose version does not
    /// advance the stored copy is rejected as `AddExpired` without error;
    /// that silently absorbs duplicate and reordered replication traffic.
    pub fn update(
        &mut self,
        source: &Source,
        info: InstanceInfo,
    ) -> (Status, Vec<ChangeNotification>) {
        if let Some(existing) = self.copies.get(source) {
            if existing.version >= info.version {
                tracing::debug!(
                    instance = %self.instance_id,
                    source = %source,
                    stored = existing.version,
                    received = info.version,
                    "expired update rejected"
                );
                return (Status::AddExpired, Vec::new());
            }
        }
        self.copies.insert(source.clone(), info);
        (Status::AddOk, self.refresh_winner())
    }

    /// Remove `source`'s copy. Removing an absent copy is an idempotent
    /// `RemoveExpired` no-op.
    pub fn remove(&mut self, source: &Source) -> (Status, Vec<ChangeNotification>) {
        if self.copies.remove(source).is_none() {
            return (Status::RemoveExpired, Vec::new());
        }
        (Status::RemoveOk, self.refresh_winner())
    }

    /// Remove every copy matched by `matcher`; returns how many were
    /// removed along with the resulting winner-transition notifications.
    pub fn remove_matching(
        &mut self,
        matcher: &crate::source::SourceMatcher,
    ) -> (usize, Vec<ChangeNotification>) {
        let before = self.copies.len();
        self.copies.retain(|source, _| !matcher.matches(source));
        let removed = before - self.copies.len();
        if removed == 0 {
            return (0, Vec::new());
        }
        (removed, self.refresh_winner())
    }

    pub fn is_empty(&self) -> bool {
        self.copies.is_empty()
    }

    /// Number of source copies held.
    pub fn source_count(&self) -> usize {
        self.copies.len()
    }

    pub fn count_matching(&self, matcher: &crate::source::SourceMatcher) -> usize {
        self.copies.keys().filter(|s| matcher.matches(s)).count()
    }

    /// Current winning value, if any source holds data.
    pub fn winner(&self) -> Option<&InstanceInfo> {
        self.winner.as_ref().map(|(_, info)| info)
    }

    pub fn winning_source(&self) -> Option<&Source> {
        self.winner.as_ref().map(|(source, _)| source)
    }

    pub fn get(&self, source: &Source) -> Option<&InstanceInfo> {
        self.copies.get(source)
    }

    /// Re-run arbitration and emit the winner transition, if any. The
    /// transition is keyed on winner *content*: a source-map change that
    /// leaves the winning value identical emits nothing.
    fn refresh_winner(&mut self) -> Vec<ChangeNotification> {
        let next = self.arbitrate();
        let out = match (&self.winner, &next) {
            (None, Some((_, new))) => vec![ChangeNotification::Add(new.clone())],
            (Some((_, old)), Some((_, new))) if old != new => {
                vec![ChangeNotification::Modify(new.clone())]
            }
            (Some((_, old)), None) => vec![ChangeNotification::Delete(old.clone())],
            _ => Vec::new(),
        };
        self.winner = next;
        out
    }

    fn arbitrate(&self) -> Option<(Source, InstanceInfo)> {
        self.copies
            .iter()
            .max_by(|(sa, ia), (sb, ib)| {
                (sa.origin.priority(), ia.version, sa.id, &sa.name).cmp(&(
                    sb.origin.priority(),
                    ib.version,
                    sb.id,
                    &sb.name,
                ))
            })
            .map(|(source, info)| (source.clone(), info.clone()))
    }
}
