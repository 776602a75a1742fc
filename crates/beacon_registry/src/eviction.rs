//! Background eviction sweeps with self-preservation.
//!
//! The coordinator removes stale sources (a disconnected replication peer, a
//! superseded replication session) through the registry's ordinary remove
//! path. Sweeps arrive as [`SourceMatcher`] requests on the handle and are
//! applied FIFO; the loop also re-evaluates deferred sweeps on an interval.
//!
//! Self-preservation: a sweep that would remove more than a configured
//! fraction of all source copies is deferred instead of applied, trading
//! strict freshness for availability during suspected partitions. Deferred
//! sweeps are retried every tick until head-room appears (instances
//! re-register, or enough copies drain through smaller sweeps).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::registry::{Registry, RegistryError};
use crate::source::SourceMatcher;

/// Configuration for the eviction coordinator.
#[derive(Clone, Copy, Debug)]
pub struct EvictionConfig {
    /// Re-evaluation interval for deferred sweeps.
    pub interval: Duration,
    /// Fraction of all source copies one sweep may remove before
    /// self-preservation defers it.
    pub allowed_eviction_fraction: f64,
    /// Escalate a deferred sweep from debug to warn logging after this long.
    pub defer_warn: Duration,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            allowed_eviction_fraction: 0.15,
            defer_warn: Duration::from_secs(60),
        }
    }
}

/// Result of evaluating one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing matched.
    Noop,
    /// Applied; this many source copies were removed.
    Applied(usize),
    /// Deferred by self-preservation.
    Deferred { would_evict: usize, allowed: usize },
}

/// Submits sweep requests to a running coordinator. Dropping the last handle
/// stops the loop.
#[derive(Clone)]
pub struct EvictionHandle {
    tx: mpsc::UnboundedSender<SourceMatcher>,
}

impl EvictionHandle {
    /// Queue a sweep. Returns false if the coordinator has stopped.
    pub fn request(&self, matcher: SourceMatcher) -> bool {
        self.tx.send(matcher).is_ok()
    }
}

struct PendingSweep {
    matcher: SourceMatcher,
    since: Instant,
}

/// Spawn the eviction coordinator for `registry`.
pub fn spawn(registry: Registry, cfg: EvictionConfig) -> EvictionHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<SourceMatcher>();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(cfg.interval);
        let mut pending: VecDeque<PendingSweep> = VecDeque::new();
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                req = rx.recv() => match req {
                    Some(matcher) => pending.push_back(PendingSweep {
                        matcher,
                        since: Instant::now(),
                    }),
                    None => break,
                }
            }
            if registry.is_shut_down() {
                break;
            }
            if let Err(err) = drain_pending(&registry, &cfg, &mut pending).await {
                tracing::warn!(error = ?err, "eviction sweep failed");
            }
        }
        tracing::debug!("eviction coordinator stopped");
    });
    EvictionHandle { tx }
}

async fn drain_pending(
    registry: &Registry,
    cfg: &EvictionConfig,
    pending: &mut VecDeque<PendingSweep>,
) -> anyhow::Result<()> {
    loop {
        let (outcome, deferred_for) = match pending.front() {
            Some(sweep) => (
                sweep_once(registry, cfg, &sweep.matcher).await?,
                sweep.since.elapsed(),
            ),
            None => break,
        };
        match outcome {
            SweepOutcome::Noop => {
                pending.pop_front();
            }
            SweepOutcome::Applied(removed) => {
                tracing::info!(removed, "eviction sweep applied");
                pending.pop_front();
            }
            SweepOutcome::Deferred {
                would_evict,
                allowed,
            } => {
                if deferred_for >= cfg.defer_warn {
                    tracing::warn!(
                        would_evict,
                        allowed,
                        ?deferred_for,
                        "self-preservation engaged; eviction sweep still deferred"
                    );
                } else {
                    tracing::debug!(would_evict, allowed, "eviction sweep deferred");
                }
                break;
            }
        }
    }
    Ok(())
}

/// Evaluate and, if permitted, apply a single sweep. Exposed so callers and
/// tests can drive sweeps deterministically without the background loop.
pub async fn sweep_once(
    registry: &Registry,
    cfg: &EvictionConfig,
    matcher: &SourceMatcher,
) -> Result<SweepOutcome, RegistryError> {
    let total = registry.source_count();
    let would_evict = registry.count_sources(matcher);
    if would_evict == 0 {
        return Ok(SweepOutcome::Noop);
    }
    let allowed = (total as f64 * cfg.allowed_eviction_fraction).floor() as usize;
    if would_evict > allowed {
        return Ok(SweepOutcome::Deferred {
            would_evict,
            allowed,
        });
    }
    let removed = registry.evict_all(matcher).await?;
    Ok(SweepOutcome::Applied(removed))
}
