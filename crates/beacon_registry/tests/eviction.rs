//! Eviction sweeps:
//! - matcher precision and size accounting,
//! - notifications flowing through the ordinary remove path,
//! - self-preservation deferral and release,
//! - the background coordinator end-to-end.

mod common;

use std::time::Duration;

use beacon_registry::{
    eviction, ChangeNotification, EvictionConfig, Interest, Origin, Registry, Source,
    SourceMatcher,
};
use common::{down, drain_snapshot, init_tracing, instance};

#[tokio::test]
async fn evict_all_removes_exactly_the_matched_sources() {
    init_tracing();
    let registry = Registry::new();
    let local = Source::local("c1");
    let peer1 = Source::with_id(Origin::Replicated, "peer1", 1);
    let peer2 = Source::with_id(Origin::Replicated, "peer2", 1);

    // i-1 is dual-sourced, i-2 only from peer1, i-3 only from peer2.
    registry
        .register(instance("i-1", "foo", 1), local)
        .await
        .unwrap();
    registry
        .register(down("i-1", "foo", 2), peer1.clone())
        .await
        .unwrap();
    registry
        .register(instance("i-2", "foo", 1), peer1)
        .await
        .unwrap();
    registry
        .register(instance("i-3", "foo", 1), peer2)
        .await
        .unwrap();

    assert_eq!(registry.size(), 3);
    assert_eq!(registry.source_count(), 4);

    let mut stream = registry.for_interest(Interest::FullRegistry);
    drain_snapshot(&mut stream).await;

    let matcher = SourceMatcher::by_origin_name(Origin::Replicated, "peer1");
    let removed = registry.evict_all(&matcher).await.unwrap();
    assert_eq!(removed, 2);

    // Only the record whose entire source set was evicted is gone.
    assert_eq!(registry.size(), 2);
    assert_eq!(registry.source_count(), 2);
    assert_eq!(registry.count_sources(&matcher), 0);

    // i-1 kept its local winner (no notification); i-2 was deleted.
    assert_eq!(
        stream.try_recv(),
        Some(ChangeNotification::Delete(instance("i-2", "foo", 1)))
    );
    assert_eq!(stream.try_recv(), None);
}

#[tokio::test]
async fn evict_all_except_retains_only_matched_sources() {
    init_tracing();
    let registry = Registry::new();
    registry
        .register(instance("i-1", "foo", 1), Source::local("c1"))
        .await
        .unwrap();
    registry
        .register(instance("i-2", "foo", 1), Source::replicated("peer1"))
        .await
        .unwrap();
    registry
        .register(instance("i-3", "foo", 1), Source::bootstrap("seed"))
        .await
        .unwrap();

    let keep_local = SourceMatcher::by_origin(Origin::Local);
    let removed = registry.evict_all_except(&keep_local).await.unwrap();
    assert_eq!(removed, 2);
    assert_eq!(registry.size(), 1);
    assert_eq!(
        registry.for_snapshot(&Interest::FullRegistry),
        vec![instance("i-1", "foo", 1)]
    );
}

#[tokio::test]
async fn stale_replication_session_eviction_prefers_newer_session() {
    init_tracing();
    let registry = Registry::new();
    let old_session = Source::with_id(Origin::Replicated, "peer1", 1);
    let new_session = Source::with_id(Origin::Replicated, "peer1", 2);

    registry
        .register(instance("i-1", "foo", 1), old_session)
        .await
        .unwrap();
    registry
        .register(instance("i-1", "foo", 2), new_session.clone())
        .await
        .unwrap();

    let stale = SourceMatcher::older_than(Origin::Replicated, "peer1", 2);
    let removed = registry.evict_all(&stale).await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(registry.size(), 1);
    assert_eq!(
        registry.for_snapshot(&Interest::FullRegistry),
        vec![instance("i-1", "foo", 2)]
    );
}

#[tokio::test]
async fn self_preservation_defers_oversized_sweeps() {
    init_tracing();
    let registry = Registry::new();
    let cfg = EvictionConfig {
        allowed_eviction_fraction: 0.3,
        ..EvictionConfig::default()
    };

    // Ten source copies, four of them from the suspect peer.
    for n in 0..6u32 {
        registry
            .register(instance(&format!("i-l{n}"), "foo", 1), Source::local(format!("c{n}")))
            .await
            .unwrap();
    }
    let peer = "peer1";
    for n in 0..4u32 {
        registry
            .register(
                instance(&format!("i-p{n}"), "foo", 1),
                Source::with_id(Origin::Replicated, peer, u64::from(n)),
            )
            .await
            .unwrap();
    }
    assert_eq!(registry.source_count(), 10);

    // 4 > floor(10 * 0.3) = 3: deferred, nothing removed.
    let matcher = SourceMatcher::by_origin_name(Origin::Replicated, peer);
    let outcome = eviction::sweep_once(&registry, &cfg, &matcher).await.unwrap();
    assert_eq!(
        outcome,
        eviction::SweepOutcome::Deferred {
            would_evict: 4,
            allowed: 3
        }
    );
    assert_eq!(registry.source_count(), 10);

    // Headroom appears (more registrations); the retried sweep applies.
    for n in 6..10u32 {
        registry
            .register(instance(&format!("i-l{n}"), "foo", 1), Source::local(format!("c{n}")))
            .await
            .unwrap();
    }
    let outcome = eviction::sweep_once(&registry, &cfg, &matcher).await.unwrap();
    assert_eq!(outcome, eviction::SweepOutcome::Applied(4));
    assert_eq!(registry.count_sources(&matcher), 0);
}

#[tokio::test]
async fn sweep_with_no_matches_is_a_noop() {
    init_tracing();
    let registry = Registry::new();
    registry
        .register(instance("i-1", "foo", 1), Source::local("c1"))
        .await
        .unwrap();

    let matcher = SourceMatcher::by_origin_name(Origin::Replicated, "ghost");
    let outcome = eviction::sweep_once(&registry, &EvictionConfig::default(), &matcher)
        .await
        .unwrap();
    assert_eq!(outcome, eviction::SweepOutcome::Noop);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coordinator_applies_requested_sweeps() {
    init_tracing();
    let registry = Registry::new();
    for n in 0..8u32 {
        registry
            .register(instance(&format!("i-{n}"), "foo", 1), Source::local(format!("c{n}")))
            .await
            .unwrap();
    }
    registry
        .register(
            instance("i-peer", "foo", 1),
            Source::with_id(Origin::Replicated, "peer1", 1),
        )
        .await
        .unwrap();

    let handle = eviction::spawn(
        registry.clone(),
        EvictionConfig {
            interval: Duration::from_millis(20),
            ..EvictionConfig::default()
        },
    );
    assert!(handle.request(SourceMatcher::by_origin_name(Origin::Replicated, "peer1")));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while registry.size() != 8 {
        assert!(
            tokio::time::Instant::now() < deadline,
            "sweep was not applied in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        registry.count_sources(&SourceMatcher::by_origin(Origin::Replicated)),
        0
    );
}
