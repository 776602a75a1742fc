#![allow(dead_code)]

use beacon_registry::{ChangeNotification, InstanceInfo, InstanceStatus, NotificationStream};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn instance(id: &str, app: &str, version: u64) -> InstanceInfo {
    InstanceInfo::new(id, app, version)
}

pub fn down(id: &str, app: &str, version: u64) -> InstanceInfo {
    instance(id, app, version).with_status(InstanceStatus::Down)
}

/// Read the initial snapshot batch: consumes the `BufferStart(None)` /
/// `BufferEnd(None)` markers and returns the `Add` payloads in between.
pub async fn drain_snapshot(stream: &mut NotificationStream) -> Vec<InstanceInfo> {
    assert_eq!(
        stream.recv().await,
        Some(ChangeNotification::BufferStart(None)),
        "snapshot batch must open with a buffer marker"
    );
    let mut adds = Vec::new();
    loop {
        match stream.recv().await {
            Some(ChangeNotification::Add(info)) => adds.push(info),
            Some(ChangeNotification::BufferEnd(None)) => break,
            other => panic!("unexpected notification in snapshot batch: {other:?}"),
        }
    }
    adds
}
