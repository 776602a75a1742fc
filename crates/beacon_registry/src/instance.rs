//! Instance payload value types.
//!
//! The registry treats [`InstanceInfo`] as an immutable value: field
//! semantics belong to the external model, the core only reads the identity
//! and routing fields used by interest matching, plus `version` for
//! staleness comparison.

use serde::{Deserialize, Serialize};

/// Coarse lifecycle status of an advertised instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceStatus {
    Starting,
    Up,
    Down,
    OutOfService,
    Unknown,
}

/// Versioned, immutable instance payload keyed by `instance_id`.
///
/// `version` must increase monotonically per source; a write carrying a
/// version not greater than the stored one is rejected as expired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub instance_id: String,
    pub app: String,
    pub vip_address: Option<String>,
    pub secure_vip_address: Option<String>,
    pub status: InstanceStatus,
    pub version: u64,
}

impl InstanceInfo {
    pub fn new(instance_id: impl Into<String>, app: impl Into<String>, version: u64) -> Self {
        Self {
            instance_id: instance_id.into(),
            app: app.into(),
            vip_address: None,
            secure_vip_address: None,
            status: InstanceStatus::Up,
            version,
        }
    }

    pub fn with_status(mut self, status: InstanceStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_vip(mut self, vip: impl Into<String>) -> Self {
        self.vip_address = Some(vip.into());
        self
    }

    pub fn with_secure_vip(mut self, vip: impl Into<String>) -> Self {
        self.secure_vip_address = Some(vip.into());
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

/// A single field change accompanying an [`update`](crate::Registry::update).
///
/// The core does not interpret deltas; it stores the full updated value and
/// re-derives winner changes by content comparison. Deltas are carried for
/// external read-models and surfaced in debug logs only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub field: String,
    pub value: String,
}

impl Delta {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}
