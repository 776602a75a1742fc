//! Registry change notifications.

use serde::{Deserialize, Serialize};

use crate::instance::InstanceInfo;
use crate::interest::Interest;
use crate::source::Source;

/// One registry state transition for one instance, or a buffer boundary.
///
/// `Add`/`Modify`/`Delete` carry the winning [`InstanceInfo`] after the
/// transition (for `Delete`, the last winning value). Buffer markers carry no
/// instance data: `BufferStart(Some(source))` / `BufferEnd(Some(source))`
/// demarcate a replication batch from that source, used by eviction sweeps to
/// detect a completed full refresh; `BufferStart(None)` / `BufferEnd(None)`
/// bracket the initial snapshot batch of a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChangeNotification {
    Add(InstanceInfo),
    Modify(InstanceInfo),
    Delete(InstanceInfo),
    BufferStart(Option<Source>),
    BufferEnd(Option<Source>),
}

impl ChangeNotification {
    /// Instance payload, absent for buffer markers.
    pub fn instance(&self) -> Option<&InstanceInfo> {
        match self {
            ChangeNotification::Add(info)
            | ChangeNotification::Modify(info)
            | ChangeNotification::Delete(info) => Some(info),
            ChangeNotification::BufferStart(_) | ChangeNotification::BufferEnd(_) => None,
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance().map(|info| info.instance_id.as_str())
    }

    pub fn is_data(&self) -> bool {
        self.instance().is_some()
    }

    /// Whether this notification belongs in a stream filtered by `interest`.
    /// Buffer markers always pass.
    pub fn matches(&self, interest: &Interest) -> bool {
        match self.instance() {
            Some(info) => interest.matches(info),
            None => true,
        }
    }
}
