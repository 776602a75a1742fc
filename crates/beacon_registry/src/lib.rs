//! Multi-source service-discovery registry core.
//!
//! Instances advertise themselves through [`Registry::register`] /
//! [`Registry::update`] / [`Registry::unregister`] calls attributed to a
//! [`Source`] (a local client, a replication peer, or a bootstrap loader).
//! Interested parties subscribe with [`Registry::for_interest`] and receive a
//! consistent snapshot followed by gap-free real-time change notifications.
//!
//! Per instance id, mutations are serialized through a FIFO task lane
//! ([`invoker::SerializedInvoker`]); operations on different ids run fully in
//! parallel. When several sources hold data for the same id, a deterministic
//! arbitration rule picks the single winning copy (see [`record`]).
//!
//! Eviction of stale sources runs through [`eviction::spawn`], which applies
//! sweeps via the ordinary remove path and defers them under a
//! self-preservation threshold during suspected partitions.

pub mod bus;
pub mod eviction;
pub mod index;
pub mod instance;
pub mod interest;
pub mod invoker;
pub mod notification;
pub mod record;
pub mod registry;
pub mod source;

pub use eviction::{EvictionConfig, EvictionHandle, SweepOutcome};
pub use index::NotificationStream;
pub use instance::{Delta, InstanceInfo, InstanceStatus};
pub use interest::{Interest, MatchOperator};
pub use notification::ChangeNotification;
pub use record::Status;
pub use registry::{Registry, RegistryError};
pub use source::{Origin, Source, SourceMatcher};
