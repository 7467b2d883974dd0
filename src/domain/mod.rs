//! Domain types for Tollgate
//!
//! - Task: the queued work item and its lane mapping
//! - SystemSnapshot: resource reading used by admission
//! - Event: audit stream, channel and state key vocabulary

pub mod event;
pub mod snapshot;
pub mod task;

pub use event::{Channel, EntryId, LogEntry, LogStream, StateKey, event_types};
pub use snapshot::SystemSnapshot;
pub use task::{Lane, Priority, Task};
