//! Task bus: priority lanes, audit streams, state and broadcast.
//!
//! `TaskBus` is the typed surface the scheduler and shift manager use. It sits
//! on a `Store` backend:
//! - **MemoryStore**: single process, blocking pops wake on push
//! - **SqliteStore**: one database file shared by every process on the host

mod memory;
mod sqlite;
mod task_bus;
mod traits;

use std::sync::{Mutex, MutexGuard};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use task_bus::{ChannelSubscription, DEFAULT_STREAM_MAX_LEN, TaskBus};
pub use traits::{Store, Subscription};

use crate::error::{Result, TollgateError};

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| TollgateError::Store("store lock poisoned".to_string()))
}
