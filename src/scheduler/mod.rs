//! Scheduling: admission control and recurring job production.
//!
//! This module provides:
//! - **AdmissionScheduler**: the per-cycle loop that pops a task, prices it,
//!   gates it on budget and safety, routes it to a role and dispatches it.
//! - **CostEstimator**: asks the admin model for a unit estimate.
//! - **ResultSink**: keeps a truncated summary of each completed task.
//! - **JobPlanner**: pushes recurring maintenance tasks onto the bus.
//!
//! # Example
//!
//! ```ignore
//! use tollgate::bus::{MemoryStore, TaskBus};
//! use tollgate::scheduler::{AdmissionScheduler, SchedulerConfig};
//!
//! let bus = TaskBus::new(Arc::new(MemoryStore::new()));
//! let mut scheduler = AdmissionScheduler::new(bus, inference, monitor, executor, SchedulerConfig::default());
//! let stop = scheduler.stop_handle();
//! scheduler.start().await?;
//! ```

mod admission;
mod estimate;
mod recurring;
mod sink;

pub use admission::{
    AdmissionScheduler, Budget, CycleOutcome, DeferReason, SchedulerConfig, StopHandle, build_prompt,
};
pub use estimate::{CostEstimator, FALLBACK_COST, extract_first_number};
pub use recurring::{JOB_SOURCE, JobPlanner, RecurringJob, default_jobs};
pub use sink::{RESULT_KEY_PREFIX, ResultSink, ResultSummary};
