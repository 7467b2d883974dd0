//! Tollgate - admission control for a local inference worker
//!
//! Tasks wait on a three-lane priority bus. Each cycle the scheduler takes a
//! resource snapshot, prices the next task in work units, checks it against a
//! finite budget, routes it to a role, screens any code it carries and hands it
//! to the executor. Roles can be hot-swapped through a staged shift protocol
//! without stopping the loop.

pub mod bus;
pub mod config;
pub mod domain;
pub mod economy;
pub mod error;
pub mod executor;
pub mod id;
pub mod llm;
pub mod monitor;
pub mod roles;
pub mod safety;
pub mod scheduler;
pub mod shift;

pub use error::{Result, TollgateError};
