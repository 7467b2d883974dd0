//! Configuration for tollgate.
//!
//! One YAML file with kebab-case sections: `inference`, `scheduler`, `store`,
//! `shift`, `roles` and `jobs`. Every key is optional.

use eyre::Result;
use std::path::PathBuf;

pub use self::global::{
    GlobalConfig, InferenceConfig, JobsConfig, SchedulerSection, ShiftSection, StoreBackend, StoreConfig,
};

mod global;

/// Load configuration from the standard search paths.
///
/// Search order:
/// 1. Explicit path if provided
/// 2. .tollgate.yml in current directory (project config)
/// 3. ~/.config/tollgate/tollgate.yml (user config)
/// 4. Default values
pub fn load_config(explicit_path: Option<&PathBuf>) -> Result<GlobalConfig> {
    GlobalConfig::load(explicit_path)
}
