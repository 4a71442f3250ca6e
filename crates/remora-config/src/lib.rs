mod backend;
mod model;
mod paths;

pub use backend::{ConfigBackend, TomlConfigBackend};
pub use model::{AutoQueueConfig, JobsConfig, SyncConfig, TransportConfig};
pub use paths::{ConfigError, RemoraPaths};

use once_cell::sync::Lazy;

// Singleton de paths (portable / system)
pub static PATHS: Lazy<RemoraPaths> =
  Lazy::new(|| RemoraPaths::detect().expect("failed to init RemoraPaths"));

// Singleton del backend de config
pub static CONFIG_BACKEND: Lazy<TomlConfigBackend> =
  Lazy::new(|| TomlConfigBackend::new(PATHS.clone()));
