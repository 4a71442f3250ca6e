use crate::paths::ConfigError;
use crate::{CONFIG_BACKEND, ConfigBackend};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Sección `[sync]`: qué árbol se refleja y con qué cadencia.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SyncConfig {
  /// Remote directory to mirror (POSIX path on the remote host).
  pub remote_root: String,

  /// Local directory receiving the mirror.
  pub local_root: PathBuf,

  /// Local path of the scan helper binary shipped to the remote host.
  pub helper_local_path: PathBuf,

  /// Where the helper gets installed on the remote host.
  pub helper_remote_path: String,

  /// Seconds between scan cycles.
  #[serde(default = "default_scan_interval_secs")]
  pub scan_interval_secs: u64,
}

fn default_scan_interval_secs() -> u64 {
  30
}

impl Default for SyncConfig {
  fn default() -> Self {
    SyncConfig {
      remote_root: String::new(),
      local_root: PathBuf::new(),
      helper_local_path: PathBuf::new(),
      helper_remote_path: String::new(),
      scan_interval_secs: default_scan_interval_secs(),
    }
  }
}

impl SyncConfig {
  pub fn load() -> Result<Self, ConfigError> {
    let cfg = CONFIG_BACKEND.load_section_with_default("sync")?;
    CONFIG_BACKEND.save_section("sync", &cfg)?;
    Ok(cfg)
  }

  pub fn save(&self) -> Result<(), ConfigError> {
    CONFIG_BACKEND.save_section("sync", self)
  }

  /// First-run detection: a freshly written config file has every required
  /// field empty. Refusing to start beats mirroring the wrong tree.
  pub fn validate(&self) -> Result<(), ConfigError> {
    let missing = [
      ("sync.remote_root", self.remote_root.is_empty()),
      ("sync.local_root", self.local_root.as_os_str().is_empty()),
      ("sync.helper_local_path", self.helper_local_path.as_os_str().is_empty()),
      ("sync.helper_remote_path", self.helper_remote_path.is_empty()),
    ];

    for (key, empty) in missing {
      if empty {
        return Err(ConfigError::Incomplete(key.to_string()));
      }
    }

    Ok(())
  }
}

/// Sección `[transport]`: cómo llegar al host remoto.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TransportConfig {
  /// Remote host name or address.
  pub host: String,

  /// Account used for ssh/scp.
  pub user: String,

  #[serde(default = "default_ssh_port")]
  pub port: u16,
}

fn default_ssh_port() -> u16 {
  22
}

impl Default for TransportConfig {
  fn default() -> Self {
    TransportConfig { host: String::new(), user: String::new(), port: default_ssh_port() }
  }
}

impl TransportConfig {
  pub fn load() -> Result<Self, ConfigError> {
    let cfg = CONFIG_BACKEND.load_section_with_default("transport")?;
    CONFIG_BACKEND.save_section("transport", &cfg)?;
    Ok(cfg)
  }

  pub fn save(&self) -> Result<(), ConfigError> {
    CONFIG_BACKEND.save_section("transport", self)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.host.is_empty() {
      return Err(ConfigError::Incomplete("transport.host".to_string()));
    }
    if self.user.is_empty() {
      return Err(ConfigError::Incomplete("transport.user".to_string()));
    }
    Ok(())
  }

  /// `user@host` as ssh and scp expect it.
  pub fn target(&self) -> String {
    format!("{}@{}", self.user, self.host)
  }
}

/// Sección `[jobs]`: límites del controlador de transferencias.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JobsConfig {
  /// Maximum simultaneous downloads.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent_downloads: usize,

  /// Total attempts per job before it is marked failed.
  #[serde(default = "default_max_attempts")]
  pub max_attempts: u32,

  /// Base delay for exponential retry backoff, in milliseconds.
  #[serde(default = "default_backoff_base_ms")]
  pub backoff_base_ms: u64,

  /// How long a stop command waits before force-killing a worker.
  #[serde(default = "default_stop_grace_ms")]
  pub stop_grace_ms: u64,
}

fn default_max_concurrent() -> usize {
  2
}

fn default_max_attempts() -> u32 {
  3
}

fn default_backoff_base_ms() -> u64 {
  2_000
}

fn default_stop_grace_ms() -> u64 {
  5_000
}

impl Default for JobsConfig {
  fn default() -> Self {
    JobsConfig {
      max_concurrent_downloads: default_max_concurrent(),
      max_attempts: default_max_attempts(),
      backoff_base_ms: default_backoff_base_ms(),
      stop_grace_ms: default_stop_grace_ms(),
    }
  }
}

impl JobsConfig {
  pub fn load() -> Result<Self, ConfigError> {
    let cfg = CONFIG_BACKEND.load_section_with_default("jobs")?;
    CONFIG_BACKEND.save_section("jobs", &cfg)?;
    Ok(cfg)
  }

  pub fn save(&self) -> Result<(), ConfigError> {
    CONFIG_BACKEND.save_section("jobs", self)
  }
}

/// Sección `[autoqueue]`: reglas de selección automática.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AutoQueueConfig {
  #[serde(default = "default_enabled")]
  pub enabled: bool,

  /// Glob patterns for paths to queue automatically.
  #[serde(default)]
  pub allow: Vec<String>,

  /// Glob patterns that are never queued; a deny match beats any allow.
  #[serde(default)]
  pub deny: Vec<String>,

  /// Suffixes that mark a downloaded file as extractable.
  #[serde(default = "default_extract_suffixes")]
  pub extract_suffixes: Vec<String>,
}

fn default_enabled() -> bool {
  true
}

fn default_extract_suffixes() -> Vec<String> {
  vec!["zip".into(), "rar".into(), "tar".into(), "tar.gz".into()]
}

impl Default for AutoQueueConfig {
  fn default() -> Self {
    AutoQueueConfig {
      enabled: default_enabled(),
      allow: Vec::new(),
      deny: Vec::new(),
      extract_suffixes: default_extract_suffixes(),
    }
  }
}

impl AutoQueueConfig {
  pub fn load() -> Result<Self, ConfigError> {
    let cfg = CONFIG_BACKEND.load_section_with_default("autoqueue")?;
    CONFIG_BACKEND.save_section("autoqueue", &cfg)?;
    Ok(cfg)
  }

  pub fn save(&self) -> Result<(), ConfigError> {
    CONFIG_BACKEND.save_section("autoqueue", self)
  }
}
