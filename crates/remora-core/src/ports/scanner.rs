use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Información básica de un archivo o directorio visto por un scan.
///
/// Snapshot inmutable: cada scan produce entradas frescas, nunca se mutan.
/// `path` es relativo a la raíz del scan, con separadores POSIX, y es la
/// clave de identidad en todo el motor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
  pub path: String,
  pub is_dir: bool,
  pub size: u64,
  /// Modification time, unix seconds.
  pub mtime: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
  #[error("scan root unavailable: {0}")]
  RootUnavailable(String),

  #[error("remote scan failed: {0}")]
  Remote(String),

  #[error("helper install failed: {0}")]
  Install(String),

  #[error("listing decode failed: {0}")]
  Decode(String),
}

impl ScanError {
  /// Install failures are setup problems that will not fix themselves;
  /// everything else is cycle-local and the driver just scans again later.
  pub fn is_fatal(&self) -> bool {
    matches!(self, ScanError::Install(_))
  }
}

/// Port de enumeración de un árbol de archivos (local o remoto).
///
/// Cada llamada es un snapshot completo y autocontenido; no se arrastra
/// estado incremental entre llamadas.
#[async_trait]
pub trait Scanner: Send + Sync {
  async fn scan(&self) -> Result<Vec<FileEntry>, ScanError>;
}
