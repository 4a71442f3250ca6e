//! Persistencia en disco del estado del motor.
//!
//! Un archivo JSON por clave bajo el directorio de estado, escrito de forma
//! atómica. Suficiente para lo que guarda el motor (cola de trabajos,
//! snapshot del modelo): volúmenes pequeños, una escritura por mutación.

use std::fs;
use std::io;
use std::path::PathBuf;

use tracing::debug;

use remora_core::ports::{StateStore, StoreError};
use remora_fs::atomic_write;

/// Almacén clave→bytes respaldado por archivos `<clave>.json`.
pub struct JsonStateStore {
  dir: PathBuf,
}

impl JsonStateStore {
  /// Abre (creando si hace falta) el directorio de estado.
  pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let dir = dir.into();
    fs::create_dir_all(&dir).map_err(|e| StoreError::Io(format!("{}: {e}", dir.display())))?;
    Ok(JsonStateStore { dir })
  }

  fn path_for(&self, key: &str) -> PathBuf {
    self.dir.join(format!("{key}.json"))
  }
}

impl StateStore for JsonStateStore {
  fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let path = self.path_for(key);
    match fs::read(&path) {
      Ok(bytes) => Ok(Some(bytes)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(StoreError::Io(format!("{}: {e}", path.display()))),
    }
  }

  fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let path = self.path_for(key);
    debug!(target: "store", key, bytes = value.len(), "persisting state");
    atomic_write(&path, value).map_err(|e| StoreError::Io(format!("{}: {e}", path.display())))
  }
}

/// Conveniencia para tests y arranques efímeros: nada sobrevive al proceso.
pub struct MemoryStateStore {
  entries: std::sync::Mutex<std::collections::HashMap<String, Vec<u8>>>,
}

impl MemoryStateStore {
  pub fn new() -> Self {
    MemoryStateStore { entries: std::sync::Mutex::new(std::collections::HashMap::new()) }
  }
}

impl Default for MemoryStateStore {
  fn default() -> Self {
    Self::new()
  }
}

impl StateStore for MemoryStateStore {
  fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
    let entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    Ok(entries.get(key).cloned())
  }

  fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
    let mut entries = self.entries.lock().unwrap_or_else(|p| p.into_inner());
    entries.insert(key.to_owned(), value.to_vec());
    Ok(())
  }
}
