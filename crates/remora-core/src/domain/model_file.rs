use serde::{Deserialize, Serialize};

use super::state::FileState;

/// Estado fusionado de un path: lo que sabemos de ambos lados más el
/// progreso de transferencia. Propiedad exclusiva del `Model`.
///
/// `local_size`/`remote_size` son `None` cuando ese lado no ha visto el
/// path. Para directorios el tamaño guardado no significa nada: solo se
/// compara presencia.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelFile {
  pub path: String,
  pub is_dir: bool,
  pub local_size: Option<u64>,
  pub remote_size: Option<u64>,
  pub downloaded_size: u64,
  pub state: FileState,
  pub is_extractable: bool,
  pub last_error: Option<String>,
}

impl ModelFile {
  pub fn new(path: impl Into<String>, is_dir: bool) -> Self {
    ModelFile {
      path: path.into(),
      is_dir,
      local_size: None,
      remote_size: None,
      downloaded_size: 0,
      state: FileState::Default,
      is_extractable: false,
      last_error: None,
    }
  }

  /// Presence on one side is tracked through the size option.
  pub fn seen_locally(&self) -> bool {
    self.local_size.is_some()
  }

  pub fn seen_remotely(&self) -> bool {
    self.remote_size.is_some()
  }
}
