use super::model_file::ModelFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
  Added,
  Changed,
  Removed,
}

/// Un cambio aplicado al modelo, publicado en el mismo orden en que se
/// aplicó. `file` es una copia del estado resultante (o del último estado
/// conocido, para `Removed`).
#[derive(Debug, Clone)]
pub struct ModelEvent {
  pub kind: EventKind,
  pub path: String,
  pub file: ModelFile,
}

impl ModelEvent {
  pub fn new(kind: EventKind, file: ModelFile) -> Self {
    ModelEvent { kind, path: file.path.clone(), file }
  }
}
