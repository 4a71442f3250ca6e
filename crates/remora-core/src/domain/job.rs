use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
  /// Mirror the path remote→local.
  Transfer,
  /// Run the post-download extraction step.
  Extract,
}

/// Unidad de trabajo del job controller, ligada a un path.
///
/// Se crea desde el AutoQueue o desde un comando externo y muere al llegar
/// a un desenlace terminal (descargado, fallo permanente o cancelado).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
  pub path: String,
  pub action: JobAction,
  /// Failed attempts so far; reset only by an explicit retry command.
  pub attempts: u32,
  pub last_failure: Option<String>,
}

impl Job {
  pub fn transfer(path: impl Into<String>) -> Self {
    Job { path: path.into(), action: JobAction::Transfer, attempts: 0, last_failure: None }
  }

  pub fn extract(path: impl Into<String>) -> Self {
    Job { path: path.into(), action: JobAction::Extract, attempts: 0, last_failure: None }
  }
}
