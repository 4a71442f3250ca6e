use crate::domain::FileState;
use thiserror::Error;

/// Rechazo de un comando externo (queue/stop/extract/retry).
///
/// Siempre es no-fatal: se devuelve al que emitió el comando y el estado
/// del modelo no cambia.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandRejected {
  #[error("path is not tracked: {0}")]
  UnknownPath(String),

  #[error("a job already references {0}")]
  JobExists(String),

  #[error("no queued or running job for {0}")]
  NoJob(String),

  #[error("{path} cannot be queued in state {state:?}")]
  NotQueueable { path: String, state: FileState },

  #[error("{0} is not downloaded")]
  NotDownloaded(String),

  #[error("{0} is not extractable")]
  NotExtractable(String),

  #[error("{0} has no failed job to retry")]
  NothingToRetry(String),
}
