use serde::{Deserialize, Serialize};

/// Ciclo de vida de un path dentro del modelo.
///
/// Las transiciones válidas son las que aplican el merge y el job
/// controller; nadie más escribe este campo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
  /// Known remotely, no usable local copy, not scheduled.
  Default,
  /// Scheduled for transfer, not started yet.
  Queued,
  /// A transfer worker is moving bytes right now.
  Downloading,
  /// Local copy complete and size-consistent with the remote.
  Downloaded,
  /// Gone on both sides; pruned from the model right after the event.
  Deleted,
  /// Post-download extraction running.
  Extracting,
  /// Still present locally but removed on the remote.
  DeletedRemote,
}

impl FileState {
  /// True while a job owns the path. Used by the merge to decide whether a
  /// disappeared path may be pruned.
  pub fn is_job_driven(self) -> bool {
    matches!(self, FileState::Queued | FileState::Downloading | FileState::Extracting)
  }
}
