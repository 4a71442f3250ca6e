use std::collections::BTreeMap;

use crate::domain::{EventKind, FileState, ModelEvent, ModelFile};
use crate::model::Model;
use crate::ports::scanner::FileEntry;

/// Qué árbol produjo el scan que se está fusionando. Cada lado observa un
/// árbol distinto, así que se fusionan por separado.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanSide {
  Local,
  Remote,
}

impl Model {
  /// Reconcilia un scan fresco de un lado contra el modelo.
  ///
  /// Emits the resulting events in deterministic path order: additions and
  /// changes first, then disappearances, then the prune sweep. Merging the
  /// exact same listing twice produces zero events the second time.
  pub fn merge(&mut self, side: ScanSide, entries: &[FileEntry]) -> Vec<ModelEvent> {
    let mut events = Vec::new();

    // Lookup by path; also dedupes a malformed listing.
    let index: BTreeMap<&str, &FileEntry> =
      entries.iter().map(|entry| (entry.path.as_str(), entry)).collect();

    for (path, entry) in &index {
      match self.files.get(*path) {
        None => {
          let file = self.seed_file(side, entry);
          events.push(ModelEvent::new(EventKind::Added, file.clone()));
          self.insert(file);
        }
        Some(_) => {
          if let Some(event) = self.apply_side_update(side, path, entry) {
            events.push(event);
          }
        }
      }
    }

    // Paths the scan no longer reports on this side.
    let tracked: Vec<String> = self.files.keys().cloned().collect();
    for path in tracked {
      if index.contains_key(path.as_str()) {
        continue;
      }
      if let Some(event) = self.apply_side_missing(side, &path) {
        events.push(event);
      }
    }

    // Prune sweep: entries dead on both sides with no job holding them.
    let orphans: Vec<String> = self
      .files
      .values()
      .filter(|f| !f.seen_locally() && !f.seen_remotely() && !f.state.is_job_driven())
      .map(|f| f.path.clone())
      .collect();
    for path in orphans {
      if let Some(mut file) = self.remove(&path) {
        file.state = FileState::Deleted;
        events.push(ModelEvent::new(EventKind::Removed, file));
      }
    }

    events
  }

  /// Primera vez que vemos este path: entra como `Default`. Un job solo
  /// puede referenciar paths ya trazados, así que aquí no hay estado
  /// job-driven que preservar.
  fn seed_file(&self, side: ScanSide, entry: &FileEntry) -> ModelFile {
    let mut file = ModelFile::new(entry.path.clone(), entry.is_dir);
    match side {
      ScanSide::Local => file.local_size = Some(entry.size),
      ScanSide::Remote => file.remote_size = Some(entry.size),
    }
    file.is_extractable = !entry.is_dir && self.is_extractable_path(&entry.path);
    file
  }

  fn apply_side_update(&mut self, side: ScanSide, path: &str, entry: &FileEntry) -> Option<ModelEvent> {
    self.mutate(path, |file| {
      let was_deleted_remote = file.state == FileState::DeletedRemote;

      let slot = match side {
        ScanSide::Local => &mut file.local_size,
        ScanSide::Remote => &mut file.remote_size,
      };
      let appeared = slot.is_none();

      // Directories are presence-only: once a side has seen one, its size
      // drift means nothing and is not even recorded.
      if appeared || !entry.is_dir {
        *slot = Some(entry.size);
      }

      if file.is_dir != entry.is_dir {
        file.is_dir = entry.is_dir;
      }

      // The remote side grew this path back after having pruned it.
      if was_deleted_remote && side == ScanSide::Remote && appeared {
        file.state = FileState::Default;
      }

      derive_completeness(file);
    })
  }

  fn apply_side_missing(&mut self, side: ScanSide, path: &str) -> Option<ModelEvent> {
    let file = self.files.get_mut(path)?;

    let slot = match side {
      ScanSide::Local => &mut file.local_size,
      ScanSide::Remote => &mut file.remote_size,
    };
    if slot.is_none() {
      // Already known to be missing on this side.
      return None;
    }
    *slot = None;

    // A job still owns the path: only the side bookkeeping changes, the
    // job outcome decides what happens next.
    if file.state.is_job_driven() {
      return Some(ModelEvent::new(EventKind::Changed, file.clone()));
    }

    let old_state = file.state;

    if !file.seen_locally() && !file.seen_remotely() {
      // Gone on both sides. Mark it and stay silent: the prune sweep emits
      // the single Removed event for it.
      file.state = FileState::Deleted;
      self.reindex(path, old_state, FileState::Deleted);
      return None;
    }

    match side {
      ScanSide::Local => {
        // Local copy vanished; the remote copy makes this a plain
        // download candidate again.
        file.state = FileState::Default;
        file.downloaded_size = 0;
      }
      ScanSide::Remote => {
        file.state = FileState::DeletedRemote;
      }
    }

    let event = ModelEvent::new(EventKind::Changed, file.clone());
    let new_state = event.file.state;
    if old_state != new_state {
      self.reindex(path, old_state, new_state);
    }
    Some(event)
  }
}

/// Re-deriva el estado cuando cambian los tamaños de lado.
///
/// Sizes agreeing on both sides means the local copy is complete; a
/// `Downloaded` entry whose sides disagree again has a stale local copy.
/// A size gap while `Downloading` is the normal mid-transfer picture and
/// is never treated as a failure here.
fn derive_completeness(file: &mut ModelFile) {
  if file.is_dir {
    return;
  }

  let (Some(local), Some(remote)) = (file.local_size, file.remote_size) else {
    if file.state == FileState::Downloaded && file.local_size.is_none() {
      file.state = FileState::Default;
      file.downloaded_size = 0;
    }
    return;
  };

  if local == remote {
    if matches!(file.state, FileState::Default | FileState::Downloading) {
      file.state = FileState::Downloaded;
      file.downloaded_size = local;
    }
  } else if file.state == FileState::Downloaded {
    file.state = FileState::Default;
    file.downloaded_size = 0;
  }
}
