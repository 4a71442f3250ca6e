mod merge;
mod shared;

pub use merge::ScanSide;
pub use shared::SharedModel;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::domain::{EventKind, FileState, ModelEvent, ModelFile};

/// Mapa autoritativo path → `ModelFile`, más un índice por estado para
/// iterar O(tamaño-del-estado).
///
/// Toda mutación pasa por el merge o por los callbacks de estado del job
/// controller; los scanners y la capa web nunca escriben aquí.
pub struct Model {
  files: BTreeMap<String, ModelFile>,
  by_state: HashMap<FileState, BTreeSet<String>>,
  /// Suffixes (lowercase, without the dot) that mark a file extractable.
  extract_suffixes: Vec<String>,
}

impl Default for Model {
  fn default() -> Self {
    Self::new()
  }
}

impl Model {
  pub fn new() -> Self {
    Model { files: BTreeMap::new(), by_state: HashMap::new(), extract_suffixes: Vec::new() }
  }

  pub fn with_extract_suffixes(suffixes: Vec<String>) -> Self {
    let mut model = Model::new();
    model.extract_suffixes = suffixes.into_iter().map(|s| s.to_lowercase()).collect();
    model
  }

  /// Rebuilds a model from a persisted snapshot.
  ///
  /// Worker-owned states cannot survive a restart (the workers died with
  /// the process), so `Downloading` entries come back as `Queued` and
  /// `Extracting` entries as `Downloaded`.
  pub fn from_snapshot(files: Vec<ModelFile>, extract_suffixes: Vec<String>) -> Self {
    let mut model = Model::with_extract_suffixes(extract_suffixes);

    for mut file in files {
      match file.state {
        FileState::Downloading => {
          file.state = FileState::Queued;
          file.downloaded_size = 0;
        }
        FileState::Extracting => file.state = FileState::Downloaded,
        _ => {}
      }
      model.insert(file);
    }

    model
  }

  pub fn len(&self) -> usize {
    self.files.len()
  }

  pub fn is_empty(&self) -> bool {
    self.files.is_empty()
  }

  pub fn contains(&self, path: &str) -> bool {
    self.files.contains_key(path)
  }

  pub fn get(&self, path: &str) -> Option<&ModelFile> {
    self.files.get(path)
  }

  pub fn snapshot(&self) -> Vec<ModelFile> {
    self.files.values().cloned().collect()
  }

  pub fn paths_in_state(&self, state: FileState) -> Vec<String> {
    self.by_state.get(&state).map(|set| set.iter().cloned().collect()).unwrap_or_default()
  }

  // ---- job-facing mutations (each returns the event it produced) ----

  /// Sets the lifecycle state. No event when the path is unknown or the
  /// state already matches (keeps repeated callbacks idempotent).
  pub fn set_state(&mut self, path: &str, state: FileState) -> Option<ModelEvent> {
    self.mutate(path, |file| {
      file.state = state;
      if state != FileState::Downloading && state != FileState::Downloaded {
        file.downloaded_size = 0;
      }
    })
  }

  /// Progress callback from a running transfer. Monotone: a report lower
  /// than what we already have is dropped (out-of-order worker messages).
  pub fn record_progress(&mut self, path: &str, bytes: u64) -> Option<ModelEvent> {
    self.mutate(path, |file| {
      if file.state == FileState::Downloading && bytes > file.downloaded_size {
        file.downloaded_size = bytes;
      }
    })
  }

  /// Resets progress on a job restart. The only legal way for
  /// `downloaded_size` to go backwards.
  pub fn restart_progress(&mut self, path: &str) -> Option<ModelEvent> {
    self.mutate(path, |file| file.downloaded_size = 0)
  }

  pub fn record_error(&mut self, path: &str, message: &str) -> Option<ModelEvent> {
    self.mutate(path, |file| file.last_error = Some(message.to_string()))
  }

  pub fn clear_error(&mut self, path: &str) -> Option<ModelEvent> {
    self.mutate(path, |file| file.last_error = None)
  }

  /// Terminal callback of a successful transfer.
  ///
  /// Returns whether the final local size agrees with the remote side.
  /// On mismatch the path drops back to `Default` with the discrepancy
  /// recorded, so the monitoring layer sees it without log polling.
  pub fn finish_download(&mut self, path: &str, final_size: u64) -> (bool, Option<ModelEvent>) {
    let matched = match self.files.get(path) {
      Some(file) => file.remote_size.is_none_or(|remote| remote == final_size),
      None => return (false, None),
    };

    let event = self.mutate(path, |file| {
      file.local_size = Some(final_size);
      if matched {
        file.state = FileState::Downloaded;
        file.downloaded_size = final_size;
        file.last_error = None;
      } else {
        file.state = FileState::Default;
        file.downloaded_size = 0;
        file.last_error = Some(format!(
          "size mismatch after transfer: local {} vs remote {}",
          final_size,
          file.remote_size.unwrap_or(0)
        ));
      }
    });

    (matched, event)
  }

  // ---- internals ----

  fn mutate(&mut self, path: &str, f: impl FnOnce(&mut ModelFile)) -> Option<ModelEvent> {
    let file = self.files.get_mut(path)?;
    let before = file.clone();
    f(file);

    if *file == before {
      return None;
    }

    let snapshot = file.clone();
    if before.state != snapshot.state {
      self.reindex(path, before.state, snapshot.state);
    }

    Some(ModelEvent::new(EventKind::Changed, snapshot))
  }

  pub(crate) fn insert(&mut self, file: ModelFile) {
    self.by_state.entry(file.state).or_default().insert(file.path.clone());
    self.files.insert(file.path.clone(), file);
  }

  pub(crate) fn remove(&mut self, path: &str) -> Option<ModelFile> {
    let file = self.files.remove(path)?;
    if let Some(set) = self.by_state.get_mut(&file.state) {
      set.remove(path);
    }
    Some(file)
  }

  pub(crate) fn reindex(&mut self, path: &str, old: FileState, new: FileState) {
    if let Some(set) = self.by_state.get_mut(&old) {
      set.remove(path);
    }
    self.by_state.entry(new).or_default().insert(path.to_string());
  }

  pub(crate) fn is_extractable_path(&self, path: &str) -> bool {
    let lower = path.to_lowercase();
    self.extract_suffixes.iter().any(|suffix| lower.ends_with(&format!(".{suffix}")))
  }
}
