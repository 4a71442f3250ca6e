use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;

use crate::domain::{FileState, ModelEvent, ModelFile};
use crate::model::{Model, ScanSide};
use crate::ports::scanner::FileEntry;

/// El modelo compartido entre el ciclo de scan, el AutoQueue y el job
/// controller: un único escritor lógico detrás de un mutex con secciones
/// críticas cortas.
///
/// Every mutation publishes its events on the broadcast channel while the
/// lock is still held, so subscribers observe changes in exactly the order
/// they were applied.
#[derive(Clone)]
pub struct SharedModel {
  inner: Arc<Mutex<Model>>,
  events: broadcast::Sender<ModelEvent>,
}

impl SharedModel {
  pub fn new(model: Model) -> Self {
    Self::with_capacity(model, 256)
  }

  pub fn with_capacity(model: Model, capacity: usize) -> Self {
    let (events, _) = broadcast::channel(capacity);
    SharedModel { inner: Arc::new(Mutex::new(model)), events }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
    self.events.subscribe()
  }

  fn lock(&self) -> MutexGuard<'_, Model> {
    // A panic while holding the lock poisons it; the model itself is kept
    // consistent by its own methods, so recover the guard and carry on.
    match self.inner.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn publish(&self, event: &ModelEvent) {
    // Fire-and-forget: no subscribers is fine (e.g. daemon without a web
    // layer attached yet).
    let _ = self.events.send(event.clone());
  }

  /// Merges one side's scan and publishes the resulting events in order.
  /// The events are also returned so the caller can feed the AutoQueue.
  pub fn merge(&self, side: ScanSide, entries: &[FileEntry]) -> Vec<ModelEvent> {
    let mut model = self.lock();
    let events = model.merge(side, entries);
    for event in &events {
      self.publish(event);
    }
    events
  }

  pub fn get(&self, path: &str) -> Option<ModelFile> {
    self.lock().get(path).cloned()
  }

  pub fn snapshot(&self) -> Vec<ModelFile> {
    self.lock().snapshot()
  }

  pub fn paths_in_state(&self, state: FileState) -> Vec<String> {
    self.lock().paths_in_state(state)
  }

  pub fn set_state(&self, path: &str, state: FileState) -> bool {
    let mut model = self.lock();
    match model.set_state(path, state) {
      Some(event) => {
        self.publish(&event);
        true
      }
      None => false,
    }
  }

  pub fn record_progress(&self, path: &str, bytes: u64) {
    let mut model = self.lock();
    if let Some(event) = model.record_progress(path, bytes) {
      self.publish(&event);
    }
  }

  pub fn restart_progress(&self, path: &str) {
    let mut model = self.lock();
    if let Some(event) = model.restart_progress(path) {
      self.publish(&event);
    }
  }

  pub fn record_error(&self, path: &str, message: &str) {
    let mut model = self.lock();
    if let Some(event) = model.record_error(path, message) {
      self.publish(&event);
    }
  }

  pub fn clear_error(&self, path: &str) {
    let mut model = self.lock();
    if let Some(event) = model.clear_error(path) {
      self.publish(&event);
    }
  }

  /// Returns whether the final size agreed with the remote side.
  pub fn finish_download(&self, path: &str, final_size: u64) -> bool {
    let mut model = self.lock();
    let (matched, event) = model.finish_download(path, final_size);
    if let Some(event) = event {
      self.publish(&event);
    }
    matched
  }
}
