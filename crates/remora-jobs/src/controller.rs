use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use remora_core::domain::{Command, FileState, Job, JobAction};
use remora_core::ports::{StateStore, TransferWorker};
use remora_core::{AutoQueue, CommandRejected, SharedModel};

/// Clave bajo la que se persiste la cola y los fallos permanentes.
const STORE_KEY: &str = "jobs";

/// Límites de operación del controlador, resueltos desde la configuración
/// antes de arrancar el motor.
#[derive(Debug, Clone)]
pub struct JobSettings {
  /// Maximum simultaneous transfers.
  pub max_concurrent_downloads: usize,
  /// Total attempts per job before it is marked failed.
  pub max_attempts: u32,
  /// Base delay for exponential retry backoff.
  pub backoff_base: Duration,
  /// How long a stop waits for the worker before force-aborting it.
  pub stop_grace: Duration,
}

impl Default for JobSettings {
  fn default() -> Self {
    JobSettings {
      max_concurrent_downloads: 2,
      max_attempts: 3,
      backoff_base: Duration::from_millis(2_000),
      stop_grace: Duration::from_millis(5_000),
    }
  }
}

struct ActiveJob {
  action: JobAction,
  stop_tx: Option<oneshot::Sender<()>>,
  handle: Option<JoinHandle<()>>,
}

/// Desenlace registrado de un job que terminó mal. Bloquea el re-encolado
/// automático hasta un `retry` explícito.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FailedJob {
  action: JobAction,
  error: String,
}

#[derive(Default)]
struct Table {
  /// FIFO de transferencias pendientes. Las extracciones no esperan aquí:
  /// no cuentan contra el límite de descargas y arrancan al encolarse.
  queued: VecDeque<Job>,
  active: HashMap<String, ActiveJob>,
  failed: HashMap<String, FailedJob>,
  /// Paths detenidos a mano; el AutoQueue no los vuelve a tocar.
  stopped: HashSet<String>,
}

impl Table {
  fn references(&self, path: &str) -> bool {
    self.active.contains_key(path) || self.queued.iter().any(|job| job.path == path)
  }

  fn active_transfers(&self) -> usize {
    self.active.values().filter(|job| job.action == JobAction::Transfer).count()
  }
}

/// Lo que sobrevive a un reinicio: orden de cola, contadores de intentos y
/// fallos permanentes. Los jobs activos no se guardan; al arrancar vuelven
/// a la cola desde el snapshot del modelo (estado `Queued`).
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedJobs {
  queue: Vec<Job>,
  failed: HashMap<String, FailedJob>,
}

/// Controlador de trabajos: única autoridad sobre qué path tiene un job y
/// en qué fase está.
///
/// Toda mutación del modelo pasa por `SharedModel`, que publica el evento
/// correspondiente; aquí solo vive la mecánica de cola, reintento y
/// cancelación.
pub struct JobController<W> {
  model: SharedModel,
  worker: Arc<W>,
  store: Arc<dyn StateStore>,
  settings: JobSettings,
  table: Arc<Mutex<Table>>,
}

impl<W: TransferWorker + 'static> JobController<W> {
  pub fn new(
    model: SharedModel,
    worker: Arc<W>,
    store: Arc<dyn StateStore>,
    settings: JobSettings,
  ) -> Self {
    JobController { model, worker, store, settings, table: Arc::new(Mutex::new(Table::default())) }
  }

  /// Reconstruye cola y fallos desde el store. Solo se re-encolan paths que
  /// el modelo sigue conociendo; el resto se descarta con un log.
  ///
  /// Los jobs que estaban activos al morir el proceso no aparecen en la
  /// cola persistida: sobreviven como `Queued` en el snapshot del modelo y
  /// se readoptan aquí, detrás de la cola persistida.
  pub fn restore(&self) {
    let persisted = match self.store.load(STORE_KEY) {
      Ok(Some(bytes)) => match serde_json::from_slice::<PersistedJobs>(&bytes) {
        Ok(p) => p,
        Err(e) => {
          warn!(target: "jobs", error = %e, "discarding unreadable persisted job state");
          PersistedJobs::default()
        }
      },
      Ok(None) => PersistedJobs::default(),
      Err(e) => {
        warn!(target: "jobs", error = %e, "could not load persisted job state");
        PersistedJobs::default()
      }
    };

    let mut table = self.lock_table();
    table.failed = persisted.failed;

    for job in persisted.queue {
      if self.model.get(&job.path).is_none() {
        info!(target: "jobs", path = %job.path, "dropping queued job for forgotten path");
        continue;
      }
      self.model.set_state(&job.path, FileState::Queued);
      table.queued.push_back(job);
    }

    for path in self.model.paths_in_state(FileState::Queued) {
      if table.references(&path) || table.failed.contains_key(&path) {
        continue;
      }
      info!(target: "jobs", path = %path, "requeueing job interrupted mid-flight");
      table.queued.push_back(Job::transfer(&path));
    }

    self.persist(&table);
    debug!(
      target: "jobs",
      queued = table.queued.len(),
      failed = table.failed.len(),
      "restored job state"
    );
  }

  /// Punto de entrada único para comandos externos.
  pub async fn apply(&self, command: Command) -> Result<(), CommandRejected> {
    match command {
      Command::Queue(path) => self.queue(&path),
      Command::Stop(path) => self.stop(&path).await,
      Command::Extract(path) => self.extract(&path),
      Command::Retry(path) => self.retry(&path),
    }
  }

  /// Encola una transferencia pedida desde fuera. A diferencia del
  /// AutoQueue, un queue explícito levanta cualquier supresión previa.
  pub fn queue(&self, path: &str) -> Result<(), CommandRejected> {
    let file = self.model.get(path).ok_or_else(|| CommandRejected::UnknownPath(path.into()))?;

    let mut table = self.lock_table();
    if table.references(path) {
      return Err(CommandRejected::JobExists(path.into()));
    }
    if file.state != FileState::Default {
      return Err(CommandRejected::NotQueueable { path: path.into(), state: file.state });
    }

    table.failed.remove(path);
    table.stopped.remove(path);
    table.queued.push_back(Job::transfer(path));
    self.persist(&table);
    drop(table);

    self.model.clear_error(path);
    self.model.set_state(path, FileState::Queued);
    info!(target: "jobs", path, "queued for transfer");
    Ok(())
  }

  /// Detiene el job del path, esté en cola o corriendo.
  ///
  /// Para un worker en marcha se le pide parar y se espera el período de
  /// gracia; si no termina, se aborta la tarea. El path queda suprimido
  /// para el AutoQueue hasta un queue/retry explícito.
  pub async fn stop(&self, path: &str) -> Result<(), CommandRejected> {
    let taken = {
      let mut table = self.lock_table();

      if let Some(pos) = table.queued.iter().position(|job| job.path == path) {
        table.queued.remove(pos);
        table.stopped.insert(path.to_string());
        self.persist(&table);
        None
      } else if let Some(active) = table.active.get_mut(path) {
        let stop_tx = active.stop_tx.take();
        let handle = active.handle.take();
        let action = active.action;
        table.stopped.insert(path.to_string());
        Some((stop_tx, handle, action))
      } else {
        return Err(CommandRejected::NoJob(path.into()));
      }
    };

    let action = match taken {
      None => {
        // Was only queued: never started, straight back to Default.
        self.model.set_state(path, FileState::Default);
        info!(target: "jobs", path, "dequeued before start");
        return Ok(());
      }
      Some((stop_tx, handle, action)) => {
        if let Some(tx) = stop_tx {
          let _ = tx.send(());
        }
        if let Some(mut handle) = handle {
          if tokio::time::timeout(self.settings.stop_grace, &mut handle).await.is_err() {
            warn!(target: "jobs", path, "worker ignored stop, aborting task");
            handle.abort();
          }
        }
        action
      }
    };

    {
      let mut table = self.lock_table();
      table.active.remove(path);
      self.persist(&table);
    }

    // A cancelled transfer leaves no usable copy; a cancelled extraction
    // still has its downloaded archive.
    let resting = match action {
      JobAction::Transfer => FileState::Default,
      JobAction::Extract => FileState::Downloaded,
    };
    self.model.restart_progress(path);
    self.model.set_state(path, resting);
    info!(target: "jobs", path, "job stopped");
    Ok(())
  }

  /// Lanza la extracción post-descarga de un archivo.
  ///
  /// No pasa por la cola: no compite con las descargas por el límite de
  /// concurrencia y arranca inmediatamente.
  pub fn extract(&self, path: &str) -> Result<(), CommandRejected> {
    let file = self.model.get(path).ok_or_else(|| CommandRejected::UnknownPath(path.into()))?;
    if file.state != FileState::Downloaded {
      return Err(CommandRejected::NotDownloaded(path.into()));
    }
    if !file.is_extractable {
      return Err(CommandRejected::NotExtractable(path.into()));
    }

    let mut table = self.lock_table();
    if table.references(path) {
      return Err(CommandRejected::JobExists(path.into()));
    }
    table.failed.remove(path);
    table.stopped.remove(path);

    let (stop_tx, stop_rx) = oneshot::channel();
    let handle = self.spawn_extract(Job::extract(path), stop_rx);
    table.active.insert(
      path.to_string(),
      ActiveJob { action: JobAction::Extract, stop_tx: Some(stop_tx), handle: Some(handle) },
    );
    drop(table);

    info!(target: "jobs", path, "extraction started");
    Ok(())
  }

  /// Reintenta un job que falló permanentemente, reseteando sus intentos.
  pub fn retry(&self, path: &str) -> Result<(), CommandRejected> {
    let failed = {
      let mut table = self.lock_table();
      let Some(failed) = table.failed.remove(path) else {
        return Err(CommandRejected::NothingToRetry(path.into()));
      };
      table.stopped.remove(path);
      self.persist(&table);
      failed
    };

    self.model.clear_error(path);

    match failed.action {
      JobAction::Transfer => {
        let mut table = self.lock_table();
        table.queued.push_back(Job::transfer(path));
        self.persist(&table);
        drop(table);
        self.model.set_state(path, FileState::Queued);
      }
      JobAction::Extract => {
        // Re-launch directly; extract() re-validates the preconditions.
        self.extract(path)?;
      }
    }

    info!(target: "jobs", path, "retrying after permanent failure");
    Ok(())
  }

  /// Evalúa candidatos del último ciclo de merge contra la política.
  ///
  /// Silencioso por diseño: paths ya referenciados por un job, fallados
  /// permanentemente o detenidos a mano se saltan sin error.
  pub fn auto_queue(&self, policy: &AutoQueue, candidates: &[String]) -> usize {
    let mut queued = 0;

    for path in candidates {
      let Some(file) = self.model.get(path) else { continue };
      if !policy.wants(&file) {
        continue;
      }

      {
        let mut table = self.lock_table();
        if table.references(path) || table.failed.contains_key(path) || table.stopped.contains(path)
        {
          continue;
        }
        table.queued.push_back(Job::transfer(path));
        self.persist(&table);
      }

      self.model.set_state(path, FileState::Queued);
      debug!(target: "jobs", path = %path, "auto-queued");
      queued += 1;
    }

    queued
  }

  /// Arranca transferencias de la cola hasta llenar el cupo de
  /// concurrencia. Se llama en cada ciclo del controlador y tras cada
  /// desenlace de job.
  pub fn service(&self) {
    let mut table = self.lock_table();

    while table.active_transfers() < self.settings.max_concurrent_downloads {
      let Some(job) = table.queued.pop_front() else { break };

      let (stop_tx, stop_rx) = oneshot::channel();
      let handle = self.spawn_transfer(job.clone(), stop_rx);
      table.active.insert(
        job.path.clone(),
        ActiveJob { action: JobAction::Transfer, stop_tx: Some(stop_tx), handle: Some(handle) },
      );
      self.persist(&table);
    }
  }

  /// How many jobs are queued or running right now.
  pub fn in_flight(&self) -> usize {
    let table = self.lock_table();
    table.queued.len() + table.active.len()
  }

  // ---- worker tasks ----

  fn spawn_transfer(&self, mut job: Job, mut stop_rx: oneshot::Receiver<()>) -> JoinHandle<()> {
    let model = self.model.clone();
    let worker = Arc::clone(&self.worker);
    let table = Arc::clone(&self.table);
    let store = Arc::clone(&self.store);
    let settings = self.settings.clone();

    tokio::spawn(async move {
      let path = job.path.clone();

      loop {
        model.set_state(&path, FileState::Downloading);

        let (progress_tx, mut progress_rx) = mpsc::channel(32);
        let pump_model = model.clone();
        let pump_path = path.clone();
        let pump = tokio::spawn(async move {
          while let Some(bytes) = progress_rx.recv().await {
            pump_model.record_progress(&pump_path, bytes);
          }
        });

        let outcome = tokio::select! {
          res = worker.transfer(&path, progress_tx) => Some(res),
          _ = &mut stop_rx => None,
        };
        pump.abort();

        let Some(outcome) = outcome else {
          // stop() owns the cleanup once the signal is acknowledged.
          debug!(target: "jobs", path = %path, "transfer cancelled");
          return;
        };

        match outcome {
          Ok(final_size) => {
            if model.finish_download(&path, final_size) {
              info!(target: "jobs", path = %path, bytes = final_size, "transfer complete");
            } else {
              warn!(target: "jobs", path = %path, bytes = final_size, "transfer finished with size mismatch");
            }
            finish_job(&table, &store, &path, None);
            return;
          }
          Err(e) => {
            job.attempts += 1;
            job.last_failure = Some(e.message.clone());

            if e.transient && job.attempts < settings.max_attempts {
              let delay = settings.backoff_base * 2u32.saturating_pow(job.attempts - 1);
              warn!(
                target: "jobs",
                path = %path,
                attempt = job.attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "transfer failed, backing off before retry"
              );
              model.restart_progress(&path);

              tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut stop_rx => {
                  debug!(target: "jobs", path = %path, "transfer cancelled during backoff");
                  return;
                }
              }
              continue;
            }

            error!(target: "jobs", path = %path, attempts = job.attempts, error = %e, "transfer failed permanently");
            model.record_error(&path, &e.message);
            model.set_state(&path, FileState::Default);
            let failed =
              FailedJob { action: job.action, error: job.last_failure.take().unwrap_or(e.message) };
            finish_job(&table, &store, &path, Some(failed));
            return;
          }
        }
      }
    })
  }

  fn spawn_extract(&self, job: Job, mut stop_rx: oneshot::Receiver<()>) -> JoinHandle<()> {
    let model = self.model.clone();
    let worker = Arc::clone(&self.worker);
    let table = Arc::clone(&self.table);
    let store = Arc::clone(&self.store);
    let path = job.path;

    tokio::spawn(async move {
      model.set_state(&path, FileState::Extracting);

      let outcome = tokio::select! {
        res = worker.extract(&path) => Some(res),
        _ = &mut stop_rx => None,
      };

      let Some(outcome) = outcome else {
        debug!(target: "jobs", path = %path, "extraction cancelled");
        return;
      };

      match outcome {
        Ok(()) => {
          model.clear_error(&path);
          model.set_state(&path, FileState::Downloaded);
          info!(target: "jobs", path = %path, "extraction complete");
          finish_job(&table, &store, &path, None);
        }
        Err(e) => {
          error!(target: "jobs", path = %path, error = %e, "extraction failed");
          model.record_error(&path, &e.message);
          // The archive itself is still intact on disk.
          model.set_state(&path, FileState::Downloaded);
          let failed = FailedJob { action: JobAction::Extract, error: e.message };
          finish_job(&table, &store, &path, Some(failed));
        }
      }
    })
  }

  // ---- internals ----

  fn lock_table(&self) -> MutexGuard<'_, Table> {
    match self.table.lock() {
      Ok(guard) => guard,
      Err(poisoned) => poisoned.into_inner(),
    }
  }

  fn persist(&self, table: &Table) {
    persist_table(self.store.as_ref(), table);
  }
}

/// Terminal cleanup shared by the worker tasks: drop the active entry,
/// record the failure (if any) and persist.
fn finish_job(
  table: &Arc<Mutex<Table>>,
  store: &Arc<dyn StateStore>,
  path: &str,
  failed: Option<FailedJob>,
) {
  let mut table = match table.lock() {
    Ok(guard) => guard,
    Err(poisoned) => poisoned.into_inner(),
  };
  table.active.remove(path);
  if let Some(failed) = failed {
    table.failed.insert(path.to_string(), failed);
  }
  persist_table(store.as_ref(), &table);
}

fn persist_table(store: &dyn StateStore, table: &Table) {
  let persisted = PersistedJobs {
    queue: table.queued.iter().cloned().collect(),
    failed: table.failed.clone(),
  };
  let bytes = match serde_json::to_vec(&persisted) {
    Ok(bytes) => bytes,
    Err(e) => {
      error!(target: "jobs", error = %e, "could not encode job state");
      return;
    }
  };
  if let Err(e) = store.save(STORE_KEY, &bytes) {
    error!(target: "jobs", error = %e, "could not persist job state");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use async_trait::async_trait;
  use remora_core::ports::{FileEntry, TransferError};
  use remora_core::{Model, ScanSide};
  use remora_store::MemoryStateStore;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FakeWorker {
    delay: Duration,
    /// First N transfer calls fail before any succeeds.
    fail_times: usize,
    transient: bool,
    size: u64,
    extract_fails: bool,
    calls: AtomicUsize,
    extract_calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    seen: Mutex<Vec<String>>,
  }

  impl FakeWorker {
    fn new(size: u64, delay_ms: u64) -> Arc<Self> {
      Arc::new(FakeWorker {
        delay: Duration::from_millis(delay_ms),
        fail_times: 0,
        transient: true,
        size,
        extract_fails: false,
        calls: AtomicUsize::new(0),
        extract_calls: AtomicUsize::new(0),
        running: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
      })
    }

    fn failing(times: usize, transient: bool) -> Arc<Self> {
      let mut worker = FakeWorker::new(100, 1);
      if let Some(w) = Arc::get_mut(&mut worker) {
        w.fail_times = times;
        w.transient = transient;
      }
      worker
    }
  }

  #[async_trait]
  impl TransferWorker for FakeWorker {
    async fn transfer(&self, path: &str, progress: mpsc::Sender<u64>) -> Result<u64, TransferError> {
      self.seen.lock().unwrap().push(path.to_string());
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
      self.peak.fetch_max(now, Ordering::SeqCst);

      let _ = progress.send(self.size / 2).await;
      tokio::time::sleep(self.delay).await;
      self.running.fetch_sub(1, Ordering::SeqCst);

      if call < self.fail_times {
        return Err(if self.transient {
          TransferError::transient("link dropped")
        } else {
          TransferError::fatal("no such file")
        });
      }
      let _ = progress.send(self.size).await;
      Ok(self.size)
    }

    async fn extract(&self, _path: &str) -> Result<(), TransferError> {
      self.extract_calls.fetch_add(1, Ordering::SeqCst);
      tokio::time::sleep(self.delay).await;
      if self.extract_fails {
        Err(TransferError::fatal("corrupt archive"))
      } else {
        Ok(())
      }
    }
  }

  fn fast_settings() -> JobSettings {
    JobSettings {
      max_concurrent_downloads: 2,
      max_attempts: 3,
      backoff_base: Duration::from_millis(1),
      stop_grace: Duration::from_millis(500),
    }
  }

  fn remote_entry(path: &str, size: u64) -> FileEntry {
    FileEntry { path: path.to_string(), is_dir: false, size, mtime: 0 }
  }

  fn setup(
    paths: &[&str],
    worker: Arc<FakeWorker>,
    settings: JobSettings,
  ) -> (SharedModel, JobController<FakeWorker>) {
    let shared = SharedModel::new(Model::with_extract_suffixes(vec!["zip".into()]));
    let entries: Vec<FileEntry> = paths.iter().map(|p| remote_entry(p, 100)).collect();
    shared.merge(ScanSide::Remote, &entries);

    let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
    let controller = JobController::new(shared.clone(), worker, store, settings);
    (shared, controller)
  }

  /// Keeps servicing the queue until nothing is queued or running.
  async fn drive_to_idle(controller: &JobController<FakeWorker>) {
    for _ in 0..1_000 {
      controller.service();
      if controller.in_flight() == 0 {
        return;
      }
      tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("controller did not go idle");
  }

  async fn wait_for_state(model: &SharedModel, path: &str, state: FileState) {
    for _ in 0..1_000 {
      if model.get(path).map(|f| f.state) == Some(state) {
        return;
      }
      tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("timed out waiting for {path} to reach {state:?}");
  }

  #[tokio::test]
  async fn test_happy_path_walks_the_full_lifecycle() {
    let worker = FakeWorker::new(100, 5);
    let (model, controller) = setup(&["a.bin"], Arc::clone(&worker), fast_settings());
    let mut rx = model.subscribe();

    controller.queue("a.bin").unwrap();
    drive_to_idle(&controller).await;

    let file = model.get("a.bin").unwrap();
    assert_eq!(file.state, FileState::Downloaded);
    assert_eq!(file.local_size, Some(100));
    assert_eq!(file.downloaded_size, 100);

    // Collapse consecutive duplicates (progress events repeat Downloading).
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
      if states.last() != Some(&event.file.state) {
        states.push(event.file.state);
      }
    }
    assert_eq!(states, vec![FileState::Queued, FileState::Downloading, FileState::Downloaded]);
  }

  #[tokio::test]
  async fn test_concurrency_cap_is_respected() {
    let worker = FakeWorker::new(100, 30);
    let (model, controller) =
      setup(&["a.bin", "b.bin", "c.bin", "d.bin"], Arc::clone(&worker), fast_settings());

    for path in ["a.bin", "b.bin", "c.bin", "d.bin"] {
      controller.queue(path).unwrap();
    }
    drive_to_idle(&controller).await;

    assert_eq!(worker.calls.load(Ordering::SeqCst), 4);
    assert!(worker.peak.load(Ordering::SeqCst) <= 2);
    for path in ["a.bin", "b.bin", "c.bin", "d.bin"] {
      assert_eq!(model.get(path).unwrap().state, FileState::Downloaded);
    }
  }

  #[tokio::test]
  async fn test_one_job_per_path() {
    let worker = FakeWorker::new(100, 50);
    let (_, controller) = setup(&["a.bin"], worker, fast_settings());

    controller.queue("a.bin").unwrap();
    assert_eq!(controller.queue("a.bin"), Err(CommandRejected::JobExists("a.bin".into())));

    controller.service();
    // Still rejected while the transfer is running.
    assert_eq!(controller.queue("a.bin"), Err(CommandRejected::JobExists("a.bin".into())));
  }

  #[tokio::test]
  async fn test_queue_rejects_unknown_path_and_wrong_state() {
    let worker = FakeWorker::new(100, 1);
    let (model, controller) = setup(&["a.bin"], worker, fast_settings());

    assert_eq!(controller.queue("ghost.bin"), Err(CommandRejected::UnknownPath("ghost.bin".into())));

    // Complete the local copy: merge makes it Downloaded, not queueable.
    model.merge(ScanSide::Local, &[remote_entry("a.bin", 100)]);
    assert_eq!(
      controller.queue("a.bin"),
      Err(CommandRejected::NotQueueable { path: "a.bin".into(), state: FileState::Downloaded })
    );
  }

  #[tokio::test]
  async fn test_transient_retry_bound_is_exact() {
    let worker = FakeWorker::failing(usize::MAX, true);
    let (model, controller) = setup(&["a.bin"], Arc::clone(&worker), fast_settings());

    controller.queue("a.bin").unwrap();
    drive_to_idle(&controller).await;

    // max_attempts = 3: exactly three executions, then permanent failure.
    assert_eq!(worker.calls.load(Ordering::SeqCst), 3);
    let file = model.get("a.bin").unwrap();
    assert_eq!(file.state, FileState::Default);
    assert!(file.last_error.as_deref().unwrap().contains("link dropped"));

    // The permanent record carries the last failure the job observed.
    assert!(controller.lock_table().failed.get("a.bin").unwrap().error.contains("link dropped"));

    // Permanently failed paths are invisible to the AutoQueue...
    let policy = AutoQueue::new(true, &["*".into()], &[]).unwrap();
    assert_eq!(controller.auto_queue(&policy, &["a.bin".into()]), 0);

    // ...until an explicit retry, which starts from a clean attempt count.
    controller.retry("a.bin").unwrap();
    assert_eq!(model.get("a.bin").unwrap().state, FileState::Queued);
  }

  #[tokio::test]
  async fn test_fatal_failure_is_not_retried() {
    let worker = FakeWorker::failing(usize::MAX, false);
    let (model, controller) = setup(&["a.bin"], Arc::clone(&worker), fast_settings());

    controller.queue("a.bin").unwrap();
    drive_to_idle(&controller).await;

    assert_eq!(worker.calls.load(Ordering::SeqCst), 1);
    let file = model.get("a.bin").unwrap();
    assert_eq!(file.state, FileState::Default);
    assert!(file.last_error.as_deref().unwrap().contains("no such file"));
  }

  #[tokio::test]
  async fn test_retry_without_a_failure_is_rejected() {
    let worker = FakeWorker::new(100, 1);
    let (_, controller) = setup(&["a.bin"], worker, fast_settings());

    assert_eq!(controller.retry("a.bin"), Err(CommandRejected::NothingToRetry("a.bin".into())));
  }

  #[tokio::test]
  async fn test_stop_during_download_returns_to_default() {
    let worker = FakeWorker::new(100, 5_000);
    let (model, controller) = setup(&["a.bin"], worker, fast_settings());

    controller.queue("a.bin").unwrap();
    controller.service();
    wait_for_state(&model, "a.bin", FileState::Downloading).await;

    controller.stop("a.bin").await.unwrap();

    let file = model.get("a.bin").unwrap();
    assert_eq!(file.state, FileState::Default);
    assert_eq!(file.downloaded_size, 0);
    assert_eq!(controller.in_flight(), 0);

    // Stopped paths are suppressed for the AutoQueue...
    let policy = AutoQueue::new(true, &["*".into()], &[]).unwrap();
    assert_eq!(controller.auto_queue(&policy, &["a.bin".into()]), 0);

    // ...but an explicit queue lifts the suppression.
    controller.queue("a.bin").unwrap();
    assert_eq!(model.get("a.bin").unwrap().state, FileState::Queued);
  }

  #[tokio::test]
  async fn test_stop_of_a_queued_job_dequeues_it() {
    let worker = FakeWorker::new(100, 1);
    let settings = JobSettings { max_concurrent_downloads: 0, ..fast_settings() };
    let (model, controller) = setup(&["a.bin"], worker, settings);

    controller.queue("a.bin").unwrap();
    controller.service();
    assert_eq!(model.get("a.bin").unwrap().state, FileState::Queued);

    controller.stop("a.bin").await.unwrap();
    assert_eq!(model.get("a.bin").unwrap().state, FileState::Default);
    assert_eq!(controller.stop("a.bin").await, Err(CommandRejected::NoJob("a.bin".into())));
  }

  #[tokio::test]
  async fn test_extract_preconditions() {
    let worker = FakeWorker::new(100, 1);
    let (model, controller) = setup(&["a.zip", "b.bin"], worker, fast_settings());

    // Not downloaded yet.
    assert_eq!(controller.extract("a.zip"), Err(CommandRejected::NotDownloaded("a.zip".into())));

    model
      .merge(ScanSide::Local, &[remote_entry("a.zip", 100), remote_entry("b.bin", 100)]);

    // Downloaded but not an archive.
    assert_eq!(controller.extract("b.bin"), Err(CommandRejected::NotExtractable("b.bin".into())));
    assert!(controller.extract("a.zip").is_ok());
  }

  #[tokio::test]
  async fn test_extract_runs_and_returns_to_downloaded() {
    let worker = FakeWorker::new(100, 5);
    let (model, controller) = setup(&["a.zip"], Arc::clone(&worker), fast_settings());
    model.merge(ScanSide::Local, &[remote_entry("a.zip", 100)]);
    let mut rx = model.subscribe();

    controller.extract("a.zip").unwrap();
    drive_to_idle(&controller).await;

    assert_eq!(worker.extract_calls.load(Ordering::SeqCst), 1);
    assert_eq!(model.get("a.zip").unwrap().state, FileState::Downloaded);

    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
      states.push(event.file.state);
    }
    assert_eq!(states, vec![FileState::Extracting, FileState::Downloaded]);
  }

  #[tokio::test]
  async fn test_failed_extraction_keeps_the_archive() {
    let mut worker = FakeWorker::new(100, 1);
    if let Some(w) = Arc::get_mut(&mut worker) {
      w.extract_fails = true;
    }
    let (model, controller) = setup(&["a.zip"], Arc::clone(&worker), fast_settings());
    model.merge(ScanSide::Local, &[remote_entry("a.zip", 100)]);

    controller.extract("a.zip").unwrap();
    drive_to_idle(&controller).await;

    let file = model.get("a.zip").unwrap();
    assert_eq!(file.state, FileState::Downloaded);
    assert!(file.last_error.as_deref().unwrap().contains("corrupt archive"));
  }

  #[tokio::test]
  async fn test_queue_order_survives_a_restart() {
    let store = Arc::new(MemoryStateStore::new());
    let entries = vec![remote_entry("a.bin", 100), remote_entry("b.bin", 100)];

    {
      let shared = SharedModel::new(Model::new());
      shared.merge(ScanSide::Remote, &entries);
      let controller = JobController::new(
        shared,
        FakeWorker::new(100, 1),
        Arc::clone(&store) as Arc<dyn StateStore>,
        JobSettings { max_concurrent_downloads: 0, ..fast_settings() },
      );
      controller.queue("a.bin").unwrap();
      controller.queue("b.bin").unwrap();
    }

    // New process: fresh model from a fresh scan, same store.
    let shared = SharedModel::new(Model::new());
    shared.merge(ScanSide::Remote, &entries);
    let worker = FakeWorker::new(100, 5);
    let controller = JobController::new(
      shared.clone(),
      Arc::clone(&worker),
      Arc::clone(&store) as Arc<dyn StateStore>,
      JobSettings { max_concurrent_downloads: 1, ..fast_settings() },
    );

    controller.restore();
    assert_eq!(shared.get("a.bin").unwrap().state, FileState::Queued);
    assert_eq!(shared.get("b.bin").unwrap().state, FileState::Queued);

    drive_to_idle(&controller).await;
    assert_eq!(*worker.seen.lock().unwrap(), vec!["a.bin".to_string(), "b.bin".to_string()]);
  }

  #[tokio::test]
  async fn test_restart_requeues_jobs_interrupted_mid_flight() {
    let store = Arc::new(MemoryStateStore::new());
    let entries = vec![remote_entry("a.bin", 100), remote_entry("b.bin", 100)];
    let snapshot;

    // First process: b.bin waits in the queue while a.bin is actively
    // downloading when the process dies. Active jobs never reach the
    // persisted queue; a.bin only survives through the model snapshot.
    {
      let shared = SharedModel::new(Model::new());
      shared.merge(ScanSide::Remote, &entries);
      let controller = JobController::new(
        shared.clone(),
        FakeWorker::new(100, 5_000),
        Arc::clone(&store) as Arc<dyn StateStore>,
        JobSettings { max_concurrent_downloads: 1, ..fast_settings() },
      );
      controller.queue("a.bin").unwrap();
      controller.queue("b.bin").unwrap();
      controller.service();
      wait_for_state(&shared, "a.bin", FileState::Downloading).await;
      snapshot = shared.snapshot();
    }

    // New process: the snapshot demotes a.bin back to Queued.
    let restored = SharedModel::new(Model::from_snapshot(snapshot, vec![]));
    let worker = FakeWorker::new(100, 5);
    let controller = JobController::new(
      restored.clone(),
      Arc::clone(&worker),
      Arc::clone(&store) as Arc<dyn StateStore>,
      JobSettings { max_concurrent_downloads: 1, ..fast_settings() },
    );

    controller.restore();
    assert_eq!(restored.get("a.bin").unwrap().state, FileState::Queued);
    assert_eq!(controller.in_flight(), 2);

    drive_to_idle(&controller).await;

    // Persisted order first, readopted snapshot entries behind it.
    assert_eq!(*worker.seen.lock().unwrap(), vec!["b.bin".to_string(), "a.bin".to_string()]);
    assert_eq!(restored.get("a.bin").unwrap().state, FileState::Downloaded);
    assert_eq!(restored.get("b.bin").unwrap().state, FileState::Downloaded);
  }

  #[tokio::test]
  async fn test_autoqueue_queues_matching_candidates_once() {
    let worker = FakeWorker::new(100, 1);
    let settings = JobSettings { max_concurrent_downloads: 0, ..fast_settings() };
    let (model, controller) = setup(&["keep.bin", "skip.txt"], worker, settings);
    let policy = AutoQueue::new(true, &["*.bin".into()], &[]).unwrap();

    let candidates = vec!["keep.bin".to_string(), "skip.txt".to_string()];
    assert_eq!(controller.auto_queue(&policy, &candidates), 1);
    assert_eq!(model.get("keep.bin").unwrap().state, FileState::Queued);
    assert_eq!(model.get("skip.txt").unwrap().state, FileState::Default);

    // Idempotent across cycles: the queued path is not re-selected.
    assert_eq!(controller.auto_queue(&policy, &candidates), 0);
  }
}
