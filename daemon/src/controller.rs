use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use remora_core::domain::{Command, FileState, ModelEvent, ModelFile};
use remora_core::ports::{Scanner, StateStore, TransferWorker};
use remora_core::{AutoQueue, CommandRejected, ScanSide, SharedModel};
use remora_jobs::JobController;

/// Clave del snapshot del modelo en el state store.
pub const MODEL_KEY: &str = "model";

/// El ciclo del motor: scan de ambos lados, merge, AutoQueue y servicio de
/// la cola, a intervalo fijo.
///
/// Los fallos de scan son locales al ciclo (se loguean y se reintenta en el
/// siguiente); la única excepción es un fallo de instalación del helper
/// remoto, que no se arregla solo y tumba el motor con error.
pub struct Controller<L, R, W> {
  model: SharedModel,
  local: L,
  remote: R,
  jobs: JobController<W>,
  policy: AutoQueue,
  store: Arc<dyn StateStore>,
  interval: Duration,
}

impl<L, R, W> Controller<L, R, W>
where
  L: Scanner,
  R: Scanner,
  W: TransferWorker + 'static,
{
  #[allow(clippy::too_many_arguments)]
  pub fn new(
    model: SharedModel,
    local: L,
    remote: R,
    jobs: JobController<W>,
    policy: AutoQueue,
    store: Arc<dyn StateStore>,
    interval: Duration,
  ) -> Self {
    Controller { model, local, remote, jobs, policy, store, interval }
  }

  /// Entrada síncrona de comandos externos, usable entre ciclos.
  pub async fn apply(&self, command: Command) -> Result<(), CommandRejected> {
    self.jobs.apply(command).await
  }

  /// Copia completa del modelo para capas externas.
  pub fn snapshot(&self) -> Vec<ModelFile> {
    self.model.snapshot()
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ModelEvent> {
    self.model.subscribe()
  }

  /// Corre el motor hasta que `shutdown` cambie a `true` (o se cierre).
  pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(target: "engine", interval_secs = self.interval.as_secs_f64(), "engine started");

    loop {
      tokio::select! {
        _ = ticker.tick() => {
          if let Err(e) = self.cycle().await {
            // The cycle may already have merged fresh scan data; persist
            // it before the error takes the engine down.
            self.flush();
            return Err(e);
          }
        }
        changed = shutdown.changed() => {
          if changed.is_err() || *shutdown.borrow() {
            break;
          }
        }
      }
    }

    // Shutdown: no more scheduling; running jobs already checkpoint their
    // own state on every mutation, so only the model snapshot is pending.
    self.flush();
    info!(target: "engine", "engine stopped");
    Ok(())
  }

  async fn cycle(&self) -> anyhow::Result<()> {
    let (local, remote) = tokio::join!(self.local.scan(), self.remote.scan());

    // Either merge can return a path to `Default` (new on the remote, or a
    // local copy that disappeared); both feed the AutoQueue.
    let mut candidates: Vec<String> = Vec::new();

    match local {
      Ok(entries) => {
        let events = self.model.merge(ScanSide::Local, &entries);
        debug!(target: "engine", entries = entries.len(), events = events.len(), "local merge");
        candidates.extend(default_paths(&events));
      }
      Err(e) => warn!(target: "engine", error = %e, "local scan failed, retrying next cycle"),
    }

    match remote {
      Ok(entries) => {
        let events = self.model.merge(ScanSide::Remote, &entries);
        debug!(target: "engine", entries = entries.len(), events = events.len(), "remote merge");
        candidates.extend(default_paths(&events));
      }
      Err(e) if e.is_fatal() => {
        error!(target: "engine", error = %e, "remote scanner cannot be set up");
        return Err(e.into());
      }
      Err(e) => warn!(target: "engine", error = %e, "remote scan failed, retrying next cycle"),
    }

    if !candidates.is_empty() {
      self.jobs.auto_queue(&self.policy, &candidates);
    }

    self.jobs.service();
    self.flush();
    Ok(())
  }

  /// Persists the model snapshot so a restart can reseed sizes and states.
  fn flush(&self) {
    let snapshot = self.model.snapshot();
    match serde_json::to_vec(&snapshot) {
      Ok(bytes) => {
        if let Err(e) = self.store.save(MODEL_KEY, &bytes) {
          error!(target: "engine", error = %e, "could not persist model snapshot");
        }
      }
      Err(e) => error!(target: "engine", error = %e, "could not encode model snapshot"),
    }
  }
}

fn default_paths(events: &[ModelEvent]) -> Vec<String> {
  events
    .iter()
    .filter(|event| event.file.state == FileState::Default)
    .map(|event| event.path.clone())
    .collect()
}
