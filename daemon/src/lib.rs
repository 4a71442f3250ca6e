mod controller;
mod transport;

pub use controller::{Controller, MODEL_KEY};
pub use transport::{MirrorWorker, ShellRemote};

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use remora_config::{AutoQueueConfig, JobsConfig, PATHS, SyncConfig, TransportConfig};
use remora_core::domain::ModelFile;
use remora_core::ports::StateStore;
use remora_core::{AutoQueue, Model, SharedModel};
use remora_jobs::{JobController, JobSettings};
use remora_scan::{LocalScanner, RemoteScanner};
use remora_store::JsonStateStore;

pub fn init_tracing() {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run() -> anyhow::Result<()> {
  // --- Dependency Injection Phase ---

  // 1. Configuration. Loading writes every section back so the file on
  //    disk always shows the full set of knobs; validation refuses to run
  //    against a freshly generated (empty) config.
  let sync = SyncConfig::load().context("loading [sync] config")?;
  sync.validate()?;
  let transport = TransportConfig::load().context("loading [transport] config")?;
  transport.validate()?;
  let jobs_cfg = JobsConfig::load().context("loading [jobs] config")?;
  let autoqueue_cfg = AutoQueueConfig::load().context("loading [autoqueue] config")?;

  // 2. Persistence adapter.
  let store: Arc<dyn StateStore> = Arc::new(JsonStateStore::open(PATHS.state_dir())?);

  // 3. Model, reseeded from the last snapshot when one exists.
  let model = SharedModel::new(load_model(store.as_ref(), &autoqueue_cfg.extract_suffixes));

  // 4. Scanner adapters (local walk + remote helper over ssh).
  let local = LocalScanner::new(&sync.local_root);
  let remote = RemoteScanner::new(
    ShellRemote::new(transport.target(), transport.port),
    &sync.remote_root,
    &sync.helper_local_path,
    &sync.helper_remote_path,
  );

  // 5. Transfer worker and job controller.
  let worker = Arc::new(MirrorWorker::new(
    transport.target(),
    transport.port,
    &sync.remote_root,
    &sync.local_root,
  ));
  let settings = JobSettings {
    max_concurrent_downloads: jobs_cfg.max_concurrent_downloads,
    max_attempts: jobs_cfg.max_attempts,
    backoff_base: Duration::from_millis(jobs_cfg.backoff_base_ms),
    stop_grace: Duration::from_millis(jobs_cfg.stop_grace_ms),
  };
  let jobs = JobController::new(model.clone(), worker, Arc::clone(&store), settings);
  jobs.restore();

  // 6. Queue policy and engine loop.
  let policy = AutoQueue::new(autoqueue_cfg.enabled, &autoqueue_cfg.allow, &autoqueue_cfg.deny)?;
  let controller = Controller::new(
    model,
    local,
    remote,
    jobs,
    policy,
    store,
    Duration::from_secs(sync.scan_interval_secs),
  );

  let (shutdown_tx, shutdown_rx) = watch::channel(false);
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!(target: "engine", "shutdown requested");
      let _ = shutdown_tx.send(true);
    }
  });

  controller.run(shutdown_rx).await
}

/// Carga el snapshot persistido del modelo; uno ilegible se descarta (el
/// siguiente ciclo de scan reconstruye el estado desde cero).
fn load_model(store: &dyn StateStore, extract_suffixes: &[String]) -> Model {
  let bytes = match store.load(MODEL_KEY) {
    Ok(Some(bytes)) => bytes,
    Ok(None) => return Model::with_extract_suffixes(extract_suffixes.to_vec()),
    Err(e) => {
      warn!(target: "engine", error = %e, "could not read model snapshot");
      return Model::with_extract_suffixes(extract_suffixes.to_vec());
    }
  };

  match serde_json::from_slice::<Vec<ModelFile>>(&bytes) {
    Ok(files) => {
      info!(target: "engine", files = files.len(), "model restored from snapshot");
      Model::from_snapshot(files, extract_suffixes.to_vec())
    }
    Err(e) => {
      warn!(target: "engine", error = %e, "discarding unreadable model snapshot");
      Model::with_extract_suffixes(extract_suffixes.to_vec())
    }
  }
}
