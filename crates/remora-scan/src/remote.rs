use std::path::PathBuf;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use remora_core::ports::{FileEntry, RemoteExecutor, ScanError, Scanner};

use crate::wire::decode_listing;

/// Scanner del árbol remoto, vía helper ejecutado por el transporte.
///
/// El helper (`scanfs`) se instala una sola vez por vida del proceso, de
/// forma perezosa en el primer `scan()`: así cargar la configuración no
/// falla aunque el remoto esté caído. Cada scan ejecuta el helper con la
/// raíz configurada y deserializa el listado versionado de su stdout.
pub struct RemoteScanner<E> {
  exec: E,
  remote_root: String,
  helper_local: PathBuf,
  helper_remote: String,
  bootstrapped: Mutex<bool>,
}

impl<E: RemoteExecutor> RemoteScanner<E> {
  /// Transient remote failures are retried this many times per scan, same
  /// bound the original daemon shipped with.
  const RETRY_COUNT: u32 = 5;

  pub fn new(
    exec: E,
    remote_root: impl Into<String>,
    helper_local: impl Into<PathBuf>,
    helper_remote: impl Into<String>,
  ) -> Self {
    RemoteScanner {
      exec,
      remote_root: remote_root.into(),
      helper_local: helper_local.into(),
      helper_remote: helper_remote.into(),
      bootstrapped: Mutex::new(false),
    }
  }

  /// Copia el helper al remoto. Fallos aquí son de instalación: fatales,
  /// sin reintento.
  async fn install_helper(&self) -> Result<(), ScanError> {
    if !self.helper_local.is_file() {
      return Err(ScanError::Install(format!(
        "helper binary not found at {}",
        self.helper_local.display()
      )));
    }

    info!(
      target: "scan",
      local = %self.helper_local.display(),
      remote = %self.helper_remote,
      "installing scan helper on remote host"
    );

    self
      .exec
      .copy_file(&self.helper_local, &self.helper_remote)
      .await
      .map_err(|e| ScanError::Install(e.to_string()))
  }

  async fn run_helper(&self) -> Result<Vec<u8>, ScanError> {
    let cmd = format!("{} '{}'", self.helper_remote, self.remote_root);

    let mut retries = 0;
    loop {
      match self.exec.run_command(&cmd).await {
        Ok(out) => return Ok(out),
        Err(e) if e.is_transient() && retries < Self::RETRY_COUNT => {
          retries += 1;
          warn!(
            target: "scan",
            retry = retries,
            error = %e,
            "retrying remote scan after transient error"
          );
        }
        Err(e) => return Err(ScanError::Remote(e.to_string())),
      }
    }
  }
}

#[async_trait]
impl<E: RemoteExecutor> Scanner for RemoteScanner<E> {
  async fn scan(&self) -> Result<Vec<FileEntry>, ScanError> {
    {
      let mut done = self.bootstrapped.lock().await;
      if !*done {
        self.install_helper().await?;
        *done = true;
      }
    }

    let out = self.run_helper().await?;
    decode_listing(&out).map_err(|e| ScanError::Decode(e.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::wire::encode_listing;
  use remora_core::ports::{RemoteCopyError, RemoteErrorKind, RemoteExecError};
  use std::path::Path;
  use std::sync::atomic::{AtomicU32, Ordering};

  struct FakeRemote {
    /// How many leading run_command calls fail, and how.
    fail_first: u32,
    kind: RemoteErrorKind,
    copy_fails: bool,
    runs: AtomicU32,
    copies: AtomicU32,
    listing: Vec<u8>,
  }

  impl FakeRemote {
    fn ok() -> Self {
      Self::failing(0, RemoteErrorKind::Other)
    }

    fn failing(fail_first: u32, kind: RemoteErrorKind) -> Self {
      let listing = encode_listing(&[FileEntry {
        path: "a.txt".into(),
        is_dir: false,
        size: 100,
        mtime: 0,
      }]);
      FakeRemote {
        fail_first,
        kind,
        copy_fails: false,
        runs: AtomicU32::new(0),
        copies: AtomicU32::new(0),
        listing,
      }
    }
  }

  #[async_trait]
  impl RemoteExecutor for &FakeRemote {
    async fn run_command(&self, _cmd: &str) -> Result<Vec<u8>, RemoteExecError> {
      let call = self.runs.fetch_add(1, Ordering::SeqCst);
      if call < self.fail_first {
        return Err(RemoteExecError::new(self.kind, "simulated failure"));
      }
      Ok(self.listing.clone())
    }

    async fn copy_file(&self, _local: &Path, _remote: &str) -> Result<(), RemoteCopyError> {
      self.copies.fetch_add(1, Ordering::SeqCst);
      if self.copy_fails {
        return Err(RemoteCopyError::new("simulated copy failure"));
      }
      Ok(())
    }
  }

  fn helper_on_disk() -> tempfile::TempDir {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::write(tmp.path().join("scanfs"), b"#!/bin/true").unwrap();
    tmp
  }

  fn scanner<'a>(remote: &'a FakeRemote, helper_dir: &Path) -> RemoteScanner<&'a FakeRemote> {
    RemoteScanner::new(remote, "/srv/files", helper_dir.join("scanfs"), "/tmp/remora_scanfs")
  }

  #[tokio::test]
  async fn test_scan_happy_path() {
    let remote = FakeRemote::ok();
    let tmp = helper_on_disk();

    let entries = scanner(&remote, tmp.path()).scan().await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "a.txt");
  }

  #[tokio::test]
  async fn test_bootstrap_runs_once_per_process() {
    let remote = FakeRemote::ok();
    let tmp = helper_on_disk();
    let scanner = scanner(&remote, tmp.path());

    scanner.scan().await.unwrap();
    scanner.scan().await.unwrap();

    assert_eq!(remote.copies.load(Ordering::SeqCst), 1);
    assert_eq!(remote.runs.load(Ordering::SeqCst), 2);
  }

  #[tokio::test]
  async fn test_transient_errors_are_retried_then_succeed() {
    // Fails attempts 1-3, succeeds on the 4th: inside the bound of 5.
    let remote = FakeRemote::failing(3, RemoteErrorKind::ResourceBusy);
    let tmp = helper_on_disk();

    let entries = scanner(&remote, tmp.path()).scan().await.unwrap();

    assert_eq!(entries.len(), 1);
    assert_eq!(remote.runs.load(Ordering::SeqCst), 4);
  }

  #[tokio::test]
  async fn test_retry_budget_exhaustion_fails_the_cycle() {
    let remote = FakeRemote::failing(u32::MAX, RemoteErrorKind::ConnectionReset);
    let tmp = helper_on_disk();

    let err = scanner(&remote, tmp.path()).scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Remote(_)));
    assert!(!err.is_fatal());
    // First attempt plus five retries.
    assert_eq!(remote.runs.load(Ordering::SeqCst), 6);
  }

  #[tokio::test]
  async fn test_non_transient_error_is_not_retried() {
    let remote = FakeRemote::failing(u32::MAX, RemoteErrorKind::Other);
    let tmp = helper_on_disk();

    let err = scanner(&remote, tmp.path()).scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Remote(_)));
    assert_eq!(remote.runs.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_missing_helper_binary_is_fatal() {
    let remote = FakeRemote::ok();
    let tmp = tempfile::tempdir().unwrap();

    let err = scanner(&remote, tmp.path()).scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Install(_)));
    assert!(err.is_fatal());
    assert_eq!(remote.copies.load(Ordering::SeqCst), 0);
  }

  #[tokio::test]
  async fn test_failed_copy_is_fatal() {
    let mut remote = FakeRemote::ok();
    remote.copy_fails = true;
    let tmp = helper_on_disk();

    let err = scanner(&remote, tmp.path()).scan().await.unwrap_err();

    assert!(matches!(err, ScanError::Install(_)));
    assert!(err.is_fatal());
    assert_eq!(remote.runs.load(Ordering::SeqCst), 0);
  }
}
