use async_trait::async_trait;
use std::path::Path;

/// Clasificación explícita de fallos remotos.
///
/// El transporte decide el kind al construir el error; el motor nunca
/// inspecciona texto de error para decidir si reintenta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
  /// A resource on the remote end was momentarily busy (e.g. the helper
  /// binary was being replaced while executing).
  ResourceBusy,
  /// The connection dropped mid-command.
  ConnectionReset,
  /// The command did not answer within the transport's deadline.
  TimedOut,
  /// Anything else: auth failures, missing binaries, hard errors.
  Other,
}

impl RemoteErrorKind {
  pub fn is_transient(self) -> bool {
    !matches!(self, RemoteErrorKind::Other)
  }
}

#[derive(Debug, thiserror::Error)]
#[error("remote command failed: {message}")]
pub struct RemoteExecError {
  pub kind: RemoteErrorKind,
  pub message: String,
}

impl RemoteExecError {
  pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
    RemoteExecError { kind, message: message.into() }
  }

  pub fn is_transient(&self) -> bool {
    self.kind.is_transient()
  }
}

#[derive(Debug, thiserror::Error)]
#[error("remote copy failed: {message}")]
pub struct RemoteCopyError {
  pub message: String,
}

impl RemoteCopyError {
  pub fn new(message: impl Into<String>) -> Self {
    RemoteCopyError { message: message.into() }
  }
}

/// Port del transporte de ejecución remota (ssh/scp o equivalente).
/// La implementación concreta vive fuera del motor.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
  /// Runs a command on the remote host and returns its stdout.
  async fn run_command(&self, cmd: &str) -> Result<Vec<u8>, RemoteExecError>;

  /// Copies a local file onto the remote host.
  async fn copy_file(&self, local: &Path, remote: &str) -> Result<(), RemoteCopyError>;
}
