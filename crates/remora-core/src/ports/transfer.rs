use async_trait::async_trait;
use tokio::sync::mpsc;

/// Fallo de una transferencia o extracción.
///
/// `transient` lo decide el adapter según el desenlace del proceso externo
/// (reset de red, remoto temporalmente caído); el job controller solo mira
/// la bandera para decidir el reintento.
#[derive(Debug, thiserror::Error)]
#[error("transfer failed: {message}")]
pub struct TransferError {
  pub transient: bool,
  pub message: String,
}

impl TransferError {
  pub fn transient(message: impl Into<String>) -> Self {
    TransferError { transient: true, message: message.into() }
  }

  pub fn fatal(message: impl Into<String>) -> Self {
    TransferError { transient: false, message: message.into() }
  }
}

/// Port de la herramienta externa de mirroring (lftp, rsync, etc.).
///
/// `transfer` mueve un path remoto→local y devuelve el tamaño local final.
/// El progreso se reporta por el canal según avanza; cerrar el canal sin
/// más es válido para herramientas que no saben reportar progreso.
///
/// Cancelación: el controller dropea el future en curso; un adapter que
/// lanza procesos debe matar el proceso hijo en su ruta de drop/abort.
#[async_trait]
pub trait TransferWorker: Send + Sync {
  async fn transfer(
    &self,
    path: &str,
    progress: mpsc::Sender<u64>,
  ) -> Result<u64, TransferError>;

  async fn extract(&self, path: &str) -> Result<(), TransferError>;
}
