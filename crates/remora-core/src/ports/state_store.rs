use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("store io error: {0}")]
  Io(String),

  #[error("store encode error: {0}")]
  Encode(String),
}

/// Port de persistencia clave→bytes para el estado del motor
/// (orden de cola, contadores de intentos, snapshot del modelo).
///
/// Las escrituras deben ser atómicas por clave: un crash pierde como mucho
/// la escritura en curso, nunca corrompe lo ya guardado.
pub trait StateStore: Send + Sync {
  fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;
  fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;
}
