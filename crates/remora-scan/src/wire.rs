use serde::{Deserialize, Serialize};
use thiserror::Error;

use remora_core::ports::FileEntry;

/// Formato de intercambio entre el helper remoto y el motor.
///
/// Un sobre JSON versionado con una lista plana de registros. El helper y
/// el core evolucionan por separado (el binario instalado en el remoto
/// puede quedarse viejo), así que la versión se comprueba siempre antes de
/// tocar las entradas.
pub const WIRE_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum WireError {
  #[error("listing parse error: {0}")]
  Parse(String),

  #[error("unsupported listing version {found} (engine speaks {expected})")]
  Version { found: u32, expected: u32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct Listing {
  version: u32,
  entries: Vec<FileEntry>,
}

pub fn encode_listing(entries: &[FileEntry]) -> Vec<u8> {
  let listing = Listing { version: WIRE_VERSION, entries: entries.to_vec() };
  // Serialization of plain owned data cannot fail.
  serde_json::to_vec(&listing).unwrap_or_default()
}

pub fn decode_listing(bytes: &[u8]) -> Result<Vec<FileEntry>, WireError> {
  let listing: Listing =
    serde_json::from_slice(bytes).map_err(|e| WireError::Parse(e.to_string()))?;

  if listing.version != WIRE_VERSION {
    return Err(WireError::Version { found: listing.version, expected: WIRE_VERSION });
  }

  Ok(listing.entries)
}
