//! Helper de scan que corre en el host remoto.
//!
//! Uso: `scanfs <root>`. Enumera el árbol bajo `root` y escribe el listado
//! versionado en stdout; el motor lo instala por ssh y lo invoca en cada
//! ciclo de scan remoto.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use remora_scan::encode_listing;
use remora_scan::local::list_tree;

#[tokio::main]
async fn main() -> ExitCode {
  let Some(root) = std::env::args().nth(1).map(PathBuf::from) else {
    eprintln!("usage: scanfs <root>");
    return ExitCode::from(2);
  };

  match list_tree(&root).await {
    Ok(entries) => {
      let payload = encode_listing(&entries);
      if let Err(e) = std::io::stdout().write_all(&payload) {
        eprintln!("scanfs: write failed: {e}");
        return ExitCode::FAILURE;
      }
      ExitCode::SUCCESS
    }
    Err(e) => {
      eprintln!("scanfs: {e}");
      ExitCode::FAILURE
    }
  }
}
