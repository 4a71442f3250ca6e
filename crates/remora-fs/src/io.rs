use std::fs;
use std::io::{self, Write};
use std::path::Path;

/// Escritura atómica: volcar a un `.tmp` hermano y renombrar encima.
///
/// El rename es atómico dentro del mismo filesystem, así que un crash
/// a mitad de escritura nunca deja el archivo destino corrupto.
pub fn atomic_write(path: &Path, contents: &[u8]) -> io::Result<()> {
  let tmp_path = path.with_extension("tmp");

  {
    let mut tmp_file = fs::File::create(&tmp_path)?;
    tmp_file.write_all(contents)?;
    tmp_file.sync_all()?;
  }

  fs::rename(&tmp_path, path)?;
  Ok(())
}

pub fn atomic_write_str(path: &Path, contents: &str) -> io::Result<()> {
  atomic_write(path, contents.as_bytes())
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::tempdir;

  #[test]
  fn test_atomic_write_replaces_existing() {
    let tmp = tempdir().unwrap();
    let target = tmp.path().join("state.json");

    atomic_write_str(&target, "first").unwrap();
    atomic_write_str(&target, "second").unwrap();

    assert_eq!(fs::read_to_string(&target).unwrap(), "second");
    // The intermediate tmp file must not linger.
    assert!(!target.with_extension("tmp").exists());
  }
}
