use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
use futures::StreamExt;
use tracing::warn;

use remora_core::ports::{FileEntry, ScanError, Scanner};
use remora_fs::{WalkConfig, walk};

/// Scanner del árbol local de destino.
///
/// Cada `scan()` es un snapshot completo: recorre la raíz configurada y
/// devuelve archivos y directorios con paths relativos estilo POSIX,
/// ordenados. Errores por entrada (permiso en un subdirectorio, archivo
/// borrado a mitad de recorrido) se saltan con un warning; solo una raíz
/// inaccesible tumba el scan entero.
pub struct LocalScanner {
  root: PathBuf,
}

impl LocalScanner {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }
}

/// Enumera un árbol y lo aplana a `FileEntry`s relativos a `root`.
///
/// Shared with the remote scan helper binary, which runs this very
/// function on the other host and serializes the result to stdout.
pub async fn list_tree(root: &Path) -> Result<Vec<FileEntry>, ScanError> {
  let meta = tokio::fs::metadata(root)
    .await
    .map_err(|e| ScanError::RootUnavailable(format!("{}: {e}", root.display())))?;
  if !meta.is_dir() {
    return Err(ScanError::RootUnavailable(format!("{}: not a directory", root.display())));
  }
  // A root that exists but cannot be opened must not read as an empty
  // tree: downstream that looks like every local copy vanished.
  tokio::fs::read_dir(root)
    .await
    .map_err(|e| ScanError::RootUnavailable(format!("{}: {e}", root.display())))?;

  let entries = walk(root, WalkConfig::default());
  tokio::pin!(entries);

  let mut files = Vec::new();

  while let Some(res) = entries.next().await {
    let entry = match res {
      Ok(e) => e,
      Err(e) => {
        warn!(target: "scan", error = %e, "skipping unreadable entry");
        continue;
      }
    };

    let Some(rel) = relative_posix(root, &entry.path) else {
      continue;
    };

    if entry.file_type.is_dir() {
      files.push(FileEntry { path: rel, is_dir: true, size: 0, mtime: 0 });
      continue;
    }

    if !entry.file_type.is_file() {
      // Sockets, fifos, symlinks: not mirror material.
      continue;
    }

    match tokio::fs::metadata(&entry.path).await {
      Ok(meta) => {
        let mtime = meta
          .modified()
          .ok()
          .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
          .map(|d| d.as_secs())
          .unwrap_or(0);
        files.push(FileEntry { path: rel, is_dir: false, size: meta.len(), mtime });
      }
      Err(e) => {
        warn!(target: "scan", path = %entry.path.display(), error = %e, "stat failed, skipping");
      }
    }
  }

  files.sort_by(|a, b| a.path.cmp(&b.path));
  Ok(files)
}

fn relative_posix(root: &Path, path: &Path) -> Option<String> {
  let rel = path.strip_prefix(root).ok()?;
  let mut out = String::new();
  for comp in rel.components() {
    if !out.is_empty() {
      out.push('/');
    }
    out.push_str(&comp.as_os_str().to_string_lossy());
  }
  if out.is_empty() { None } else { Some(out) }
}

#[async_trait]
impl Scanner for LocalScanner {
  async fn scan(&self) -> Result<Vec<FileEntry>, ScanError> {
    list_tree(&self.root).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::tempdir;

  #[tokio::test]
  async fn test_scan_lists_relative_posix_paths() {
    let tmp = tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("season 1/extras")).unwrap();
    fs::write(tmp.path().join("season 1/ep1.mkv"), vec![0u8; 1234]).unwrap();
    fs::write(tmp.path().join("notes.txt"), b"hi").unwrap();

    let scanner = LocalScanner::new(tmp.path());
    let entries = scanner.scan().await.unwrap();

    let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["notes.txt", "season 1", "season 1/ep1.mkv", "season 1/extras"]);

    let ep1 = entries.iter().find(|e| e.path == "season 1/ep1.mkv").unwrap();
    assert!(!ep1.is_dir);
    assert_eq!(ep1.size, 1234);
    assert!(ep1.mtime > 0);

    let dir = entries.iter().find(|e| e.path == "season 1").unwrap();
    assert!(dir.is_dir);
  }

  #[tokio::test]
  async fn test_missing_root_is_a_scan_error() {
    let tmp = tempdir().unwrap();
    let scanner = LocalScanner::new(tmp.path().join("does-not-exist"));

    let err = scanner.scan().await.unwrap_err();
    assert!(matches!(err, ScanError::RootUnavailable(_)));
    assert!(!err.is_fatal());
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn test_unreadable_root_is_a_scan_error_not_an_empty_tree() {
    use std::os::unix::fs::PermissionsExt;

    let tmp = tempdir().unwrap();
    let root = tmp.path().join("locked");
    fs::create_dir(&root).unwrap();
    fs::write(root.join("kept.bin"), b"x").unwrap();
    fs::set_permissions(&root, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged runs can open the directory regardless; nothing to observe.
    if fs::read_dir(&root).is_ok() {
      fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
      return;
    }

    let err = LocalScanner::new(&root).scan().await.unwrap_err();
    assert!(matches!(err, ScanError::RootUnavailable(_)));

    fs::set_permissions(&root, fs::Permissions::from_mode(0o755)).unwrap();
  }

  #[tokio::test]
  async fn test_scan_is_a_self_contained_snapshot() {
    let tmp = tempdir().unwrap();
    fs::write(tmp.path().join("a.bin"), b"a").unwrap();

    let scanner = LocalScanner::new(tmp.path());
    assert_eq!(scanner.scan().await.unwrap().len(), 1);

    fs::write(tmp.path().join("b.bin"), b"b").unwrap();
    // No incremental state: the new file simply shows up in the next call.
    assert_eq!(scanner.scan().await.unwrap().len(), 2);
  }
}
