//! Adaptadores finos sobre las herramientas externas (ssh, scp, rsync y los
//! extractores). Toda la política vive en el motor; aquí solo se lanzan
//! procesos y se clasifica su desenlace.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::debug;

use remora_core::ports::{
  RemoteCopyError, RemoteErrorKind, RemoteExecError, RemoteExecutor, TransferError,
  TransferWorker,
};

/// Ejecución remota vía ssh/scp en modo batch (sin prompts).
#[derive(Clone)]
pub struct ShellRemote {
  target: String,
  port: u16,
}

impl ShellRemote {
  pub fn new(target: impl Into<String>, port: u16) -> Self {
    ShellRemote { target: target.into(), port }
  }
}

/// ssh reserva el 255 para fallos del transporte; 124/126 son las
/// convenciones de timeout(1) y de binario ocupado/no ejecutable.
fn classify_exit(code: Option<i32>) -> RemoteErrorKind {
  match code {
    Some(255) => RemoteErrorKind::ConnectionReset,
    Some(124) => RemoteErrorKind::TimedOut,
    Some(126) => RemoteErrorKind::ResourceBusy,
    _ => RemoteErrorKind::Other,
  }
}

fn classify_io(e: &std::io::Error) -> RemoteErrorKind {
  match e.kind() {
    std::io::ErrorKind::TimedOut => RemoteErrorKind::TimedOut,
    std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted => {
      RemoteErrorKind::ConnectionReset
    }
    _ => RemoteErrorKind::Other,
  }
}

#[async_trait]
impl RemoteExecutor for ShellRemote {
  async fn run_command(&self, cmd: &str) -> Result<Vec<u8>, RemoteExecError> {
    debug!(target: "transport", cmd, "running remote command");

    let output = Command::new("ssh")
      .arg("-p")
      .arg(self.port.to_string())
      .arg("-o")
      .arg("BatchMode=yes")
      .arg(&self.target)
      .arg(cmd)
      .output()
      .await
      .map_err(|e| RemoteExecError::new(classify_io(&e), e.to_string()))?;

    if !output.status.success() {
      let kind = classify_exit(output.status.code());
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(RemoteExecError::new(
        kind,
        format!("ssh exited with {}: {}", output.status, stderr.trim()),
      ));
    }

    Ok(output.stdout)
  }

  async fn copy_file(&self, local: &Path, remote: &str) -> Result<(), RemoteCopyError> {
    let output = Command::new("scp")
      .arg("-P")
      .arg(self.port.to_string())
      .arg("-o")
      .arg("BatchMode=yes")
      .arg(local)
      .arg(format!("{}:{}", self.target, remote))
      .output()
      .await
      .map_err(|e| RemoteCopyError::new(e.to_string()))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(RemoteCopyError::new(format!(
        "scp exited with {}: {}",
        output.status,
        stderr.trim()
      )));
    }

    Ok(())
  }
}

/// Worker de transferencia respaldado por rsync, más extracción local.
pub struct MirrorWorker {
  target: String,
  port: u16,
  remote_root: String,
  local_root: PathBuf,
}

impl MirrorWorker {
  pub fn new(
    target: impl Into<String>,
    port: u16,
    remote_root: impl Into<String>,
    local_root: impl Into<PathBuf>,
  ) -> Self {
    MirrorWorker {
      target: target.into(),
      port,
      remote_root: remote_root.into(),
      local_root: local_root.into(),
    }
  }

  fn local_path(&self, path: &str) -> PathBuf {
    self.local_root.join(path)
  }
}

/// rsync marca con estos códigos los fallos de red y de timeout; el resto
/// (archivo inexistente, permisos, protocolo) no se arregla reintentando.
fn rsync_is_transient(code: Option<i32>) -> bool {
  matches!(code, Some(10) | Some(12) | Some(23) | Some(30) | Some(35) | Some(255))
}

/// Suma recursiva sin seguir symlinks; rsync ya materializó el árbol.
async fn tree_size(root: &Path) -> std::io::Result<u64> {
  let meta = tokio::fs::symlink_metadata(root).await?;
  if !meta.is_dir() {
    return Ok(meta.len());
  }

  let mut total = 0;
  let mut stack = vec![root.to_path_buf()];
  while let Some(dir) = stack.pop() {
    let mut rd = tokio::fs::read_dir(&dir).await?;
    while let Some(entry) = rd.next_entry().await? {
      let meta = entry.metadata().await?;
      if meta.is_dir() {
        stack.push(entry.path());
      } else if meta.is_file() {
        total += meta.len();
      }
    }
  }
  Ok(total)
}

/// Qué extractor corresponde a un archivo, por sufijo.
fn extract_command(path: &str) -> Option<(&'static str, Vec<String>)> {
  let lower = path.to_lowercase();
  let name = path.to_string();

  if lower.ends_with(".zip") {
    Some(("unzip", vec!["-o".into(), name]))
  } else if lower.ends_with(".rar") {
    Some(("unrar", vec!["x".into(), "-o+".into(), name]))
  } else if lower.ends_with(".tar") || lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
    Some(("tar", vec!["-xf".into(), name]))
  } else {
    None
  }
}

#[async_trait]
impl TransferWorker for MirrorWorker {
  async fn transfer(&self, path: &str, progress: mpsc::Sender<u64>) -> Result<u64, TransferError> {
    // rsync --partial resumes interrupted copies on retry; byte progress
    // comes from the local rescans, so the channel just gets closed.
    drop(progress);

    let dest = self.local_path(path);
    let parent = dest.parent().unwrap_or(&self.local_root);
    tokio::fs::create_dir_all(parent)
      .await
      .map_err(|e| TransferError::fatal(format!("{}: {e}", parent.display())))?;

    let source = format!("{}:{}/{}", self.target, self.remote_root, path);
    debug!(target: "transport", %source, dest = %dest.display(), "starting rsync");

    let output = Command::new("rsync")
      .arg("-a")
      .arg("--partial")
      .arg("-s")
      .arg("-e")
      .arg(format!("ssh -p {} -o BatchMode=yes", self.port))
      .arg(source)
      .arg(parent)
      .output()
      .await
      .map_err(|e| TransferError::transient(e.to_string()))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      let message = format!("rsync exited with {}: {}", output.status, stderr.trim());
      return Err(if rsync_is_transient(output.status.code()) {
        TransferError::transient(message)
      } else {
        TransferError::fatal(message)
      });
    }

    tree_size(&dest).await.map_err(|e| TransferError::fatal(format!("{}: {e}", dest.display())))
  }

  async fn extract(&self, path: &str) -> Result<(), TransferError> {
    let archive = self.local_path(path);
    let Some(file_name) = archive.file_name().map(|n| n.to_string_lossy().into_owned()) else {
      return Err(TransferError::fatal(format!("{path}: not a file path")));
    };
    let Some((program, args)) = extract_command(&file_name) else {
      return Err(TransferError::fatal(format!("{path}: no extractor for this suffix")));
    };
    let workdir = archive.parent().unwrap_or(&self.local_root).to_path_buf();

    let output = Command::new(program)
      .args(&args)
      .current_dir(&workdir)
      .output()
      .await
      .map_err(|e| TransferError::fatal(format!("{program}: {e}")))?;

    if !output.status.success() {
      let stderr = String::from_utf8_lossy(&output.stderr);
      return Err(TransferError::fatal(format!(
        "{program} exited with {}: {}",
        output.status,
        stderr.trim()
      )));
    }

    Ok(())
  }
}
