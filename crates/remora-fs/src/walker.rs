use std::collections::HashSet;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use futures::stream::{self, Stream};
use tokio::fs::{self, ReadDir};

/// Identidad de directorio para cortar ciclos (bind mounts, hard links raros).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct DirId(u64, u64);

#[cfg(unix)]
fn dir_id(meta: &std::fs::Metadata) -> DirId {
  use std::os::unix::fs::MetadataExt;
  DirId(meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn dir_id(_meta: &std::fs::Metadata) -> DirId {
  DirId(0, 0)
}

/// Controls how deep the walk goes. Symlinks are never followed: a mirror
/// target can contain links pointing anywhere, and chasing them would make
/// the local listing disagree with the remote one.
#[derive(Debug, Clone)]
pub struct WalkConfig {
  pub max_depth: usize,
}

impl Default for WalkConfig {
  fn default() -> Self {
    Self { max_depth: 64 }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filtering {
  /// Skip the entry, but still descend if it is a directory.
  Ignore,
  /// Skip the entry and do not descend into it.
  IgnoreDir,
  /// Emit the entry normally.
  Continue,
}

/// One entry produced by the walk. `file_type` comes from `lstat`, so a
/// symlink reports as a symlink and is never descended into.
#[derive(Debug)]
pub struct WalkEntry {
  pub path: PathBuf,
  pub depth: usize,
  pub file_type: std::fs::FileType,
}

impl WalkEntry {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

/// Work items for the explicit stack. Keeping the recursion on our own
/// stack (instead of nested futures) keeps the stream type simple.
enum Frame {
  Enter { path: PathBuf, depth: usize },
  Read { rd: ReadDir, depth: usize },
}

/// Recursively walks `root`, emitting every file and directory beneath it.
pub fn walk(root: impl Into<PathBuf>, cfg: WalkConfig) -> impl Stream<Item = io::Result<WalkEntry>> {
  walk_filtered(root, cfg, |_| async { Filtering::Continue })
}

/// Like [`walk`] but with an async per-entry filter.
///
/// Errors opening or reading a directory are emitted as stream items and
/// the walk continues with the rest of the tree. A failure on the root
/// itself therefore shows up as the first (and only) item.
pub fn walk_filtered<F, Fut>(
  root: impl Into<PathBuf>,
  cfg: WalkConfig,
  filter: F,
) -> impl Stream<Item = io::Result<WalkEntry>>
where
  F: FnMut(&WalkEntry) -> Fut + Send + 'static,
  Fut: Future<Output = Filtering> + Send,
{
  let mut stack = Vec::with_capacity(16);
  stack.push(Frame::Enter { path: root.into(), depth: 0 });

  let seen: HashSet<DirId> = HashSet::new();
  let state = (stack, seen, cfg, filter);

  stream::unfold(state, |(mut stack, mut seen, cfg, mut filter)| async move {
    loop {
      let top = stack.pop()?;

      match top {
        Frame::Enter { path, depth } => {
          if depth > cfg.max_depth {
            continue;
          }

          let meta = match fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => return Some((Err(e), (stack, seen, cfg, filter))),
          };

          // Already-visited directory: cycle, skip it.
          if !seen.insert(dir_id(&meta)) {
            continue;
          }

          match fs::read_dir(&path).await {
            Ok(rd) => stack.push(Frame::Read { rd, depth }),
            Err(e) => return Some((Err(e), (stack, seen, cfg, filter))),
          }
        }

        Frame::Read { mut rd, depth } => {
          match rd.next_entry().await {
            Ok(Some(entry)) => {
              let path = entry.path();

              let ft = match entry.file_type().await {
                Ok(ft) => ft,
                Err(e) => {
                  stack.push(Frame::Read { rd, depth });
                  return Some((Err(e), (stack, seen, cfg, filter)));
                }
              };

              // Put the directory back so the remaining siblings are read.
              stack.push(Frame::Read { rd, depth });

              let walk_entry = WalkEntry { path: path.clone(), depth: depth + 1, file_type: ft };
              let filtering = filter(&walk_entry).await;

              if ft.is_dir() && filtering != Filtering::IgnoreDir && depth + 1 <= cfg.max_depth {
                stack.push(Frame::Enter { path, depth: depth + 1 });
              }

              match filtering {
                Filtering::Continue => return Some((Ok(walk_entry), (stack, seen, cfg, filter))),
                _ => continue,
              }
            }
            // Directory exhausted; the frame stays popped.
            Ok(None) => continue,
            Err(e) => return Some((Err(e), (stack, seen, cfg, filter))),
          }
        }
      }
    }
  })
}
