use globset::{Glob, GlobSet, GlobSetBuilder};
use thiserror::Error;

use crate::domain::{FileState, ModelFile};

#[derive(Debug, Error)]
pub enum PatternError {
  #[error("invalid glob pattern {pattern:?}: {reason}")]
  Invalid { pattern: String, reason: String },
}

/// Política de encolado automático.
///
/// Evalúa paths recién llegados a `Default` contra las reglas configuradas:
/// un match de deny gana siempre; si no, decide el primer allow que
/// matchee. Sin reglas allow no se encola nada solo.
///
/// The policy only answers "do we want this path"; whether a job already
/// references it (or it failed permanently before) is the job controller's
/// call, made at queue time so both checks happen under one lock.
#[derive(Debug)]
pub struct AutoQueue {
  enabled: bool,
  allow: GlobSet,
  deny: GlobSet,
}

impl AutoQueue {
  pub fn new(enabled: bool, allow: &[String], deny: &[String]) -> Result<Self, PatternError> {
    Ok(AutoQueue { enabled, allow: compile(allow)?, deny: compile(deny)? })
  }

  pub fn disabled() -> Self {
    AutoQueue { enabled: false, allow: GlobSet::empty(), deny: GlobSet::empty() }
  }

  pub fn wants(&self, file: &ModelFile) -> bool {
    if !self.enabled || file.state != FileState::Default {
      return false;
    }
    if self.deny.is_match(&file.path) {
      return false;
    }
    self.allow.is_match(&file.path)
  }
}

fn compile(patterns: &[String]) -> Result<GlobSet, PatternError> {
  let mut builder = GlobSetBuilder::new();
  for pattern in patterns {
    let glob = Glob::new(pattern).map_err(|e| PatternError::Invalid {
      pattern: pattern.clone(),
      reason: e.to_string(),
    })?;
    builder.add(glob);
  }
  builder
    .build()
    .map_err(|e| PatternError::Invalid { pattern: String::new(), reason: e.to_string() })
}
