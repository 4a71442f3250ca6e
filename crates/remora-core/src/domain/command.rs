/// Comandos externos aceptados por el motor (capa web, CLI, etc.).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  Queue(String),
  Stop(String),
  Extract(String),
  Retry(String),
}

impl Command {
  pub fn path(&self) -> &str {
    match self {
      Command::Queue(p) | Command::Stop(p) | Command::Extract(p) | Command::Retry(p) => p,
    }
  }
}
