pub mod command;
pub mod event;
pub mod job;
pub mod model_file;
pub mod state;

pub use command::Command;
pub use event::{EventKind, ModelEvent};
pub use job::{Job, JobAction};
pub use model_file::ModelFile;
pub use state::FileState;
