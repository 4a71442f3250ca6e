pub mod io;
pub mod walker;

pub use io::{atomic_write, atomic_write_str};
pub use walker::{Filtering, WalkConfig, WalkEntry, walk, walk_filtered};
