pub mod autoqueue;
pub mod domain;
pub mod errors;
pub mod model;
pub mod ports;

pub use autoqueue::AutoQueue;
pub use errors::CommandRejected;
pub use model::{Model, ScanSide, SharedModel};
