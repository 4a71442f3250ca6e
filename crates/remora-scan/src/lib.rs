pub mod local;
pub mod remote;
pub mod wire;

pub use local::LocalScanner;
pub use remote::RemoteScanner;
pub use wire::{WIRE_VERSION, WireError, decode_listing, encode_listing};
