pub mod remote;
pub mod scanner;
pub mod state_store;
pub mod transfer;

pub use remote::{RemoteCopyError, RemoteErrorKind, RemoteExecError, RemoteExecutor};
pub use scanner::{FileEntry, ScanError, Scanner};
pub use state_store::{StateStore, StoreError};
pub use transfer::{TransferError, TransferWorker};
