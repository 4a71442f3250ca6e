//! Controlador de trabajos de transferencia.
//!
//! Mantiene la cola FIFO de descargas, respeta el límite de concurrencia,
//! reintenta fallos transitorios con backoff y traduce comandos externos
//! (queue/stop/extract/retry) en transiciones del modelo. El orden de la
//! cola y los fallos permanentes se persisten en el state store para
//! sobrevivir reinicios.

mod controller;

pub use controller::{JobController, JobSettings};
