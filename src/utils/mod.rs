//! The `utils` module collects the pieces shared by every layer of `livewire`:
//! the error types each component reports, the logging bootstrap and the
//! shutdown signal helper.

pub mod error;
pub mod logging;
pub mod shutdown;
