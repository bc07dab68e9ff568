//! Runs an external PDF print utility with bounded concurrency and per-job
//! timeouts, and optionally deletes printed files once the OS spooler has
//! finished with them.

pub mod cleanup;
pub mod cleanup_printer;
pub mod config;
pub mod discovery;
pub mod errors;
pub mod printer;
pub mod process;
pub mod request;
pub mod spooler;

pub use cleanup::{CleanupFailure, CleanupRegistry, DeletionHandle, ObserverId, ReconcileSummary};
pub use cleanup_printer::CleanupFilesPrinter;
pub use config::PrinterServiceConfig;
pub use discovery::{query_available_printers, PrinterInfo};
pub use errors::{PrintError, Result};
pub use printer::{ConcurrencyGatedPrinter, Printer};
pub use process::{PrintProcess, ProcessFactory, SystemProcess, SystemProcessFactory};
pub use request::{PrintRequest, PrintSource};
pub use spooler::{platform_spooler, SpoolerQuery};
