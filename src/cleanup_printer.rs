use crate::cleanup::{CleanupRegistry, DeletionHandle, ReconcilerLease};
use crate::config::PrinterServiceConfig;
use crate::errors::{PrintError, Result};
use crate::printer::Printer;
use crate::request::PrintRequest;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Deletes printed files once the spooler is done with them.
///
/// Does no printing itself: the inner printer runs the job, then the file is
/// queued on the registry and removed by its reconciliation loop. Only works
/// where the spooler can list jobs (Windows); elsewhere every print fails with
/// [`PrintError::PlatformUnsupported`] instead of leaving files behind silently.
pub struct CleanupFilesPrinter<P> {
    inner: P,
    registry: Arc<CleanupRegistry>,
    wait_for_deletion: bool,
    _lease: Option<ReconcilerLease>,
}

impl<P: Printer> CleanupFilesPrinter<P> {
    /// Wrap `inner` using the process-wide registry
    pub fn new(inner: P) -> Result<Self> {
        Self::with_registry(inner, CleanupRegistry::global())
    }

    /// Wrap `inner` with a dedicated registry polling at `config`'s cleanup interval
    pub fn from_config(inner: P, config: &PrinterServiceConfig) -> Result<Self> {
        Self::with_registry(inner, Arc::new(CleanupRegistry::from_config(config)?))
    }

    pub fn with_registry(inner: P, registry: Arc<CleanupRegistry>) -> Result<Self> {
        // No loop to run when the platform can't list spooler jobs
        let lease = if registry.is_supported() {
            Some(registry.acquire_lease()?)
        } else {
            None
        };

        Ok(Self {
            inner,
            registry,
            wait_for_deletion: false,
            _lease: lease,
        })
    }

    /// Make [`Printer::print`] return only after the file is deleted
    pub fn wait_for_deletion(mut self, wait: bool) -> Self {
        self.wait_for_deletion = wait;
        self
    }

    pub fn registry(&self) -> &Arc<CleanupRegistry> {
        &self.registry
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Print and queue the file for deletion, returning its completion handle
    pub async fn print_tracked(
        &self,
        request: &PrintRequest,
        timeout: Option<Duration>,
    ) -> Result<DeletionHandle> {
        if !self.registry.is_supported() {
            return Err(PrintError::PlatformUnsupported(
                "deleting printed files needs spooler job listing, which is only available on Windows"
                    .to_string(),
            ));
        }

        let path = request
            .file_path()
            .ok_or_else(|| {
                PrintError::Validation("only file sources can be cleaned up after printing".to_string())
            })?
            .to_path_buf();

        self.inner.print(request, timeout).await?;

        Ok(self.registry.enqueue(&request.printer_name, path))
    }
}

impl<P: Printer> Printer for CleanupFilesPrinter<P> {
    async fn print(&self, request: &PrintRequest, timeout: Option<Duration>) -> Result<()> {
        let handle = self.print_tracked(request, timeout).await?;

        if self.wait_for_deletion {
            debug!("Waiting for {} to leave the spooler", handle.path().display());
            let deleted = handle.wait().await;
            info!("Printed file {} deleted", deleted.display());
        }

        Ok(())
    }
}
