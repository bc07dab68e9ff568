use crate::config::{PrinterServiceConfig, DEFAULT_PRINT_TIMEOUT};
use crate::errors::{PrintError, Result};
use crate::process::{PrintProcess, ProcessFactory, SystemProcessFactory};
use crate::request::PrintRequest;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Anything that can print a request and report completion.
pub trait Printer: Send + Sync {
    /// Print `request`, giving the job `timeout` (or the printer's default) to finish.
    fn print(
        &self,
        request: &PrintRequest,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Runs one print utility process per job, never more than `max_concurrent` at once.
///
/// Jobs that exceed their timeout are killed and treated as finished; the
/// utility may already have handed the document to the spooler by then.
pub struct ConcurrencyGatedPrinter<F = SystemProcessFactory> {
    semaphore: Arc<Semaphore>,
    factory: F,
    util_path: PathBuf,
    default_timeout: Duration,
    max_concurrent: usize,
}

impl ConcurrencyGatedPrinter<SystemProcessFactory> {
    /// Printer using the platform utility found by the default lookup
    pub fn new(max_concurrent: usize) -> Result<Self> {
        let config = PrinterServiceConfig {
            max_concurrent_prints: max_concurrent,
            ..Default::default()
        };
        Self::from_config(&config)
    }

    pub fn from_config(config: &PrinterServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::with_factory(
            config.max_concurrent_prints,
            SystemProcessFactory::new(),
            config.resolve_util_path(),
        )?
        .with_default_timeout(config.print_timeout()))
    }
}

impl<F: ProcessFactory> ConcurrencyGatedPrinter<F> {
    pub fn with_factory(max_concurrent: usize, factory: F, util_path: impl Into<PathBuf>) -> Result<Self> {
        if max_concurrent == 0 {
            return Err(PrintError::Config(
                "max concurrent printings must be greater than 0".to_string(),
            ));
        }

        let util_path = util_path.into();
        info!(
            "Print dispatcher ready ({} concurrent, utility: {})",
            max_concurrent,
            util_path.display()
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            factory,
            util_path,
            default_timeout: DEFAULT_PRINT_TIMEOUT,
            max_concurrent,
        })
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Free admission slots right now
    pub fn available_slots(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn util_path(&self) -> &Path {
        &self.util_path
    }
}

impl<F: ProcessFactory> Printer for ConcurrencyGatedPrinter<F> {
    #[tracing::instrument(skip(self, request), fields(printer = %request.printer_name))]
    async fn print(&self, request: &PrintRequest, timeout: Option<Duration>) -> Result<()> {
        // Checked before admission
        self.factory.check_request(request)?;
        let timeout = timeout.unwrap_or(self.default_timeout);

        // Released on every exit path when dropped
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| PrintError::Config("admission gate closed".to_string()))?;
        debug!("Admitted print job ({} slots left)", self.semaphore.available_permits());

        let mut process = self.factory.create(&self.util_path, request)?;
        process.start()?;

        if process.wait_for_exit(timeout).await? {
            debug!("Print job finished for {}", request.printer_name);
        } else {
            warn!(
                "Print job for {} did not finish within {:?}, killing it",
                request.printer_name, timeout
            );
            process.kill().await?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        created: AtomicUsize,
        killed: AtomicBool,
        fail_kill: AtomicBool,
    }

    struct StubProcess {
        run_for: Duration,
        counters: Arc<Counters>,
    }

    impl PrintProcess for StubProcess {
        fn start(&mut self) -> Result<()> {
            Ok(())
        }

        async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
            Ok(tokio::time::timeout(timeout, tokio::time::sleep(self.run_for))
                .await
                .is_ok())
        }

        async fn kill(&mut self) -> Result<()> {
            if self.counters.fail_kill.load(Ordering::SeqCst) {
                return Err(PrintError::Termination(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "access denied",
                )));
            }
            self.counters.killed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct StubFactory {
        run_for: Duration,
        counters: Arc<Counters>,
    }

    impl ProcessFactory for StubFactory {
        type Process = StubProcess;

        fn create(&self, _executable: &Path, _request: &PrintRequest) -> Result<StubProcess> {
            self.counters.created.fetch_add(1, Ordering::SeqCst);
            Ok(StubProcess {
                run_for: self.run_for,
                counters: self.counters.clone(),
            })
        }
    }

    fn stub(run_for: Duration) -> (StubFactory, Arc<Counters>) {
        let counters = Arc::new(Counters::default());
        (
            StubFactory {
                run_for,
                counters: counters.clone(),
            },
            counters,
        )
    }

    #[test]
    fn test_zero_concurrency_fails() {
        let (factory, _) = stub(Duration::ZERO);
        let result = ConcurrencyGatedPrinter::with_factory(0, factory, "lp");
        assert!(matches!(result, Err(PrintError::Config(_))));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_completes() {
        let (factory, counters) = stub(Duration::from_secs(30));
        let printer = ConcurrencyGatedPrinter::with_factory(1, factory, "lp").unwrap();

        let request = PrintRequest::from_stream("Office", b"%PDF".to_vec());
        let result = printer.print(&request, Some(Duration::from_millis(20))).await;

        assert!(result.is_ok());
        assert!(counters.killed.load(Ordering::SeqCst));
        assert_eq!(printer.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_failed_kill_surfaces_and_releases_slot() {
        let (factory, counters) = stub(Duration::from_secs(30));
        counters.fail_kill.store(true, Ordering::SeqCst);
        let printer = ConcurrencyGatedPrinter::with_factory(2, factory, "lp").unwrap();

        let request = PrintRequest::from_stream("Office", b"%PDF".to_vec());
        let result = printer.print(&request, Some(Duration::from_millis(20))).await;

        assert!(matches!(result, Err(PrintError::Termination(_))));
        assert!(!counters.killed.load(Ordering::SeqCst));
        assert_eq!(printer.available_slots(), 2);
    }

    #[tokio::test]
    async fn test_default_timeout_applies() {
        let (factory, counters) = stub(Duration::from_secs(30));
        let printer = ConcurrencyGatedPrinter::with_factory(2, factory, "lp")
            .unwrap()
            .with_default_timeout(Duration::from_millis(20));

        let request = PrintRequest::from_stream("Office", b"%PDF".to_vec());
        printer.print(&request, None).await.unwrap();
        assert!(counters.killed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_invalid_request_never_reaches_factory() {
        let (factory, counters) = stub(Duration::ZERO);
        let printer = ConcurrencyGatedPrinter::with_factory(1, factory, "lp").unwrap();

        let request = PrintRequest::from_stream("", b"%PDF".to_vec());
        let result = printer.print(&request, None).await;

        assert!(matches!(result, Err(PrintError::Validation(_))));
        assert_eq!(counters.created.load(Ordering::SeqCst), 0);
        assert_eq!(printer.available_slots(), 1);
    }

    #[tokio::test]
    async fn test_system_printer_missing_file_releases_slot() {
        let printer = ConcurrencyGatedPrinter::new(1).unwrap();
        let request = PrintRequest::from_file("Office", "/no/such/document.pdf");

        let result = printer.print(&request, None).await;
        assert!(matches!(result, Err(PrintError::Validation(_))));
        assert_eq!(printer.available_slots(), 1);
    }
}
