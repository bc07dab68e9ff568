// Common test utilities and fixtures

use pdf_print_dispatch::{PrintError, PrintProcess, PrintRequest, Printer, ProcessFactory, Result, SpoolerQuery};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;

/// Shared bookkeeping for every fake process a factory hands out
#[derive(Default)]
#[allow(dead_code)]
pub struct ProcessTracker {
    pub running: AtomicUsize,
    pub max_running: AtomicUsize,
    pub started: AtomicUsize,
    pub killed: AtomicUsize,
    pub fail_launch: AtomicBool,
    events: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ProcessTracker {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn on_start(&self, label: &str) {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.record(format!("start {}", label));
    }

    fn on_finish(&self, how: &str, label: &str) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.record(format!("{} {}", how, label));
    }
}

/// Factory whose processes "run" for a fixed duration on the Tokio timer
#[derive(Clone)]
pub struct FakeProcessFactory {
    pub tracker: Arc<ProcessTracker>,
    run_for: Duration,
}

#[allow(dead_code)]
impl FakeProcessFactory {
    pub fn new(run_for: Duration) -> Self {
        Self {
            tracker: Arc::new(ProcessTracker::default()),
            run_for,
        }
    }
}

impl ProcessFactory for FakeProcessFactory {
    type Process = FakeProcess;

    fn create(&self, _executable: &Path, request: &PrintRequest) -> Result<FakeProcess> {
        let label = request
            .file_path()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| request.printer_name.clone());

        Ok(FakeProcess {
            label,
            tracker: self.tracker.clone(),
            run_for: self.run_for,
            running: false,
        })
    }
}

pub struct FakeProcess {
    label: String,
    tracker: Arc<ProcessTracker>,
    run_for: Duration,
    running: bool,
}

impl FakeProcess {
    fn finish(&mut self, how: &str) {
        if self.running {
            self.running = false;
            self.tracker.on_finish(how, &self.label);
        }
    }
}

impl PrintProcess for FakeProcess {
    fn start(&mut self) -> Result<()> {
        if self.tracker.fail_launch.load(Ordering::SeqCst) {
            return Err(PrintError::Launch {
                program: "fake-lp".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            });
        }
        self.running = true;
        self.tracker.on_start(&self.label);
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
        let exited = tokio::time::timeout(timeout, tokio::time::sleep(self.run_for))
            .await
            .is_ok();
        if exited {
            self.finish("exit");
        }
        Ok(exited)
    }

    async fn kill(&mut self) -> Result<()> {
        self.tracker.killed.fetch_add(1, Ordering::SeqCst);
        self.finish("kill");
        Ok(())
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.finish("dispose");
    }
}

/// Mock printer for cleanup tests; never spawns anything
#[derive(Clone)]
#[allow(dead_code)]
pub struct MockPrinter {
    pub print_count: Arc<RwLock<u32>>,
    pub should_fail: Arc<RwLock<bool>>,
}

#[allow(dead_code)]
impl MockPrinter {
    pub fn new() -> Self {
        Self {
            print_count: Arc::new(RwLock::new(0)),
            should_fail: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn set_should_fail(&self, fail: bool) {
        *self.should_fail.write().await = fail;
    }

    pub async fn get_print_count(&self) -> u32 {
        *self.print_count.read().await
    }
}

impl Printer for MockPrinter {
    async fn print(&self, _request: &PrintRequest, _timeout: Option<Duration>) -> Result<()> {
        if *self.should_fail.read().await {
            return Err(PrintError::Process("Simulated printer failure".to_string()));
        }
        *self.print_count.write().await += 1;
        Ok(())
    }
}

/// Spooler with scriptable live jobs per printer
#[allow(dead_code)]
pub struct FakeSpooler {
    supported: bool,
    jobs: Mutex<HashMap<String, HashSet<String>>>,
    pub queries: AtomicUsize,
}

#[allow(dead_code)]
impl FakeSpooler {
    pub fn supported() -> Self {
        Self {
            supported: true,
            jobs: Mutex::new(HashMap::new()),
            queries: AtomicUsize::new(0),
        }
    }

    pub fn unsupported() -> Self {
        Self {
            supported: false,
            ..Self::supported()
        }
    }

    pub fn set_jobs(&self, printer: &str, names: &[&str]) {
        let names = names.iter().map(|n| n.to_uppercase()).collect();
        self.jobs.lock().unwrap().insert(printer.to_string(), names);
    }

    pub fn clear_jobs(&self, printer: &str) {
        self.jobs.lock().unwrap().remove(printer);
    }
}

impl SpoolerQuery for FakeSpooler {
    fn is_supported(&self) -> bool {
        self.supported
    }

    fn list_job_names(&self, printer_name: &str) -> Result<HashSet<String>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .jobs
            .lock()
            .unwrap()
            .get(printer_name)
            .cloned()
            .unwrap_or_default())
    }
}

/// Spooler that parks the querying thread until the test lets it go.
///
/// The first barrier wait signals "pass entered", the second releases it.
#[allow(dead_code)]
pub struct ParkedSpooler {
    pub barrier: Arc<Barrier>,
}

impl SpoolerQuery for ParkedSpooler {
    fn is_supported(&self) -> bool {
        true
    }

    fn list_job_names(&self, _printer_name: &str) -> Result<HashSet<String>> {
        self.barrier.wait();
        self.barrier.wait();
        Ok(HashSet::new())
    }
}

/// Write a throwaway document into `dir`
#[allow(dead_code)]
pub fn write_document(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"%PDF-1.4\n%test\n").expect("Failed to write test document");
    path
}
