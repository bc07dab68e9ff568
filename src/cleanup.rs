use crate::config::{PrinterServiceConfig, DEFAULT_CLEANUP_INTERVAL};
use crate::errors::{PrintError, Result};
use crate::spooler::{platform_spooler, SpoolerQuery};
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

static GLOBAL_REGISTRY: Lazy<Arc<CleanupRegistry>> =
    Lazy::new(|| Arc::new(CleanupRegistry::new(platform_spooler(), DEFAULT_CLEANUP_INTERVAL)));

// ============================================================================
// Queued files and completion handles
// ============================================================================

/// A printed file waiting for its spooler job to leave the queue
#[derive(Debug)]
pub struct QueuedFile {
    path: PathBuf,
    completion: oneshot::Sender<PathBuf>,
}

impl QueuedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Uppercased base name, matched against spooler job names
    fn job_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_uppercase())
            .unwrap_or_default()
    }

    fn resolve(self) {
        // Nobody awaiting the handle is fine
        let _ = self.completion.send(self.path);
    }
}

/// Resolves once the queued file has been deleted.
///
/// If deletion fails the handle never resolves; the failure goes to the
/// registry's observers instead. Use [`DeletionHandle::wait_timeout`] when
/// that matters.
#[derive(Debug)]
pub struct DeletionHandle {
    path: PathBuf,
    receiver: oneshot::Receiver<PathBuf>,
}

impl DeletionHandle {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn wait(self) -> PathBuf {
        match self.receiver.await {
            Ok(path) => path,
            // Sender dropped after a failed deletion
            Err(_) => std::future::pending().await,
        }
    }

    pub async fn wait_timeout(self, timeout: Duration) -> Option<PathBuf> {
        tokio::time::timeout(timeout, self.wait()).await.ok()
    }

    /// Non-blocking check; `Some` once the file is gone
    pub fn try_resolved(&mut self) -> Option<PathBuf> {
        self.receiver.try_recv().ok()
    }
}

// ============================================================================
// Per-printer queue
// ============================================================================

/// FIFO of files printed to one printer, oldest first
#[derive(Debug)]
pub struct PendingDeletionQueue {
    printer_name: String,
    files: Mutex<VecDeque<QueuedFile>>,
}

impl PendingDeletionQueue {
    fn new(printer_name: &str) -> Self {
        Self {
            printer_name: printer_name.to_string(),
            files: Mutex::new(VecDeque::new()),
        }
    }

    pub fn printer_name(&self) -> &str {
        &self.printer_name
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn push(&self, file: QueuedFile) {
        self.lock().push_back(file);
    }

    /// Pop the head unless its job is still live. Stops at the first blocked file.
    fn pop_unblocked(&self, live_jobs: &HashSet<String>) -> Head {
        let mut files = self.lock();
        let blocked = match files.front() {
            None => return Head::Empty,
            Some(head) => live_jobs.contains(&head.job_name()),
        };

        if blocked {
            Head::Blocked
        } else {
            files.pop_front().map_or(Head::Empty, Head::Ready)
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<QueuedFile>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum Head {
    Empty,
    Blocked,
    Ready(QueuedFile),
}

// ============================================================================
// Failure notifications
// ============================================================================

/// A queued file that could not be deleted. It has been dropped from its queue.
#[derive(Debug)]
pub struct CleanupFailure {
    pub printer_name: String,
    pub path: PathBuf,
    pub error: PrintError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Observer = Arc<dyn Fn(&CleanupFailure) + Send + Sync>;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub deleted: usize,
    pub failed: usize,
    /// Printers whose queue head still has a live spooler job
    pub blocked: usize,
    /// Printers the spooler could not be queried for
    pub unreachable: usize,
}

// ============================================================================
// Registry
// ============================================================================

/// Shared per-printer deletion queues plus the loop that drains them.
///
/// Files are only ever deleted head-first. This assumes the spooler finishes
/// jobs in the order they were queued; a later job finishing first waits
/// behind the head until the head's job is gone too.
pub struct CleanupRegistry {
    spooler: Arc<dyn SpoolerQuery>,
    interval: Duration,
    queues: RwLock<HashMap<String, Arc<PendingDeletionQueue>>>,
    pass_in_progress: AtomicBool,
    observers: Mutex<Vec<(ObserverId, Observer)>>,
    next_observer_id: AtomicU64,
    reconciler: Mutex<ReconcilerState>,
}

#[derive(Default)]
struct ReconcilerState {
    leases: usize,
    running: Option<RunningLoop>,
}

struct RunningLoop {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl CleanupRegistry {
    pub fn new(spooler: Arc<dyn SpoolerQuery>, interval: Duration) -> Self {
        Self {
            spooler,
            interval,
            queues: RwLock::new(HashMap::new()),
            pass_in_progress: AtomicBool::new(false),
            observers: Mutex::new(Vec::new()),
            next_observer_id: AtomicU64::new(1),
            reconciler: Mutex::new(ReconcilerState::default()),
        }
    }

    /// Registry on the platform spooler, polling at the configured interval
    pub fn from_config(config: &PrinterServiceConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::new(platform_spooler(), config.cleanup_interval()))
    }

    /// The process-wide registry, created on first use with the platform spooler
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY.clone()
    }

    pub fn is_supported(&self) -> bool {
        self.spooler.is_supported()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Queue `path` for deletion once `printer_name`'s spooler no longer lists it
    pub fn enqueue(&self, printer_name: &str, path: impl Into<PathBuf>) -> DeletionHandle {
        let path = path.into();
        let (sender, receiver) = oneshot::channel();

        let queue = self.queue_for(printer_name);
        queue.push(QueuedFile {
            path: path.clone(),
            completion: sender,
        });
        debug!(
            "Queued {} for deletion on {} ({} pending)",
            path.display(),
            printer_name,
            queue.len()
        );

        DeletionHandle { path, receiver }
    }

    pub fn pending_count(&self, printer_name: &str) -> usize {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(printer_name)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }

    fn queue_for(&self, printer_name: &str) -> Arc<PendingDeletionQueue> {
        if let Some(queue) = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(printer_name)
        {
            return queue.clone();
        }

        // Re-checked under the write lock by `entry`
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        queues
            .entry(printer_name.to_string())
            .or_insert_with(|| Arc::new(PendingDeletionQueue::new(printer_name)))
            .clone()
    }

    // ------------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------------

    /// Register a callback for failed deletions.
    ///
    /// Callbacks run synchronously on the reconciliation thread and must return quickly.
    pub fn on_cleanup_failed<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&CleanupFailure) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(observer_id, _)| *observer_id != id);
        observers.len() != before
    }

    fn notify_failure(&self, failure: CleanupFailure) {
        error!(
            "Cleanup failed for {} on {}: {}",
            failure.path.display(),
            failure.printer_name,
            failure.error
        );

        // Snapshot so callbacks may (un)register observers
        let observers: Vec<Observer> = self
            .observers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(&failure);
        }
    }

    // ------------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------------

    /// Run one reconciliation pass on the calling thread.
    ///
    /// Returns `None` without doing anything if another pass is in progress.
    pub fn reconcile_now(&self) -> Option<ReconcileSummary> {
        if self
            .pass_in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reconciliation pass already running, skipping");
            return None;
        }
        let _guard = PassGuard(&self.pass_in_progress);

        let queues: Vec<Arc<PendingDeletionQueue>> = self
            .queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut summary = ReconcileSummary::default();
        for queue in queues {
            if queue.is_empty() {
                continue;
            }

            let live_jobs = match self.spooler.list_job_names(queue.printer_name()) {
                Ok(names) => names,
                Err(e) => {
                    warn!("Skipping cleanup for {} this pass: {}", queue.printer_name(), e);
                    summary.unreachable += 1;
                    continue;
                }
            };

            self.drain_queue(&queue, &live_jobs, &mut summary);
        }

        if summary.deleted > 0 || summary.failed > 0 {
            info!(
                "Cleanup pass: {} deleted, {} failed, {} printers blocked",
                summary.deleted, summary.failed, summary.blocked
            );
        }
        Some(summary)
    }

    fn drain_queue(
        &self,
        queue: &PendingDeletionQueue,
        live_jobs: &HashSet<String>,
        summary: &mut ReconcileSummary,
    ) {
        loop {
            let file = match queue.pop_unblocked(live_jobs) {
                Head::Empty => return,
                Head::Blocked => {
                    summary.blocked += 1;
                    return;
                }
                Head::Ready(file) => file,
            };

            match std::fs::remove_file(&file.path) {
                Ok(()) => {
                    debug!("Deleted printed file {}", file.path.display());
                    summary.deleted += 1;
                    file.resolve();
                }
                Err(source) => {
                    summary.failed += 1;
                    let path = file.path.clone();
                    // Dropping the sender leaves the handle unresolved
                    drop(file);
                    self.notify_failure(CleanupFailure {
                        printer_name: queue.printer_name().to_string(),
                        error: PrintError::CleanupDeletion {
                            path: path.clone(),
                            source,
                        },
                        path,
                    });
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Background loop lifecycle
    // ------------------------------------------------------------------------

    /// Keep the reconciliation loop running for as long as the lease lives.
    ///
    /// The first lease starts the loop on the current Tokio runtime; dropping
    /// the last one stops it after the pass in progress.
    pub fn acquire_lease(self: &Arc<Self>) -> Result<ReconcilerLease> {
        let mut state = self.reconciler_state();

        if state.running.is_none() {
            let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
                PrintError::Config("file cleanup requires a running Tokio runtime".to_string())
            })?;
            let (stop, stop_rx) = oneshot::channel();
            let task = runtime.spawn(Self::run_loop(self.clone(), stop_rx));
            state.running = Some(RunningLoop { stop, task });
            info!("Started print cleanup loop (every {:?})", self.interval);
        }

        state.leases += 1;
        Ok(ReconcilerLease {
            registry: self.clone(),
        })
    }

    fn release_lease(&self) {
        let mut state = self.reconciler_state();
        state.leases = state.leases.saturating_sub(1);

        if state.leases == 0 {
            if let Some(running) = state.running.take() {
                let _ = running.stop.send(());
                debug!("Last cleanup lease released, stopping loop");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.reconciler_state().running.is_some()
    }

    /// Stop the loop and wait for the pass in progress to finish.
    ///
    /// Queued files are kept; a later lease starts the loop again.
    pub async fn shutdown(&self) {
        let running = self.reconciler_state().running.take();

        if let Some(RunningLoop { stop, task }) = running {
            let _ = stop.send(());
            if let Err(e) = task.await {
                error!("Cleanup loop ended abnormally: {}", e);
            }
            info!("Print cleanup loop stopped");
        }
    }

    fn reconciler_state(&self) -> MutexGuard<'_, ReconcilerState> {
        self.reconciler.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn run_loop(registry: Arc<Self>, mut stop: oneshot::Receiver<()>) {
        let mut ticker = tokio::time::interval(registry.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = ticker.tick() => {}
            }

            let pass_registry = registry.clone();
            match tokio::task::spawn_blocking(move || pass_registry.reconcile_now()).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!("Cleanup tick skipped, previous pass still running"),
                Err(e) => error!("Cleanup pass panicked: {}", e),
            }
        }
    }
}

/// Keeps a registry's reconciliation loop alive
pub struct ReconcilerLease {
    registry: Arc<CleanupRegistry>,
}

impl Drop for ReconcilerLease {
    fn drop(&mut self) {
        self.registry.release_lease();
    }
}

struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
