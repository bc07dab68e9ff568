use crate::errors::{PrintError, Result};
use crate::request::{PrintRequest, PrintSource};
use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// A spawned (or spawnable) print utility process.
///
/// Dropping the value disposes the process; implementations must terminate it
/// if it is still running at that point.
pub trait PrintProcess: Send {
    fn start(&mut self) -> Result<()>;

    /// Resolves to `true` when the process exited within `timeout`, `false` otherwise.
    fn wait_for_exit(&mut self, timeout: Duration) -> impl Future<Output = Result<bool>> + Send;

    fn kill(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Builds print processes from validated requests without starting them.
pub trait ProcessFactory: Send + Sync {
    type Process: PrintProcess;

    /// Checks run before the caller is admitted. Defaults to field validation.
    fn check_request(&self, request: &PrintRequest) -> Result<()> {
        request.validate()
    }

    fn create(&self, executable: &Path, request: &PrintRequest) -> Result<Self::Process>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Created,
    Running,
    Exited,
    Killed,
}

/// OS process backed by `tokio::process`
pub struct SystemProcess {
    command: Command,
    program: String,
    printer_name: String,
    stdin_payload: Option<Vec<u8>>,
    child: Option<Child>,
    state: ProcessState,
    /// Temporary copy of a stream source, removed on dispose
    spill_file: Option<PathBuf>,
}

impl SystemProcess {
    pub fn new(executable: &Path, args: Vec<OsString>, printer_name: &str) -> Self {
        let mut command = Command::new(executable);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        #[cfg(windows)]
        {
            const CREATE_NO_WINDOW: u32 = 0x0800_0000;
            command.creation_flags(CREATE_NO_WINDOW);
        }

        Self {
            command,
            program: executable.display().to_string(),
            printer_name: printer_name.to_string(),
            stdin_payload: None,
            child: None,
            state: ProcessState::Created,
            spill_file: None,
        }
    }

    /// Pipe `bytes` to the child's stdin once it starts
    pub fn with_stdin(mut self, bytes: Vec<u8>) -> Self {
        self.command.stdin(Stdio::piped());
        self.stdin_payload = Some(bytes);
        self
    }

    /// Capture stdout/stderr and forward them to debug logs
    pub fn capture_output(mut self) -> Self {
        self.command.stdout(Stdio::piped()).stderr(Stdio::piped());
        self
    }

    fn with_spill_file(mut self, path: PathBuf) -> Self {
        self.spill_file = Some(path);
        self
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }
}

impl PrintProcess for SystemProcess {
    fn start(&mut self) -> Result<()> {
        if self.state != ProcessState::Created {
            return Err(PrintError::Process(format!("{} was already started", self.program)));
        }

        let mut child = self.command.spawn().map_err(|source| PrintError::Launch {
            program: self.program.clone(),
            source,
        })?;
        self.state = ProcessState::Running;

        debug!(
            "Started {} (pid {:?}) for printer {}",
            self.program,
            child.id(),
            self.printer_name
        );

        if let Some(bytes) = self.stdin_payload.take() {
            if let Some(mut stdin) = child.stdin.take() {
                let printer_name = self.printer_name.clone();
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&bytes).await {
                        warn!("Failed to stream document to printer {}: {}", printer_name, e);
                    }
                    // stdin is dropped here, closing the pipe
                });
            }
        }

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, self.printer_name.clone(), "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, self.printer_name.clone(), "stderr");
        }

        self.child = Some(child);
        Ok(())
    }

    async fn wait_for_exit(&mut self, timeout: Duration) -> Result<bool> {
        let child = self
            .child
            .as_mut()
            .ok_or_else(|| PrintError::Process(format!("{} was not started", self.program)))?;

        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => {
                self.state = ProcessState::Exited;
                if status.success() {
                    debug!("{} finished for printer {}", self.program, self.printer_name);
                } else {
                    warn!(
                        "{} exited with {} for printer {}",
                        self.program, status, self.printer_name
                    );
                }
                Ok(true)
            }
            Ok(Err(e)) => Err(PrintError::Process(format!(
                "failed to wait for {}: {}",
                self.program, e
            ))),
            Err(_) => Ok(false),
        }
    }

    async fn kill(&mut self) -> Result<()> {
        if self.state != ProcessState::Running {
            return Ok(());
        }

        if let Some(child) = self.child.as_mut() {
            // Exited between the timeout firing and now
            if let Ok(Some(_)) = child.try_wait() {
                self.state = ProcessState::Exited;
                return Ok(());
            }
            child.kill().await.map_err(PrintError::Termination)?;
        }

        self.state = ProcessState::Killed;
        info!("Killed {} for printer {}", self.program, self.printer_name);
        Ok(())
    }
}

impl Drop for SystemProcess {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            if self.state == ProcessState::Running {
                debug!("Disposing running {} for printer {}", self.program, self.printer_name);
                let _ = child.start_kill();
            }
        }

        if let Some(path) = self.spill_file.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                debug!("Failed to remove spill file {}: {}", path.display(), e);
            }
        }
    }
}

fn forward_output<R>(reader: R, printer_name: String, stream: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(printer = %printer_name, stream, "{}", line);
        }
    });
}

// ============================================================================
// Argument construction
// ============================================================================

/// Arguments for `PDFtoPrinter`: `<file> <printer> [pages=..] [copies=..] [focus=..] /s`
pub fn pdftoprinter_args(request: &PrintRequest, file: &Path) -> Vec<OsString> {
    let mut args = vec![
        file.as_os_str().to_os_string(),
        OsString::from(&request.printer_name),
    ];

    if let Some(pages) = request.pages.as_deref().filter(|p| !p.trim().is_empty()) {
        args.push(format!("pages={}", pages).into());
    }
    if let Some(copies) = request.copies {
        args.push(format!("copies={}", copies).into());
    }
    if let Some(focus) = request.focus.as_deref().filter(|f| !f.trim().is_empty()) {
        args.push(format!("focus={}", focus).into());
    }

    args.push("/s".into());
    args
}

/// Arguments for CUPS `lp`. Stream sources omit the file so `lp` reads stdin.
pub fn lp_args(request: &PrintRequest) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-d".into(), OsString::from(&request.printer_name)];

    if let Some(pages) = request.pages.as_deref().filter(|p| !p.trim().is_empty()) {
        args.push("-P".into());
        args.push(pages.into());
    }
    if let Some(copies) = request.copies {
        args.push("-n".into());
        args.push(copies.to_string().into());
    }
    if let Some(focus) = request.focus.as_deref().filter(|f| !f.trim().is_empty()) {
        args.push("-t".into());
        args.push(focus.into());
    }
    if let PrintSource::File(path) = &request.source {
        args.push(path.as_os_str().to_os_string());
    }

    args
}

// ============================================================================
// Factory
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SystemProcessFactory {
    spill_dir: Option<PathBuf>,
}

impl SystemProcessFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for temporary copies of stream sources (defaults to the OS temp dir)
    pub fn with_spill_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.spill_dir = Some(dir.into());
        self
    }

    fn create_pdftoprinter(&self, executable: &Path, request: &PrintRequest) -> Result<SystemProcess> {
        match &request.source {
            PrintSource::File(path) => Ok(SystemProcess::new(
                executable,
                pdftoprinter_args(request, path),
                &request.printer_name,
            )),
            PrintSource::Stream(bytes) => {
                // PDFtoPrinter only accepts paths
                let dir = self.spill_dir.clone().unwrap_or_else(std::env::temp_dir);
                let spill = dir.join(format!("{}.pdf", uuid::Uuid::new_v4()));
                std::fs::write(&spill, bytes)?;
                debug!("Spilled {} byte stream to {}", bytes.len(), spill.display());

                Ok(SystemProcess::new(
                    executable,
                    pdftoprinter_args(request, &spill),
                    &request.printer_name,
                )
                .with_spill_file(spill))
            }
        }
    }

    fn create_lp(&self, executable: &Path, request: &PrintRequest) -> SystemProcess {
        let process =
            SystemProcess::new(executable, lp_args(request), &request.printer_name).capture_output();

        match &request.source {
            PrintSource::Stream(bytes) => process.with_stdin(bytes.clone()),
            PrintSource::File(_) => process,
        }
    }
}

impl ProcessFactory for SystemProcessFactory {
    type Process = SystemProcess;

    fn check_request(&self, request: &PrintRequest) -> Result<()> {
        request.validate()?;
        request.check_source()
    }

    fn create(&self, executable: &Path, request: &PrintRequest) -> Result<SystemProcess> {
        // The file may have gone while the job waited for a slot
        self.check_request(request)?;

        if cfg!(target_os = "windows") {
            self.create_pdftoprinter(executable, request)
        } else {
            Ok(self.create_lp(executable, request))
        }
    }
}
