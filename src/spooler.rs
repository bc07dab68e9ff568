use crate::errors::{PrintError, Result};
use std::collections::HashSet;
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Read-only view of the OS print spooler.
///
/// Calls are blocking; the reconciliation loop runs them on the blocking pool.
#[cfg_attr(test, mockall::automock)]
pub trait SpoolerQuery: Send + Sync {
    /// Whether job listing works on this platform at all
    fn is_supported(&self) -> bool;

    /// Names of the jobs currently queued on `printer_name`, uppercased
    fn list_job_names(&self, printer_name: &str) -> Result<HashSet<String>>;
}

/// Spooler for platforms without a job-listing facility
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedSpooler;

impl SpoolerQuery for UnsupportedSpooler {
    fn is_supported(&self) -> bool {
        false
    }

    fn list_job_names(&self, _printer_name: &str) -> Result<HashSet<String>> {
        Err(PrintError::PlatformUnsupported(
            "print spooler job listing is only available on Windows".to_string(),
        ))
    }
}

/// Windows spooler queried through PowerShell's `Get-PrintJob`
#[derive(Debug, Clone)]
pub struct WindowsSpooler {
    shell: String,
}

impl Default for WindowsSpooler {
    fn default() -> Self {
        Self {
            shell: "powershell".to_string(),
        }
    }
}

impl WindowsSpooler {
    pub fn new() -> Self {
        Self::default()
    }

    fn job_query_script(printer_name: &str) -> String {
        format!(
            "Get-PrintJob -PrinterName '{}' | ForEach-Object {{ $_.DocumentName }}",
            escape_single_quoted(printer_name)
        )
    }
}

impl SpoolerQuery for WindowsSpooler {
    fn is_supported(&self) -> bool {
        cfg!(target_os = "windows")
    }

    fn list_job_names(&self, printer_name: &str) -> Result<HashSet<String>> {
        let output = Command::new(&self.shell)
            .args(["-NoProfile", "-NonInteractive", "-Command"])
            .arg(Self::job_query_script(printer_name))
            .output()
            .map_err(|e| PrintError::Spooler(format!("failed to run {}: {}", self.shell, e)))?;

        if !output.status.success() {
            return Err(PrintError::Spooler(format!(
                "Get-PrintJob failed for {}: {}",
                printer_name,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let names = parse_job_names(&String::from_utf8_lossy(&output.stdout));
        debug!("Spooler reports {} live jobs on {}", names.len(), printer_name);
        Ok(names)
    }
}

/// Pick the spooler implementation for the running platform
pub fn platform_spooler() -> Arc<dyn SpoolerQuery> {
    if cfg!(target_os = "windows") {
        Arc::new(WindowsSpooler::new())
    } else {
        Arc::new(UnsupportedSpooler)
    }
}

/// One job name per line; blank lines dropped, names uppercased for comparison
pub fn parse_job_names(output: &str) -> HashSet<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_uppercase)
        .collect()
}

fn escape_single_quoted(value: &str) -> String {
    value.replace('\'', "''")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_job_names() {
        let names = parse_job_names("report.pdf\r\n\r\n  Invoice 12.PDF  \nreport.pdf\n");
        assert_eq!(names.len(), 2);
        assert!(names.contains("REPORT.PDF"));
        assert!(names.contains("INVOICE 12.PDF"));
    }

    #[test]
    fn test_parse_empty_output() {
        assert!(parse_job_names("").is_empty());
    }

    #[test]
    fn test_unsupported_spooler() {
        let spooler = UnsupportedSpooler;
        assert!(!spooler.is_supported());
        assert!(matches!(
            spooler.list_job_names("Office"),
            Err(PrintError::PlatformUnsupported(_))
        ));
    }

    #[test]
    fn test_query_script_escapes_quotes() {
        let script = WindowsSpooler::job_query_script("Bob's Printer");
        assert!(script.contains("-PrinterName 'Bob''s Printer'"));
    }

    #[test]
    fn test_platform_spooler_matches_target() {
        assert_eq!(platform_spooler().is_supported(), cfg!(target_os = "windows"));
    }
}
