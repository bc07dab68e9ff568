use crate::errors::{PrintError, Result};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrinterInfo {
    pub name: String,
}

/// List printers known to the OS.
///
/// Uses `Get-Printer` through PowerShell on Windows and `lpstat -a` elsewhere.
pub async fn query_available_printers() -> Result<Vec<PrinterInfo>> {
    let printers = if cfg!(target_os = "windows") {
        query_windows_printers().await?
    } else {
        query_cups_printers().await?
    };

    info!("Found {} printers", printers.len());
    Ok(printers)
}

async fn query_windows_printers() -> Result<Vec<PrinterInfo>> {
    let output = Command::new("powershell")
        .args([
            "-NoProfile",
            "-NonInteractive",
            "-Command",
            "Get-Printer | ForEach-Object { $_.Name }",
        ])
        .output()
        .await
        .map_err(|e| PrintError::PlatformUnsupported(format!("Failed to query printers: {}", e)))?;

    if !output.status.success() {
        return Err(PrintError::PlatformUnsupported(format!(
            "Failed to query printers: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(parse_printer_names(&String::from_utf8_lossy(&output.stdout)))
}

async fn query_cups_printers() -> Result<Vec<PrinterInfo>> {
    let output = Command::new("lpstat")
        .arg("-a")
        .output()
        .await
        .map_err(|source| PrintError::Launch {
            program: "lpstat".to_string(),
            source,
        })?;

    // lpstat exits non-zero when no destinations exist
    if !output.status.success() {
        debug!(
            "lpstat -a exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }

    Ok(parse_lpstat_accepting(&String::from_utf8_lossy(&output.stdout)))
}

/// `lpstat -a` prints `<name> accepting requests since ...`; the name is the first token.
pub fn parse_lpstat_accepting(output: &str) -> Vec<PrinterInfo> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(|name| PrinterInfo {
            name: name.to_string(),
        })
        .collect()
}

/// One printer name per line (Windows names may contain spaces)
pub fn parse_printer_names(output: &str) -> Vec<PrinterInfo> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|name| PrinterInfo {
            name: name.to_string(),
        })
        .collect()
}
