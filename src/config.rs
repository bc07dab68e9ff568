use crate::errors::{PrintError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable pointing at the print utility (directory or full path)
pub const UTIL_PATH_ENV: &str = "UTIL_PATH";
pub const MAX_CONCURRENT_ENV: &str = "PRINT_MAX_CONCURRENT";
pub const TIMEOUT_SECS_ENV: &str = "PRINT_TIMEOUT_SECS";
pub const CLEANUP_INTERVAL_ENV: &str = "PRINT_CLEANUP_INTERVAL_MS";

pub const DEFAULT_PRINT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Name of the external print utility for the current platform.
pub fn util_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "PDFtoPrinter_m.exe"
    } else {
        "lp"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PrinterServiceConfig {
    /// Upper bound of print utility processes running at once
    pub max_concurrent_prints: usize,
    pub print_timeout_secs: u64,
    pub cleanup_interval_ms: u64,
    /// Overrides utility lookup. A directory is joined with the utility name.
    pub util_path: Option<PathBuf>,
}

impl Default for PrinterServiceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_prints: 1,
            print_timeout_secs: DEFAULT_PRINT_TIMEOUT.as_secs(),
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL.as_millis() as u64,
            util_path: None,
        }
    }
}

impl PrinterServiceConfig {
    /// Load configuration from a JSON file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build configuration from defaults overlaid with environment variables.
    ///
    /// Unparseable numeric values are rejected rather than silently ignored.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var(UTIL_PATH_ENV) {
            if !dir.trim().is_empty() {
                config.util_path = Some(PathBuf::from(dir));
            }
        }
        if let Some(max) = parse_env::<usize>(MAX_CONCURRENT_ENV)? {
            config.max_concurrent_prints = max;
        }
        if let Some(secs) = parse_env::<u64>(TIMEOUT_SECS_ENV)? {
            config.print_timeout_secs = secs;
        }
        if let Some(ms) = parse_env::<u64>(CLEANUP_INTERVAL_ENV)? {
            config.cleanup_interval_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_prints == 0 {
            return Err(PrintError::Config(
                "max_concurrent_prints must be greater than 0".to_string(),
            ));
        }
        if self.print_timeout_secs == 0 {
            return Err(PrintError::Config(
                "print_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.cleanup_interval_ms == 0 {
            return Err(PrintError::Config(
                "cleanup_interval_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn print_timeout(&self) -> Duration {
        Duration::from_secs(self.print_timeout_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Locate the print utility.
    ///
    /// Lookup order: configured override, then the directory of the running
    /// executable on Windows or `/usr/bin` elsewhere, then the bare name
    /// (resolved through `PATH` at spawn time).
    pub fn resolve_util_path(&self) -> PathBuf {
        let name = util_name();

        if let Some(base) = &self.util_path {
            let resolved = if base.is_dir() {
                base.join(name)
            } else {
                base.clone()
            };
            debug!("Using configured print utility: {}", resolved.display());
            return resolved;
        }

        let candidate = if cfg!(target_os = "windows") {
            std::env::current_exe()
                .ok()
                .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
        } else {
            Some(Path::new("/usr/bin").join(name))
        };

        candidate
            .filter(|path| path.exists())
            .unwrap_or_else(|| PathBuf::from(name))
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| PrintError::Config(format!("{} has invalid value: {}", key, value))),
        _ => Ok(None),
    }
}
