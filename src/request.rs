use crate::errors::{PrintError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Where the document bytes come from
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PrintSource {
    File(PathBuf),
    Stream(Vec<u8>),
}

/// A single print job for one printer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PrintRequest {
    pub printer_name: String,
    pub source: PrintSource,
    /// Page range in the utility's syntax, e.g. `1-3,5`
    pub pages: Option<String>,
    pub copies: Option<u32>,
    /// Job title / focus label passed through to the utility
    pub focus: Option<String>,
}

impl PrintRequest {
    pub fn from_file(printer_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::new(printer_name, PrintSource::File(path.into()))
    }

    pub fn from_stream(printer_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::new(printer_name, PrintSource::Stream(bytes))
    }

    fn new(printer_name: impl Into<String>, source: PrintSource) -> Self {
        Self {
            printer_name: printer_name.into(),
            source,
            pages: None,
            copies: None,
            focus: None,
        }
    }

    pub fn with_pages(mut self, pages: impl Into<String>) -> Self {
        self.pages = Some(pages.into());
        self
    }

    pub fn with_copies(mut self, copies: u32) -> Self {
        self.copies = Some(copies);
        self
    }

    pub fn with_focus(mut self, focus: impl Into<String>) -> Self {
        self.focus = Some(focus.into());
        self
    }

    /// Path of the document when the source is a file
    pub fn file_path(&self) -> Option<&Path> {
        match &self.source {
            PrintSource::File(path) => Some(path),
            PrintSource::Stream(_) => None,
        }
    }

    /// Field-level checks that need no filesystem access.
    ///
    /// See [`PrintRequest::check_source`] for the file existence check.
    pub fn validate(&self) -> Result<()> {
        if self.printer_name.trim().is_empty() {
            return Err(PrintError::Validation(
                "printer name must not be empty".to_string(),
            ));
        }

        match &self.source {
            PrintSource::File(path) if path.as_os_str().is_empty() => {
                return Err(PrintError::Validation("file path must not be empty".to_string()));
            }
            PrintSource::Stream(bytes) if bytes.is_empty() => {
                return Err(PrintError::Validation("print stream is empty".to_string()));
            }
            _ => {}
        }

        if let Some(pages) = &self.pages {
            if pages.trim().is_empty() {
                return Err(PrintError::Validation("page range must not be blank".to_string()));
            }
        }

        if self.copies == Some(0) {
            return Err(PrintError::Validation(
                "copies must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Fails when a file source does not point at an existing file
    pub fn check_source(&self) -> Result<()> {
        match self.file_path() {
            Some(path) if !path.is_file() => Err(PrintError::Validation(format!(
                "File does not exist: {}",
                path.display()
            ))),
            _ => Ok(()),
        }
    }
}
