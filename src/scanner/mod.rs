//! Compliance Scanner Integration
//!
//! The scanner's command-line surface changed across releases. The
//! [`probe`] reads its help text to pick an output syntax, and the
//! [`invoker`] runs it with one retry on the alternate syntax.

pub mod invoker;
pub mod probe;

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::ScanError;

pub use invoker::{ScanInvoker, ScanRequest};
pub use probe::CompatibilityProbe;

/// Help-text marker of current scanner releases
pub const MODERN_MARKER: &str = "--output-formats";
/// Help-text marker of older scanner releases
pub const LEGACY_MARKER: &str = "--output-modes";

/// Output-format dialect of the installed scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputSyntax {
    Modern,
    Legacy,
    /// No output-format arguments at all
    None,
}

impl OutputSyntax {
    /// Arguments selecting the report formats
    pub fn tokens(&self) -> &'static [&'static str] {
        match self {
            OutputSyntax::Modern => &[MODERN_MARKER, "csv", "html", "json-ocsf"],
            OutputSyntax::Legacy => &[LEGACY_MARKER, "csv", "html", "json"],
            OutputSyntax::None => &[],
        }
    }

    /// Syntax used for the retry after a failed attempt
    pub fn alternate(&self) -> OutputSyntax {
        match self {
            OutputSyntax::Modern => OutputSyntax::Legacy,
            OutputSyntax::Legacy => OutputSyntax::Modern,
            OutputSyntax::None => OutputSyntax::Modern,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputSyntax::Modern => "modern",
            OutputSyntax::Legacy => "legacy",
            OutputSyntax::None => "none",
        }
    }
}

impl fmt::Display for OutputSyntax {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanOutcome {
    Success,
    /// Both attempts exited non-zero; partial reports may exist
    PartialFailure,
    /// The scanner could not be started
    HardFailure,
}

impl fmt::Display for ScanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ScanOutcome::Success => "success",
            ScanOutcome::PartialFailure => "partial failure",
            ScanOutcome::HardFailure => "hard failure",
        })
    }
}

/// One scanner execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanAttempt {
    pub syntax: OutputSyntax,
    /// `None` when the process never started or was killed by a signal
    pub exit_code: Option<i32>,
    pub command: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub outcome: ScanOutcome,
    pub attempts: Vec<ScanAttempt>,
}

impl ScanReport {
    pub fn retries(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }

    /// Syntax of the last attempt made
    pub fn final_syntax(&self) -> Option<OutputSyntax> {
        self.attempts.last().map(|a| a.syntax)
    }
}

/// Resolve the scanner binary on `PATH`
pub fn locate_scanner(binary: &str) -> Result<PathBuf, ScanError> {
    which::which(binary).map_err(|e| ScanError::ScannerNotFound(format!("{}: {}", binary, e)))
}
