// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use canonical_error::{CanonicalError, deadline_exceeded_error,
                      failed_precondition_error, internal_error,
                      invalid_argument_error, unknown_error};
use thiserror::Error;

/// Failures of an Astrometry.net invocation. Note that a field that could not
/// be solved is not an error; see `SolveOutcome::Unsolved`.
#[derive(Debug, Error)]
pub enum AstrometryError {
    /// The command was not found in any directory of the search path.
    #[error("Astrometry.net command '{command}' could not be found.\n\n\
             Download, build and install Astrometry.net from \
             http://astrometry.net/ and make sure its commands (solve-field, \
             image2xy, etc.) are in one of the searched directories:\n{}",
            format_searched(.searched))]
    ToolNotInstalled {
        command: String,
        searched: Vec<PathBuf>,
    },

    /// The command exited with a nonzero status. `exit_code` is None if it
    /// was terminated by a signal.
    #[error("{} exited with {}",
            command_line(.command, .args), format_exit_code(.exit_code))]
    ProcessError {
        exit_code: Option<i32>,
        command: String,
        args: Vec<String>,
    },

    #[error("{command} did not finish within {timeout:?} and was killed")]
    Timeout {
        command: String,
        timeout: Duration,
    },

    #[error("{command} was cancelled")]
    Cancelled {
        command: String,
    },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    /// The file could not be opened or read as FITS.
    #[error("Error reading FITS file {path:?}: {source}")]
    Fits {
        path: PathBuf,
        #[source]
        source: fitsio::errors::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl AstrometryError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        AstrometryError::Io{context: context.into(), source}
    }

    /// The full command line of a failed process, for diagnostics.
    pub fn command_line(&self) -> Option<String> {
        match self {
            AstrometryError::ProcessError{command, args, ..} =>
                Some(command_line(command, args)),
            _ => None,
        }
    }
}

fn format_searched(searched: &[PathBuf]) -> String {
    if searched.is_empty() {
        return "    (search path is empty)".to_string();
    }
    searched.iter()
        .map(|dir| format!("    {}", dir.display()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_exit_code(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("status {}", code),
        None => "no status (terminated by signal)".to_string(),
    }
}

fn command_line(command: &str, args: &[String]) -> String {
    let mut line = command.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }
    line
}

// Collapses our error taxonomy onto canonical codes for callers that speak
// CanonicalError.
impl From<AstrometryError> for CanonicalError {
    fn from(error: AstrometryError) -> Self {
        let message = error.to_string();
        match error {
            AstrometryError::ToolNotInstalled{..} =>
                failed_precondition_error(message.as_str()),
            AstrometryError::ProcessError{..} =>
                internal_error(message.as_str()),
            AstrometryError::Timeout{..} | AstrometryError::Cancelled{..} =>
                deadline_exceeded_error(message.as_str()),
            AstrometryError::Io{..} =>
                unknown_error(message.as_str()),
            AstrometryError::Fits{..} | AstrometryError::InvalidInput(_) =>
                invalid_argument_error(message.as_str()),
        }
    }
}
