// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::time::Duration;

use canonical_error::{CanonicalError, not_found_error};

use crate::error::AstrometryError;

/// Where a child process's stdout or stderr goes.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum OutputSink {
    // Share the parent's stream, i.e. visible to the user.
    #[default]
    Inherit,
    // Discard.
    Null,
    // Append to the given file, creating it if needed.
    File(PathBuf),
    // Forward each line to our log: stdout at info, stderr at warn.
    Log,
}

/// A single blocking run of an external command.
#[derive(Debug)]
pub struct Invocation<'a> {
    pub program: &'a Path,
    pub args: &'a [OsString],
    pub stdout: &'a OutputSink,
    pub stderr: &'a OutputSink,

    // If the command runs longer than this it is killed and Timeout is
    // returned. None means wait indefinitely.
    pub timeout: Option<Duration>,

    // Polled while the command runs; when set the command is killed and
    // Cancelled is returned.
    pub cancel: Option<&'a AtomicBool>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SolveOutcome {
    // Path of the new FITS file carrying the WCS solution. The caller owns
    // it and is responsible for removing it.
    Solved { output: PathBuf },

    // solve-field ran to completion but could not solve the field.
    Unsolved { input: PathBuf },
}

impl SolveOutcome {
    pub fn is_solved(&self) -> bool {
        matches!(self, SolveOutcome::Solved{..})
    }

    pub fn output(&self) -> Option<&Path> {
        match self {
            SolveOutcome::Solved{output} => Some(output),
            SolveOutcome::Unsolved{..} => None,
        }
    }

    // For callers that treat an unsolved field as an error.
    pub fn into_result(self) -> Result<PathBuf, CanonicalError> {
        match self {
            SolveOutcome::Solved{output} => Ok(output),
            SolveOutcome::Unsolved{input} => Err(not_found_error(
                format!("{}: could not solve field", input.display()).as_str())),
        }
    }
}

// Runs Astrometry.net commands. The production implementation is
// `subprocess::Subprocess`; tests substitute fakes that emulate the command's
// filesystem side effects.
// Returns the command's exit code, None if it was terminated by a signal.
// Errors:
//   Io: the command could not be launched or waited upon.
//   Timeout: invocation.timeout was reached; the command was killed.
//   Cancelled: invocation.cancel was set; the command was killed.
pub trait ExternalSolver: Send + Sync {
    // Note: this is a blocking call; a blind solve-field run can take many
    // minutes.
    fn run(&self, invocation: &Invocation) -> Result<Option<i32>, AstrometryError>;
}

#[cfg(test)]
mod tests {
    use canonical_error::CanonicalErrorCode;
    use super::*;

    #[test]
    fn test_solve_outcome() {
        let solved = SolveOutcome::Solved{output: PathBuf::from("/tmp/m42_astrometry_x.fits")};
        assert!(solved.is_solved());
        assert_eq!(solved.output(), Some(Path::new("/tmp/m42_astrometry_x.fits")));
        assert_eq!(solved.into_result().unwrap(),
                   PathBuf::from("/tmp/m42_astrometry_x.fits"));

        let unsolved = SolveOutcome::Unsolved{input: PathBuf::from("m42.fits")};
        assert!(!unsolved.is_solved());
        assert_eq!(unsolved.output(), None);
        let e = unsolved.into_result().unwrap_err();
        assert!(e.code == CanonicalErrorCode::NotFound);
        assert_eq!(e.message, "m42.fits: could not solve field");
    }
}
