// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::collections::HashMap;
use std::env;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tempfile::{Builder, TempDir, TempPath};

use crate::astro_util::{FieldCenterKeys, center_options};
use crate::availability::SearchPath;
use crate::error::AstrometryError;
use crate::fits_header::{FitsHeader, HeaderSource};
use crate::options::SolveOptions;
use crate::solver_trait::{ExternalSolver, Invocation, OutputSink, SolveOutcome};
use crate::subprocess::Subprocess;

pub const ASTROMETRY_COMMAND: &str = "solve-field";

// solve-field writes <root>.solved containing this byte when it found a
// solution.
pub const SOLVED_SENTINEL_VALUE: u8 = 1;

#[derive(Clone, Debug)]
pub struct SolverConfig {
    // Where to look for solve-field and image2xy.
    pub search_path: SearchPath,

    // Kill solve-field if it runs longer than this. None: wait indefinitely.
    pub timeout: Option<Duration>,

    // When set (from any thread), the running command is killed.
    pub cancel: Option<Arc<AtomicBool>>,

    // Parent directory for workspaces and output files. None: the system
    // temporary directory.
    pub temp_dir: Option<PathBuf>,
}

impl Default for SolverConfig {
    fn default() -> Self {
        SolverConfig{
            search_path: SearchPath::from_env(),
            timeout: None,
            cancel: None,
            temp_dir: None,
        }
    }
}

impl SolverConfig {
    pub(crate) fn temp_dir(&self) -> PathBuf {
        match &self.temp_dir {
            Some(dir) => dir.clone(),
            None => env::temp_dir(),
        }
    }

    pub(crate) fn invocation<'a>(&'a self, program: &'a Path, args: &'a [OsString],
                                 stdout: &'a OutputSink, stderr: &'a OutputSink)
                                 -> Invocation<'a> {
        Invocation{
            program,
            args,
            stdout,
            stderr,
            timeout: self.timeout,
            cancel: self.cancel.as_deref(),
        }
    }
}

// Splits "dir/m42.fits" into ("m42", ".fits"). The extension is empty when
// there is none.
pub(crate) fn split_file_name(path: &Path) -> Result<(String, String), AstrometryError> {
    let root = match path.file_stem() {
        Some(stem) => stem.to_string_lossy().into_owned(),
        None => {
            return Err(AstrometryError::InvalidInput(
                format!("{:?} does not name a file", path)));
        }
    };
    let ext = match path.extension() {
        Some(ext) => format!(".{}", ext.to_string_lossy()),
        None => String::new(),
    };
    Ok((root, ext))
}

// Reserves a uniquely named file in `dir`. The file is removed when the
// returned TempPath is dropped, unless it is kept.
pub(crate) fn reserve_temp_path(dir: &Path, prefix: &str, suffix: &str)
                                -> Result<TempPath, AstrometryError> {
    let file = Builder::new().prefix(prefix).suffix(suffix).tempfile_in(dir)
        .map_err(|e| AstrometryError::io(
            format!("Error creating temporary file {}*{} in {:?}", prefix, suffix, dir), e))?;
    Ok(file.into_temp_path())
}

/// Whether solve-field reported a solution: the sentinel file exists and its
/// first byte is 1. Missing, unreadable, empty, or any other first byte all
/// mean unsolved.
pub fn read_sentinel(solved_file: &Path) -> bool {
    let mut file = match File::open(solved_file) {
        Ok(file) => file,
        Err(e) => {
            debug!("No sentinel {:?}: {:?}", solved_file, e);
            return false;
        }
    };
    let mut first = [0_u8; 1];
    match file.read(&mut first) {
        Ok(1) => first[0] == SOLVED_SENTINEL_VALUE,
        Ok(_) => {
            debug!("Sentinel {:?} is empty", solved_file);
            false
        },
        Err(e) => {
            debug!("Error reading sentinel {:?}: {:?}", solved_file, e);
            false
        }
    }
}

// Arguments for solve-field. All of its output goes to `workspace` except the
// new FITS file, which goes to `output`:
// --dir: place all output files in the specified directory.
// --no-plots: don't create any plots of the results.
// --new-fits: the new FITS file containing the WCS header.
// --no-fits2fits: don't sanitize FITS files; assume they're already valid.
// --overwrite: overwrite output files if they already exist.
pub fn solve_field_args(input: &Path, workspace: &Path, output: &Path,
                        options: &SolveOptions) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        input.into(),
        "--dir".into(), workspace.into(),
        "--no-plots".into(),
        "--new-fits".into(), output.into(),
        "--no-fits2fits".into(),
        "--overwrite".into(),
    ];
    args.extend(options.to_args());
    args
}

/// Drives solve-field: one isolated workspace per call, interpretation of its
/// `.solved` sentinel, and cleanup on every exit path.
pub struct SolveEngine {
    config: SolverConfig,
    solver: Arc<dyn ExternalSolver>,
}

impl SolveEngine {
    pub fn new(config: SolverConfig) -> Self {
        Self::with_solver(config, Arc::new(Subprocess::new()))
    }

    pub fn with_solver(config: SolverConfig, solver: Arc<dyn ExternalSolver>) -> Self {
        SolveEngine{config, solver}
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn is_available(&self) -> bool {
        self.config.search_path.is_available(ASTROMETRY_COMMAND)
    }

    /// Computes the astrometric solution of a FITS image with solve-field.
    ///
    /// On success returns the path of a new temporary file holding a copy of
    /// `input` with the WCS solution in its header; the caller owns that file.
    /// If solve-field ran but could not solve the field, returns `Unsolved`.
    /// `options` are passed down to solve-field after the fixed arguments.
    ///
    /// Errors:
    ///   ToolNotInstalled: solve-field is not in the search path. Nothing is
    ///     run.
    ///   ProcessError: solve-field exited with nonzero status.
    ///   Timeout, Cancelled: solve-field was killed.
    ///   Io: the workspace or output file could not be created, or
    ///     solve-field could not be launched.
    pub fn solve_field(&self, input: &Path, options: &SolveOptions,
                       stdout: OutputSink, stderr: OutputSink)
                       -> Result<SolveOutcome, AstrometryError> {
        let program = self.config.search_path.locate(ASTROMETRY_COMMAND)?;
        let (root, ext) = split_file_name(input)?;
        let temp_dir = self.config.temp_dir();

        // Both guards remove their target when dropped, so every early
        // return (and unwinding) below cleans up.
        let workspace = Builder::new()
            .prefix(&format!("{}_", root))
            .suffix("_astrometry.net")
            .tempdir_in(&temp_dir)
            .map_err(|e| AstrometryError::io(
                format!("Error creating workspace in {:?}", temp_dir), e))?;
        let output = reserve_temp_path(&temp_dir, &format!("{}_astrometry_", root), &ext)?;
        // Keep only the name, so that a solve-field which fails to write its
        // new FITS file leaves no empty file posing as the solution. The
        // guard still removes whatever solve-field leaves if we don't solve.
        fs::remove_file(&output).map_err(|e| AstrometryError::io(
            format!("Error removing placeholder {:?}", output), e))?;

        let solved_file = workspace.path().join(format!("{}.solved", root));
        let args = solve_field_args(input, workspace.path(), &output, options);

        let start = Instant::now();
        info!("Running {} on {:?}", ASTROMETRY_COMMAND, input);
        let result = self.run_solve_field(&program, &args, &solved_file, &stdout, &stderr);
        Self::remove_workspace(workspace);

        match result {
            Ok(true) => {
                if !output.exists() {
                    warn!("{} reported a solution but did not write {:?}",
                          ASTROMETRY_COMMAND, output);
                }
                let output = output.keep().map_err(|e| AstrometryError::io(
                    "Error keeping solve-field output", e.error))?;
                info!("Solved {:?} in {:?}; WCS in {:?}", input, start.elapsed(), output);
                Ok(SolveOutcome::Solved{output})
            },
            Ok(false) => {
                info!("{:?}: could not solve field ({:?})", input, start.elapsed());
                Ok(SolveOutcome::Unsolved{input: input.to_path_buf()})
            },
            Err(e) => Err(e),
        }
    }

    fn run_solve_field(&self, program: &Path, args: &[OsString], solved_file: &Path,
                       stdout: &OutputSink, stderr: &OutputSink)
                       -> Result<bool, AstrometryError> {
        let invocation = self.config.invocation(program, args, stdout, stderr);
        let exit_code = self.solver.run(&invocation)?;
        if exit_code != Some(0) {
            // Not the same as unsolved: a bad invocation or a crash.
            return Err(AstrometryError::ProcessError{
                exit_code,
                command: program.display().to_string(),
                args: args.iter().map(|a| a.to_string_lossy().into_owned()).collect(),
            });
        }
        Ok(read_sentinel(solved_file))
    }

    // Failures are logged, not returned.
    fn remove_workspace(workspace: TempDir) {
        let path = workspace.path().to_path_buf();
        match workspace.close() {
            Ok(()) => debug!("Removed workspace {:?}", path),
            Err(e) => warn!("Error removing workspace {:?}: {:?}", path, e),
        }
    }

    /// Convenience wrapper that solves without any tweaking: solve-field runs
    /// silently, and if `keys` is given the search is restricted to
    /// `keys.radius` degrees around the field center found in `header`. A
    /// missing or unintelligible center is logged and the solve goes blind.
    pub fn solve(&self, input: &Path, header: &dyn HeaderSource,
                 keys: Option<&FieldCenterKeys>)
                 -> Result<SolveOutcome, AstrometryError> {
        let options = match keys {
            Some(keys) => center_options(header, keys),
            None => SolveOptions::new(),
        };
        self.solve_field(input, &options, OutputSink::Null, OutputSink::Null)
    }

    /// Like `solve()`, reading the field center from `input`'s own primary
    /// header.
    pub fn solve_fits(&self, input: &Path, keys: Option<&FieldCenterKeys>)
                      -> Result<SolveOutcome, AstrometryError> {
        // Check before reading the header so a missing tool is reported
        // first.
        self.config.search_path.locate(ASTROMETRY_COMMAND)?;
        match keys {
            Some(keys) => {
                let header = FitsHeader::read_from(input)?;
                self.solve(input, &header, Some(keys))
            },
            None => self.solve(input, &HashMap::<String, String>::new(), None),
        }
    }
}
