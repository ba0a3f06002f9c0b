// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::info;

use crate::error::AstrometryError;
use crate::solve_engine::{SolverConfig, reserve_temp_path, split_file_name};
use crate::solver_trait::{ExternalSolver, OutputSink};
use crate::subprocess::Subprocess;

pub const SOURCE_EXTRACTION_COMMAND: &str = "image2xy";

/// Detects astronomical objects with Astrometry.net's image2xy, which writes
/// X, Y and FLUX of each source to a FITS binary table.
pub struct DetectEngine {
    config: SolverConfig,
    solver: Arc<dyn ExternalSolver>,
}

impl DetectEngine {
    pub fn new(config: SolverConfig) -> Self {
        Self::with_solver(config, Arc::new(Subprocess::new()))
    }

    pub fn with_solver(config: SolverConfig, solver: Arc<dyn ExternalSolver>) -> Self {
        DetectEngine{config, solver}
    }

    pub fn is_available(&self) -> bool {
        self.config.search_path.is_available(SOURCE_EXTRACTION_COMMAND)
    }

    /// Runs `image2xy <input> -o <output>` and returns the path of the new
    /// sources table, which the caller owns. Success is solely a zero exit;
    /// otherwise ProcessError, and no table is left behind.
    pub fn image2xy(&self, input: &Path) -> Result<PathBuf, AstrometryError> {
        let program = self.config.search_path.locate(SOURCE_EXTRACTION_COMMAND)?;
        let (root, _) = split_file_name(input)?;
        let output = reserve_temp_path(&self.config.temp_dir(),
                                       &format!("{}_sources_", root), ".fits")?;
        // image2xy will not write over an existing file; keep only the name.
        // The guard still removes whatever image2xy leaves if we fail.
        fs::remove_file(&output).map_err(|e| AstrometryError::io(
            format!("Error removing placeholder {:?}", output), e))?;

        let args: Vec<OsString> = vec![input.into(), "-o".into(), output.as_os_str().into()];
        let stdout = OutputSink::Log;
        let stderr = OutputSink::Log;
        let invocation = self.config.invocation(&program, &args, &stdout, &stderr);
        info!("Running {} on {:?}", SOURCE_EXTRACTION_COMMAND, input);
        let exit_code = self.solver.run(&invocation)?;
        if exit_code != Some(0) {
            return Err(AstrometryError::ProcessError{
                exit_code,
                command: program.display().to_string(),
                args: args.iter().map(|a| a.to_string_lossy().into_owned()).collect(),
            });
        }
        let output = output.keep().map_err(|e| AstrometryError::io(
            "Error keeping image2xy output", e.error))?;
        info!("Sources of {:?} in {:?}", input, output);
        Ok(output)
    }

    /// Detects sources in a FITS image; returns the FITS table written by
    /// image2xy. Conversion to other formats is left to the caller.
    pub fn find_sources(&self, input: &Path) -> Result<PathBuf, AstrometryError> {
        self.image2xy(input)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use crate::solve_engine::tests::{FakeSolver, Sandbox};
    use crate::solver_trait::Invocation;
    use super::*;

    // Writes the table named by -o, like image2xy, and exits with the given
    // code.
    struct FakeImage2xy {
        exit_code: Option<i32>,
        seen_args: Mutex<Vec<String>>,
    }

    impl ExternalSolver for FakeImage2xy {
        fn run(&self, invocation: &Invocation) -> Result<Option<i32>, AstrometryError> {
            let args: Vec<String> = invocation.args.iter()
                .map(|a| a.to_string_lossy().into_owned()).collect();
            let output = FakeSolver::arg_after(&args, "-o").unwrap();
            // The real command refuses to overwrite.
            assert!(!output.exists());
            fs::write(&output, b"XTENSION= 'BINTABLE'").unwrap();
            *self.seen_args.lock().unwrap() = args;
            Ok(self.exit_code)
        }
    }

    #[test]
    fn test_image2xy() {
        let sandbox = Sandbox::new(&["image2xy"]);
        let fake = Arc::new(FakeImage2xy{exit_code: Some(0),
                                         seen_args: Mutex::new(vec![])});
        let engine = DetectEngine::with_solver(sandbox.config(), fake.clone());
        assert!(engine.is_available());
        let input = sandbox.input("m42.fits");

        let table = engine.find_sources(&input).unwrap();
        assert!(table.exists());
        let name = table.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("m42_sources_"), "{}", name);
        assert!(name.ends_with(".fits"), "{}", name);
        let args = fake.seen_args.lock().unwrap().clone();
        assert_eq!(args, [input.to_string_lossy().into_owned(), "-o".to_string(),
                          table.to_string_lossy().into_owned()]);
    }

    #[test]
    fn test_image2xy_failure() {
        let sandbox = Sandbox::new(&["image2xy"]);
        let fake = Arc::new(FakeImage2xy{exit_code: Some(2),
                                         seen_args: Mutex::new(vec![])});
        let engine = DetectEngine::with_solver(sandbox.config(), fake);
        let input = sandbox.input("m42.fits");
        match engine.image2xy(&input) {
            Err(AstrometryError::ProcessError{exit_code, args, ..}) => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(args[1], "-o");
            },
            other => panic!("unexpected {:?}", other),
        }
        // The partial table is removed.
        assert!(sandbox.tmp_entries().is_empty());
    }

    #[test]
    fn test_image2xy_not_installed() {
        // solve-field alone is not enough.
        let sandbox = Sandbox::new(&["solve-field"]);
        let fake = FakeSolver::new(Some(0), None);
        let engine = DetectEngine::with_solver(sandbox.config(), fake.clone());
        assert!(!engine.is_available());
        let input = sandbox.input("m42.fits");
        assert!(matches!(engine.image2xy(&input),
                         Err(AstrometryError::ToolNotInstalled{..})));
        assert_eq!(fake.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_image2xy_subprocess() {
        let sandbox = Sandbox::new(&[]);
        sandbox.install("image2xy", r#"[ "$2" = "-o" ] || exit 3
echo "found 12 sources"
printf 'table' > "$3""#);
        let engine = DetectEngine::new(sandbox.config());
        let input = sandbox.input("m42.fits");
        let table = engine.image2xy(&input).unwrap();
        assert_eq!(fs::read_to_string(&table).unwrap(), "table");
    }
}
