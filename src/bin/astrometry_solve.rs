// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use canonical_error::{CanonicalError, CanonicalErrorCode};
use clap::Parser;
use log::{error, info, warn};
use tracing_subscriber::EnvFilter;

use astrometry_driver::astro_util::{FieldCenterKeys, center_options};
use astrometry_driver::availability::SearchPath;
use astrometry_driver::detect_engine::DetectEngine;
use astrometry_driver::error::AstrometryError;
use astrometry_driver::fits_header::FitsHeader;
use astrometry_driver::options::{SolveOption, SolveOptions};
use astrometry_driver::solve_engine::{ASTROMETRY_COMMAND, SolveEngine, SolverConfig};
use astrometry_driver::solver_trait::{OutputSink, SolveOutcome};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
/// Plate-solves a FITS image with a local Astrometry.net installation and
/// prints the path of a copy carrying the WCS solution.
struct Args {
    /// FITS image to solve.
    input: PathBuf,

    /// Extra solve-field option as NAME or NAME=VALUE, e.g. `-o cpulimit=30`
    /// or `-o z=2`. May be repeated; passed down in order.
    #[arg(short = 'o', long = "option")]
    options: Vec<SolveOption>,

    /// Kill solve-field if it runs longer than this many seconds.
    #[arg(long, value_parser = parse_duration)]
    timeout: Option<Duration>,

    /// Directories to search for the Astrometry.net commands, PATH-style.
    /// Defaults to PATH.
    #[arg(long)]
    path: Option<String>,

    /// Header keyword holding the field center's right ascension.
    #[arg(long, default_value = "RA")]
    ra_key: String,

    /// Header keyword holding the field center's declination.
    #[arg(long, default_value = "DEC")]
    dec_key: String,

    /// Search radius around the field center, degrees.
    #[arg(long, default_value = "1.0")]
    radius: f64,

    /// Ignore any field center in the header.
    #[arg(long)]
    blind: bool,

    /// Discard solve-field's output instead of showing it.
    #[arg(long)]
    quiet: bool,

    /// Detect sources with image2xy instead of solving.
    #[arg(long)]
    sources: bool,
}

fn parse_duration(arg: &str) -> Result<Duration, String> {
    let seconds: f64 = arg.parse().map_err(|e| format!("{}", e))?;
    if !(seconds.is_finite() && seconds >= 0.0) {
        return Err(format!("{} is not a number of seconds", arg));
    }
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("{}: {}", arg, e))
}

const EXIT_UNSOLVED: u8 = 2;

fn exit_code_for(canonical_error: &CanonicalError) -> u8 {
    match canonical_error.code {
        CanonicalErrorCode::FailedPrecondition => 3,  // Not installed.
        CanonicalErrorCode::DeadlineExceeded => 4,
        CanonicalErrorCode::InvalidArgument => 64,
        _ => 1,
    }
}

fn run(args: &Args) -> Result<Option<PathBuf>, AstrometryError> {
    let config = SolverConfig{
        search_path: match &args.path {
            Some(path) => SearchPath::from_path_var(path),
            None => SearchPath::from_env(),
        },
        timeout: args.timeout,
        ..Default::default()
    };

    if args.sources {
        return DetectEngine::new(config).find_sources(&args.input).map(Some);
    }

    let engine = SolveEngine::new(config);
    // solve_field() checks this too, but only after we've read the header.
    engine.config().search_path.locate(ASTROMETRY_COMMAND)?;
    let mut options = SolveOptions::new();
    if !args.blind {
        let header = FitsHeader::read_from(&args.input)?;
        let keys = FieldCenterKeys{
            ra_key: args.ra_key.clone(),
            dec_key: args.dec_key.clone(),
            radius: args.radius,
        };
        options.extend(&center_options(&header, &keys));
    }
    options.extend(&args.options.iter().cloned().collect::<SolveOptions>());

    let (stdout, stderr) = if args.quiet {
        (OutputSink::Null, OutputSink::Null)
    } else {
        (OutputSink::Inherit, OutputSink::Inherit)
    };
    match engine.solve_field(&args.input, &options, stdout, stderr)? {
        SolveOutcome::Solved{output} => Ok(Some(output)),
        SolveOutcome::Unsolved{input} => {
            warn!("{:?}: could not solve field", input);
            Ok(None)
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env()
                         .unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    info!("Processing {:?}", args.input);

    match run(&args) {
        Ok(Some(path)) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        },
        Ok(None) => ExitCode::from(EXIT_UNSOLVED),
        Err(e) => {
            if let Some(command_line) = e.command_line() {
                error!("Failed command: {}", command_line);
            }
            let canonical_error: CanonicalError = e.into();
            error!("{}", canonical_error.message);
            ExitCode::from(exit_code_for(&canonical_error))
        }
    }
}
