// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use log::debug;

use crate::error::AstrometryError;

/// The directories searched for Astrometry.net executables, in order. Usually
/// built from the PATH environment variable, but can be given explicitly so
/// that availability checks do not depend on process-wide state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
}

impl SearchPath {
    pub fn new<I, P>(dirs: I) -> Self
    where I: IntoIterator<Item = P>, P: Into<PathBuf>
    {
        SearchPath{dirs: dirs.into_iter().map(Into::into).collect()}
    }

    /// Parses a PATH-style list. An empty entry denotes the current
    /// directory, as it does for the shell.
    pub fn from_path_var(path_var: impl AsRef<OsStr>) -> Self {
        SearchPath{
            dirs: env::split_paths(path_var.as_ref())
                .map(|dir| if dir.as_os_str().is_empty() {
                    PathBuf::from(".")
                } else {
                    dir
                })
                .collect()
        }
    }

    /// The process's PATH. Empty if PATH is unset.
    pub fn from_env() -> Self {
        match env::var_os("PATH") {
            Some(path_var) => Self::from_path_var(path_var),
            None => SearchPath::default(),
        }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_available(&self, command: &str) -> bool {
        self.find(command).is_some()
    }

    /// Returns the full path of the first executable named `command`, or
    /// ToolNotInstalled listing every directory that was searched.
    pub fn locate(&self, command: &str) -> Result<PathBuf, AstrometryError> {
        match self.find(command) {
            Some(path) => Ok(path),
            None => Err(AstrometryError::ToolNotInstalled{
                command: command.to_string(),
                searched: self.dirs.clone(),
            }),
        }
    }

    fn find(&self, command: &str) -> Option<PathBuf> {
        // One directory at a time, so a directory name containing the PATH
        // separator is still searched as-is.
        for dir in &self.dirs {
            if let Ok(path) = which::which_in(command, Some(dir), Path::new(".")) {
                debug!("Found {} at {:?}", command, path);
                return Some(path);
            }
        }
        debug!("{} not found in {:?}", command, self.dirs);
        None
    }
}
