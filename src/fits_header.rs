// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use fitsio::FitsFile;
use fitsio::hdu::FitsHdu;
use log::debug;

use crate::error::AstrometryError;

/// Keyword lookup, e.g. against a FITS header.
pub trait HeaderSource {
    // Returns the keyword's value as a string, None if it is absent.
    fn lookup(&self, keyword: &str) -> Option<String>;
}

/// The primary header of an open FITS file. Keywords are read on demand.
pub struct FitsHeader {
    path: PathBuf,
    // Reading a key needs the file mutably.
    fptr: RefCell<FitsFile>,
    hdu: FitsHdu,
}

impl FitsHeader {
    pub fn read_from(path: &Path) -> Result<Self, AstrometryError> {
        let fits_error = |source| AstrometryError::Fits{path: path.to_path_buf(), source};
        let mut fptr = FitsFile::open(path).map_err(fits_error)?;
        let hdu = fptr.primary_hdu().map_err(fits_error)?;
        Ok(FitsHeader{path: path.to_path_buf(), fptr: RefCell::new(fptr), hdu})
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The keyword's value with any string quoting removed; non-string
    /// values come back as written, e.g. "-5.391" or "T".
    pub fn get(&self, keyword: &str) -> Option<String> {
        let mut fptr = self.fptr.borrow_mut();
        match self.hdu.read_key::<String>(&mut fptr, keyword) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("{:?}: no {}: {}", self.path, keyword, e);
                None
            }
        }
    }
}

impl HeaderSource for FitsHeader {
    fn lookup(&self, keyword: &str) -> Option<String> {
        self.get(keyword)
    }
}

impl HeaderSource for HashMap<String, String> {
    fn lookup(&self, keyword: &str) -> Option<String> {
        self.get(keyword).cloned()
    }
}
