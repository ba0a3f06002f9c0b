// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod astro_util;
pub mod availability;
pub mod detect_engine;
pub mod error;
pub mod fits_header;
pub mod options;
pub mod solve_engine;
pub mod solver_trait;
pub mod subprocess;
