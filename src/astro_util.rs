// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use astro::angle::{deg_frm_dms, deg_frm_hms};
use log::{info, warn};

use crate::fits_header::HeaderSource;
use crate::options::SolveOptions;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SkyCoord {
    // Degrees.
    pub ra: f64,
    pub dec: f64,
}

/// Which header keywords hold the approximate field center, and how far
/// (degrees) around it solve-field should search.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldCenterKeys {
    pub ra_key: String,
    pub dec_key: String,
    pub radius: f64,
}

impl Default for FieldCenterKeys {
    fn default() -> Self {
        FieldCenterKeys{
            ra_key: "RA".to_string(),
            dec_key: "DEC".to_string(),
            radius: 1.0,
        }
    }
}

// Splits "HH:MM:SS.s", "HH MM SS.s" and "12h30m00s"-style values into up to
// three numeric fields. Returns None for anything else.
fn sexagesimal_fields(s: &str) -> Option<(i64, i64, f64)> {
    let fields: Vec<&str> = s
        .split(|c: char| c == ':' || c.is_whitespace() ||
               matches!(c, 'h' | 'd' | 'm' | 's' | '\'' | '"' | '°'))
        .filter(|f| !f.is_empty())
        .collect();
    if fields.is_empty() || fields.len() > 3 {
        return None;
    }
    let whole: i64 = fields[0].parse().ok()?;
    let minutes: i64 = match fields.get(1) {
        Some(f) => f.parse().ok()?,
        None => 0,
    };
    let seconds: f64 = match fields.get(2) {
        Some(f) => f.parse().ok()?,
        None => 0.0,
    };
    if whole < 0 || !(0..60).contains(&minutes) ||
        !(0.0..60.0).contains(&seconds)
    {
        return None;
    }
    Some((whole, minutes, seconds))
}

/// Parses right ascension in sexagesimal hours, e.g. "05:35:17.3".
/// Returns degrees in [0, 360).
pub fn parse_ra_hms(s: &str) -> Option<f64> {
    let (hours, minutes, seconds) = sexagesimal_fields(s.trim())?;
    let ra = deg_frm_hms(hours, minutes, seconds);
    if (0.0..360.0).contains(&ra) { Some(ra) } else { None }
}

/// Parses declination in sexagesimal degrees, e.g. "-05:23:28". The sign
/// applies to the whole value, so "-00:30:00" is -0.5. Returns degrees in
/// [-90, 90].
pub fn parse_dec_dms(s: &str) -> Option<f64> {
    let s = s.trim();
    let (negative, unsigned) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s.strip_prefix('+').unwrap_or(s)),
    };
    let (degrees, minutes, seconds) = sexagesimal_fields(unsigned)?;
    let dec = deg_frm_dms(degrees, minutes, seconds);
    if dec > 90.0 {
        return None;
    }
    Some(if negative { -dec } else { dec })
}

fn parse_decimal(s: &str) -> Option<f64> {
    let value: f64 = s.trim().parse().ok()?;
    if value.is_finite() { Some(value) } else { None }
}

/// Interprets a pair of header values as a celestial position. If both are
/// plain decimal numbers they are taken as degrees; otherwise RA is
/// sexagesimal hours and Dec sexagesimal degrees.
pub fn parse_coordinates(ra: &str, dec: &str) -> Option<SkyCoord> {
    let (ra, dec) = match (parse_decimal(ra), parse_decimal(dec)) {
        (Some(ra), Some(dec)) => (ra, dec),
        _ => (parse_ra_hms(ra)?, parse_dec_dms(dec)?),
    };
    if !(0.0..360.0).contains(&ra) || !(-90.0..=90.0).contains(&dec) {
        return None;
    }
    Some(SkyCoord{ra, dec})
}

/// Builds the ra/dec/radius options that restrict solve-field's search to
/// the neighborhood of the field center recorded in the header. If the
/// center cannot be determined the options are empty and the solve will be
/// blind.
pub fn center_options(header: &dyn HeaderSource, keys: &FieldCenterKeys)
                      -> SolveOptions {
    info!("Figuring out field center coordinates");
    let ra = header.lookup(&keys.ra_key);
    let dec = header.lookup(&keys.dec_key);
    let coord = match (&ra, &dec) {
        (Some(ra), Some(dec)) => parse_coordinates(ra, dec),
        _ => None,
    };
    match coord {
        Some(coord) => {
            info!("Field center ra={} dec={} radius={}",
                  coord.ra, coord.dec, keys.radius);
            SolveOptions::new()
                .with_value("ra", coord.ra)
                .with_value("dec", coord.dec)
                .with_value("radius", keys.radius)
        },
        None => {
            warn!("Cannot understand coordinates in header ({}={:?}, {}={:?})",
                  keys.ra_key, ra, keys.dec_key, dec);
            warn!("solve-field will try to solve the image blindly");
            SolveOptions::new()
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use std::collections::HashMap;
    use approx::assert_abs_diff_eq;
    use super::*;

    fn header(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_decimal_degrees() {
        let coord = parse_coordinates("83.822", "-5.391").unwrap();
        assert_abs_diff_eq!(coord.ra, 83.822, epsilon = 1e-9);
        assert_abs_diff_eq!(coord.dec, -5.391, epsilon = 1e-9);
    }

    #[test]
    fn test_sexagesimal() {
        // Orion Nebula.
        let coord = parse_coordinates("05:35:17.3", "-05:23:28").unwrap();
        assert_abs_diff_eq!(coord.ra, 83.822083, epsilon = 1e-5);
        assert_abs_diff_eq!(coord.dec, -5.391111, epsilon = 1e-5);

        let coord = parse_coordinates("05 35 17.3", "+05 23 28").unwrap();
        assert_abs_diff_eq!(coord.ra, 83.822083, epsilon = 1e-5);
        assert_abs_diff_eq!(coord.dec, 5.391111, epsilon = 1e-5);

        let coord = parse_coordinates("12h30m00s", "45d30m00s").unwrap();
        assert_abs_diff_eq!(coord.ra, 187.5, epsilon = 1e-9);
        assert_abs_diff_eq!(coord.dec, 45.5, epsilon = 1e-9);
    }

    #[test]
    fn test_negative_zero_degrees() {
        assert_abs_diff_eq!(parse_dec_dms("-00:30:00").unwrap(), -0.5,
                            epsilon = 1e-9);
    }

    #[test]
    fn test_mixed_formats_fall_back_to_sexagesimal() {
        // RA decimal but Dec sexagesimal: both are read as sexagesimal, so
        // "83" is hours, which is out of range.
        assert_eq!(parse_coordinates("83", "-05:23:28"), None);
        let coord = parse_coordinates("5", "-05:23:28").unwrap();
        assert_abs_diff_eq!(coord.ra, 75.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_coordinates() {
        assert_eq!(parse_coordinates("nowhere", "-5.0"), None);
        assert_eq!(parse_coordinates("05:35:17", "-95:00:00"), None);
        assert_eq!(parse_coordinates("05:75:17", "10:00:00"), None);
        assert_eq!(parse_coordinates("400.0", "10.0"), None);
        assert_eq!(parse_coordinates("10.0", "91.0"), None);
        assert_eq!(parse_coordinates("NaN", "NaN"), None);
        assert_eq!(parse_coordinates("", ""), None);
    }

    #[test]
    fn test_center_options() {
        let h = header(&[("RA", "83.822"), ("DEC", "-5.391")]);
        let options = center_options(&h, &FieldCenterKeys{radius: 2.5,
                                                          ..Default::default()});
        let args: Vec<String> = options.to_args().into_iter()
            .map(|a| a.into_string().unwrap()).collect();
        assert_eq!(args, ["--ra", "83.822", "--dec", "-5.391", "--radius", "2.5"]);
    }

    #[test]
    fn test_center_options_custom_keys() {
        let h = header(&[("OBJCTRA", "05 35 17.3"), ("OBJCTDEC", "-05 23 28")]);
        let keys = FieldCenterKeys{ra_key: "OBJCTRA".to_string(),
                                   dec_key: "OBJCTDEC".to_string(),
                                   radius: 1.0};
        let options = center_options(&h, &keys);
        assert_eq!(options.len(), 3);
        let ra: f64 = options.get("ra").unwrap().value.as_ref().unwrap()
            .parse().unwrap();
        assert_abs_diff_eq!(ra, 83.822083, epsilon = 1e-5);
        assert_eq!(options.get("radius").unwrap().value.as_deref(), Some("1"));
    }

    #[test]
    fn test_center_options_missing_keyword_is_blind() {
        let h = header(&[("RA", "83.822")]);
        assert!(center_options(&h, &FieldCenterKeys::default()).is_empty());

        let h = header(&[("RA", "garbage"), ("DEC", "-5.391")]);
        assert!(center_options(&h, &FieldCenterKeys::default()).is_empty());
    }
}
