// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

/// One command line option for an Astrometry.net command. A single-character
/// name renders as `-n`, anything longer as `--name`. An absent value renders
/// as a bare flag; otherwise the value follows as its own argument.
#[derive(Clone, Debug, PartialEq)]
pub struct SolveOption {
    pub name: String,
    pub value: Option<String>,
}

impl SolveOption {
    pub fn new(name: impl Into<String>, value: Option<String>) -> Self {
        SolveOption{name: name.into(), value}
    }

    pub fn flag(&self) -> String {
        flag_name(&self.name)
    }

    pub fn to_args(&self) -> Vec<OsString> {
        let mut args = vec![OsString::from(self.flag())];
        if let Some(value) = &self.value {
            args.push(OsString::from(value));
        }
        args
    }
}

// Accepts NAME or NAME=VALUE, with any leading dashes on NAME ignored.
impl FromStr for SolveOption {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (name, value) = match s.split_once('=') {
            Some((name, value)) => (name, Some(value.to_string())),
            None => (s, None),
        };
        let name = name.trim_start_matches('-');
        if name.is_empty() {
            return Err(format!("option {:?} has no name", s));
        }
        Ok(SolveOption::new(name, value))
    }
}

impl fmt::Display for SolveOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} {}", self.flag(), value),
            None => write!(f, "{}", self.flag()),
        }
    }
}

pub fn flag_name(name: &str) -> String {
    if name.chars().count() == 1 {
        format!("-{}", name)
    } else {
        format!("--{}", name)
    }
}

/// Ordered list of options passed down to an Astrometry.net command. Order is
/// preserved so the rendered command line is deterministic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SolveOptions {
    entries: Vec<SolveOption>,
}

impl SolveOptions {
    pub fn new() -> Self {
        SolveOptions{entries: Vec::new()}
    }

    // Builder-style helpers.
    pub fn with_flag(mut self, name: impl Into<String>) -> Self {
        self.push(name, None);
        self
    }
    pub fn with_value(mut self, name: impl Into<String>,
                      value: impl ToString) -> Self {
        self.push(name, Some(value.to_string()));
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.entries.push(SolveOption::new(name, value));
    }

    pub fn extend(&mut self, other: &SolveOptions) {
        self.entries.extend(other.entries.iter().cloned());
    }

    /// Returns the first option with the given name (no dashes).
    pub fn get(&self, name: &str) -> Option<&SolveOption> {
        self.entries.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SolveOption> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_args(&self) -> Vec<OsString> {
        self.entries.iter().flat_map(|o| o.to_args()).collect()
    }
}

impl From<Vec<SolveOption>> for SolveOptions {
    fn from(entries: Vec<SolveOption>) -> Self {
        SolveOptions{entries}
    }
}

impl FromIterator<SolveOption> for SolveOptions {
    fn from_iter<I: IntoIterator<Item = SolveOption>>(iter: I) -> Self {
        SolveOptions{entries: iter.into_iter().collect()}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.into_string().unwrap()).collect()
    }

    #[test]
    fn test_short_option_with_value() {
        let options = SolveOptions::new().with_value("w", 681);
        assert_eq!(strings(options.to_args()), ["-w", "681"]);
    }

    #[test]
    fn test_long_bare_flag() {
        let options = SolveOptions::new().with_flag("no-plots");
        assert_eq!(strings(options.to_args()), ["--no-plots"]);
    }

    #[test]
    fn test_order_is_preserved() {
        let options = SolveOptions::new()
            .with_value("ra", 83.82)
            .with_value("dec", -5.39)
            .with_value("radius", 1)
            .with_flag("z")
            .with_value("scale-units", "degwidth");
        assert_eq!(strings(options.to_args()),
                   ["--ra", "83.82", "--dec", "-5.39", "--radius", "1",
                    "-z", "--scale-units", "degwidth"]);
        assert_eq!(options.len(), 5);
        assert_eq!(options.get("dec").unwrap().value.as_deref(), Some("-5.39"));
        assert!(options.get("cpulimit").is_none());
    }

    #[test]
    fn test_multibyte_single_char_name() {
        assert_eq!(flag_name("é"), "-é");
        assert_eq!(flag_name("ab"), "--ab");
    }

    #[test]
    fn test_parse_option() {
        let option: SolveOption = "cpulimit=30".parse().unwrap();
        assert_eq!(option, SolveOption::new("cpulimit", Some("30".to_string())));

        let option: SolveOption = "--downsample=2".parse().unwrap();
        assert_eq!(option.to_string(), "--downsample 2");

        let option: SolveOption = "O".parse().unwrap();
        assert_eq!(option.value, None);
        assert_eq!(option.to_string(), "-O");

        // Empty value is kept; the command decides what it means.
        let option: SolveOption = "label=".parse().unwrap();
        assert_eq!(option.value.as_deref(), Some(""));

        assert!("--".parse::<SolveOption>().is_err());
        assert!("=3".parse::<SolveOption>().is_err());
    }

    #[test]
    fn test_extend() {
        let mut options = SolveOptions::new().with_value("ra", 10.0);
        options.extend(&SolveOptions::new().with_flag("overwrite"));
        assert_eq!(strings(options.to_args()), ["--ra", "10", "--overwrite"]);
    }
}
