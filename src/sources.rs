//! Reference energies of common gamma-ray calibration sources.
use std::fmt;

use thiserror::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::arrayops::is_increasing;

/// A radioactive calibration source and the gamma lines it emits, in keV
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReferenceSource {
    pub name: &'static str,
    pub energies: &'static [f64],
}

impl ReferenceSource {
    /// The number of peaks this source is expected to contribute to a spectrum
    pub fn number_of_peaks(&self) -> usize {
        self.energies.len()
    }

    fn matches(&self, name: &str) -> bool {
        normalize_name(self.name) == normalize_name(name)
    }
}

impl fmt::Display for ReferenceSource {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({} lines)", self.name, self.energies.len())
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

pub const EU152: ReferenceSource = ReferenceSource {
    name: "Eu-152",
    energies: &[
        121.78, 244.70, 344.28, 411.12, 443.96, 778.90, 867.38, 964.08, 1085.84, 1112.08, 1408.01,
    ],
};

pub const CO60: ReferenceSource = ReferenceSource {
    name: "Co-60",
    energies: &[1173.23, 1332.49],
};

pub const CS137: ReferenceSource = ReferenceSource {
    name: "Cs-137",
    energies: &[661.66],
};

pub const NA22: ReferenceSource = ReferenceSource {
    name: "Na-22",
    energies: &[511.0, 1274.54],
};

pub const BA133: ReferenceSource = ReferenceSource {
    name: "Ba-133",
    energies: &[80.99, 276.40, 302.85, 356.01, 383.85],
};

pub const AM241: ReferenceSource = ReferenceSource {
    name: "Am-241",
    energies: &[59.54],
};

/// Every source known by name
pub const SOURCES: &[ReferenceSource] = &[EU152, CO60, CS137, NA22, BA133, AM241];

/// Look up a source by name, ignoring case and punctuation so `"eu152"` finds `Eu-152`
pub fn find_source(name: &str) -> Option<&'static ReferenceSource> {
    SOURCES.iter().find(|s| s.matches(name))
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("Unknown calibration source {0:?}")]
    UnknownSource(String),
    #[error("No calibration sources were named")]
    NoSources,
}

/// An ascending list of reference energies to calibrate against
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KnownEnergies {
    energies: Vec<f64>,
    /// The names of the sources these energies were drawn from, if any
    pub name: String,
}

impl KnownEnergies {
    /// Build a list from arbitrary energies, discarding non-finite values and
    /// sorting the remainder.
    pub fn new(mut energies: Vec<f64>) -> Self {
        energies.retain(|e| e.is_finite());
        if !is_increasing(&energies) {
            energies.sort_by(f64::total_cmp);
        }
        Self {
            energies,
            name: String::new(),
        }
    }

    /// Merge the lines of several sources into one list
    pub fn from_sources<'a, I: IntoIterator<Item = &'a ReferenceSource>>(sources: I) -> Self {
        let mut energies = Vec::new();
        let mut names = Vec::new();
        for source in sources {
            energies.extend_from_slice(source.energies);
            names.push(source.name);
        }
        let mut this = Self::new(energies);
        this.name = names.join("+");
        this
    }

    /// Parse a comma separated list of source names such as `"eu152,co60"`
    pub fn from_names(names: &str) -> Result<Self, SourceError> {
        let sources = names
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| find_source(s).ok_or_else(|| SourceError::UnknownSource(s.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        if sources.is_empty() {
            return Err(SourceError::NoSources);
        }
        Ok(Self::from_sources(sources))
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.energies
    }

    pub fn len(&self) -> usize {
        self.energies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.energies.is_empty()
    }
}

impl AsRef<[f64]> for KnownEnergies {
    fn as_ref(&self) -> &[f64] {
        &self.energies
    }
}

impl From<Vec<f64>> for KnownEnergies {
    fn from(value: Vec<f64>) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("Eu-152", "Eu-152")]
    #[case("eu152", "Eu-152")]
    #[case("CO_60", "Co-60")]
    #[case(" cs-137", "Cs-137")]
    fn test_lookup(#[case] query: &str, #[case] expected: &str) {
        assert_eq!(find_source(query.trim()).unwrap().name, expected);
    }

    #[test]
    fn test_catalogue_is_sorted() {
        for source in SOURCES {
            assert!(is_increasing(source.energies), "{source}");
        }
    }

    #[test]
    fn test_combined_sources() {
        let energies = KnownEnergies::from_names("co60, cs137,am241").unwrap();
        assert_eq!(energies.as_slice(), &[59.54, 661.66, 1173.23, 1332.49]);
        assert_eq!(energies.name, "Co-60+Cs-137+Am-241");
        assert_eq!(
            KnownEnergies::from_names("co60,pu239"),
            Err(SourceError::UnknownSource("pu239".to_string()))
        );
        assert_eq!(KnownEnergies::from_names(" , "), Err(SourceError::NoSources));
    }

    #[test]
    fn test_new_sorts() {
        let energies = KnownEnergies::new(vec![300.0, f64::NAN, 100.0, 200.0]);
        assert_eq!(energies.as_slice(), &[100.0, 200.0, 300.0]);
        assert_eq!(energies.len(), 3);
    }
}
