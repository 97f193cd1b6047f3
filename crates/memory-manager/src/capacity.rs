// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Device and tier capacities.
//!
//! A [`Capacity`] is a memory size in whole megabytes, the unit every
//! placement decision is made in. It parses human-readable strings so
//! configuration files can say `capacity = "24G"`.

use crate::MemoryError;
use std::fmt;

const MB_PER_GB: u64 = 1024;
const MB_PER_TB: u64 = 1024 * 1024;

/// A memory size in megabytes.
///
/// # Parsing
/// - `"512M"` or `"512MB"` → 512 MB
/// - `"24G"` or `"24GB"` → 24 576 MB
/// - `"1T"` or `"1TB"` → 1 048 576 MB
/// - `"4096"` → 4096 MB (plain numbers are megabytes)
///
/// # Examples
/// ```
/// use memory_manager::Capacity;
///
/// let c = Capacity::parse("24G").unwrap();
/// assert_eq!(c.as_mb(), 24 * 1024);
/// assert_eq!(c.to_string(), "24 GB");
/// ```
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(try_from = "CapacityRepr", into = "String")]
pub struct Capacity {
    mb: u64,
}

impl Capacity {
    /// Creates a capacity from megabytes.
    pub fn from_mb(mb: u64) -> Self {
        Self { mb }
    }

    /// Creates a capacity from gigabytes.
    pub fn from_gb(gb: u64) -> Self {
        Self { mb: gb * MB_PER_GB }
    }

    /// Returns the capacity in megabytes.
    pub fn as_mb(&self) -> u64 {
        self.mb
    }

    /// Parses a human-readable capacity string. Case-insensitive.
    pub fn parse(s: &str) -> Result<Self, MemoryError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemoryError::InvalidCapacity("empty string".to_string()));
        }

        let upper = s.to_ascii_uppercase();
        let (num_str, multiplier) = if let Some(n) = strip_unit(&upper, 'T') {
            (n, MB_PER_TB)
        } else if let Some(n) = strip_unit(&upper, 'G') {
            (n, MB_PER_GB)
        } else if let Some(n) = strip_unit(&upper, 'M') {
            (n, 1)
        } else {
            (upper.as_str(), 1)
        };

        let value: u64 = num_str.trim().parse().map_err(|_| {
            MemoryError::InvalidCapacity(format!(
                "'{s}': expected a number followed by an optional suffix (M, G, T)"
            ))
        })?;

        let mb = value
            .checked_mul(multiplier)
            .ok_or_else(|| MemoryError::InvalidCapacity(format!("'{s}' overflows")))?;

        if mb == 0 {
            return Err(MemoryError::InvalidCapacity(format!("'{s}' is zero")));
        }

        Ok(Self { mb })
    }
}

/// Strips `<unit>` or `<unit>B` from the end of an upper-cased string.
fn strip_unit(s: &str, unit: char) -> Option<&str> {
    s.strip_suffix('B')
        .unwrap_or(s)
        .strip_suffix(unit)
}

impl fmt::Display for Capacity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mb >= MB_PER_TB && self.mb % MB_PER_TB == 0 {
            write!(f, "{} TB", self.mb / MB_PER_TB)
        } else if self.mb >= MB_PER_GB && self.mb % MB_PER_GB == 0 {
            write!(f, "{} GB", self.mb / MB_PER_GB)
        } else {
            write!(f, "{} MB", self.mb)
        }
    }
}

impl std::str::FromStr for Capacity {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Accepts either `"24G"` or a bare megabyte count in config files.
#[derive(serde::Deserialize)]
#[serde(untagged)]
enum CapacityRepr {
    Text(String),
    Megabytes(u64),
}

impl TryFrom<CapacityRepr> for Capacity {
    type Error = MemoryError;

    fn try_from(repr: CapacityRepr) -> Result<Self, Self::Error> {
        match repr {
            CapacityRepr::Text(s) => Self::parse(&s),
            CapacityRepr::Megabytes(0) => {
                Err(MemoryError::InvalidCapacity("capacity is zero".to_string()))
            }
            CapacityRepr::Megabytes(mb) => Ok(Self::from_mb(mb)),
        }
    }
}

impl From<Capacity> for String {
    fn from(c: Capacity) -> Self {
        c.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_suffixes() {
        assert_eq!(Capacity::parse("512M").unwrap().as_mb(), 512);
        assert_eq!(Capacity::parse("512mb").unwrap().as_mb(), 512);
        assert_eq!(Capacity::parse("24G").unwrap().as_mb(), 24 * 1024);
        assert_eq!(Capacity::parse("2gb").unwrap().as_mb(), 2048);
        assert_eq!(Capacity::parse("1T").unwrap().as_mb(), 1024 * 1024);
    }

    #[test]
    fn test_parse_plain_is_megabytes() {
        assert_eq!(Capacity::parse("4096").unwrap().as_mb(), 4096);
        assert_eq!(Capacity::parse("  100  ").unwrap().as_mb(), 100);
    }

    #[test]
    fn test_parse_invalid() {
        assert!(Capacity::parse("").is_err());
        assert!(Capacity::parse("lots").is_err());
        assert!(Capacity::parse("0G").is_err());
        assert!(Capacity::parse("99999999999999999999T").is_err());
    }

    #[test]
    fn test_display_reparses() {
        for c in [Capacity::from_gb(24), Capacity::from_mb(100), Capacity::from_gb(1024)] {
            assert_eq!(Capacity::parse(&c.to_string()).unwrap(), c);
        }
        assert_eq!(Capacity::from_gb(24).to_string(), "24 GB");
        assert_eq!(Capacity::from_mb(100).to_string(), "100 MB");
    }

    #[test]
    fn test_deserialize_string_or_number() {
        #[derive(serde::Deserialize)]
        struct Dev {
            capacity: Capacity,
        }
        let d: Dev = toml::from_str(r#"capacity = "24G""#).unwrap();
        assert_eq!(d.capacity.as_mb(), 24 * 1024);
        let d: Dev = toml::from_str("capacity = 8192").unwrap();
        assert_eq!(d.capacity.as_mb(), 8192);
        assert!(toml::from_str::<Dev>("capacity = 0").is_err());
    }
}
