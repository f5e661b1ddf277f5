//! Clustering Thresholds
//!
//! Similarity percentages at which a species' genes are clustered. The list is
//! strictly decreasing: the first (finest) threshold is run against the full
//! gene set, every later (coarser) threshold against the finest representatives.

use anyhow::Result;
use std::fmt;

/// Default percent identities, finest first.
pub const DEFAULT_PERCENTS: [u8; 6] = [99, 95, 90, 85, 80, 75];

/// Ordered, strictly decreasing list of percent identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thresholds {
    percents: Vec<u8>,
}

impl Thresholds {
    /// Validates and wraps a list of percent identities.
    ///
    /// # Errors
    /// Returns an error if the list is empty, contains a value outside
    /// `1..=100`, or is not strictly decreasing.
    pub fn new(percents: Vec<u8>) -> Result<Self> {
        if percents.is_empty() {
            anyhow::bail!("At least one clustering threshold is required");
        }
        if let Some(p) = percents.iter().find(|&&p| p == 0 || p > 100) {
            anyhow::bail!("Clustering threshold must be between 1 and 100, got {}", p);
        }
        for pair in percents.windows(2) {
            if pair[1] >= pair[0] {
                anyhow::bail!(
                    "Clustering thresholds must be strictly decreasing, got {} before {}",
                    pair[0],
                    pair[1]
                );
            }
        }
        Ok(Self { percents })
    }

    /// Parses a comma-separated list such as `99,95,90`.
    pub fn parse(s: &str) -> Result<Self> {
        let mut percents = Vec::new();
        for field in s.split(',') {
            let field = field.trim();
            if field.is_empty() {
                continue;
            }
            let p: u8 = field
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid clustering threshold: {}", field))?;
            percents.push(p);
        }
        Self::new(percents)
    }

    /// The highest threshold, the only one run against the full gene set.
    pub fn finest(&self) -> u8 {
        self.percents[0]
    }

    /// Thresholds below the finest, in decreasing order.
    pub fn coarser(&self) -> &[u8] {
        &self.percents[1..]
    }

    pub fn all(&self) -> &[u8] {
        &self.percents
    }

    pub fn len(&self) -> usize {
        self.percents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.percents.is_empty()
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            percents: DEFAULT_PERCENTS.to_vec(),
        }
    }
}

impl fmt::Display for Thresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .percents
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(",");
        f.write_str(&joined)
    }
}

/// clap value parser for `--thresholds`.
pub fn parse_thresholds(s: &str) -> Result<Thresholds, String> {
    Thresholds::parse(s).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_thresholds() {
        let t = Thresholds::default();
        assert_eq!(t.finest(), 99);
        assert_eq!(t.coarser(), &[95, 90, 85, 80, 75]);
        assert_eq!(t.to_string(), "99,95,90,85,80,75");
    }

    #[test]
    fn test_parse_roundtrip_through_display() {
        let t = Thresholds::parse("99, 90,80").unwrap();
        assert_eq!(t.all(), &[99, 90, 80]);
        assert_eq!(Thresholds::parse(&t.to_string()).unwrap(), t);
    }

    #[test]
    fn test_single_threshold_has_no_coarser() {
        let t = Thresholds::parse("97").unwrap();
        assert_eq!(t.finest(), 97);
        assert!(t.coarser().is_empty());
    }

    #[test]
    fn test_rejects_invalid_lists() {
        assert!(Thresholds::parse("").is_err());
        assert!(Thresholds::parse("95,99").is_err());
        assert!(Thresholds::parse("99,99").is_err());
        assert!(Thresholds::parse("101,90").is_err());
        assert!(Thresholds::parse("99,0").is_err());
        assert!(Thresholds::parse("99,abc").is_err());
    }
}
