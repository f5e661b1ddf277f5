//! UCLUST (`.uc`) Parser Module
//!
//! Parses the cluster-assignment output written by `vsearch --uc`.
//! The file has no header; every line carries ten tab-separated columns.
//!
//! # UC Format
//! ```text
//! Col  Description
//! 1    Record type: S (seed/centroid), H (hit), C (cluster summary)
//! 2    Cluster number (0-based)
//! 3    Sequence length (S, H) or cluster size (C)
//! 4    Percent identity with the centroid (H), '*' otherwise
//! 5    Strand: '+', '-' or '*'
//! 6-8  Unused by this crate
//! 9    Query label
//! 10   Centroid label (H), '*' otherwise
//! ```
//!
//! # Example Usage
//! ```no_run
//! use recluster::uclust::UclustReader;
//!
//! let mut reader = UclustReader::open("uclust.95.txt").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     if let Some((member, centroid)) = record.assignment() {
//!         println!("{} -> {}", member, centroid);
//!     }
//! }
//! ```

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

// ============================================================================
// UC Record
// ============================================================================

/// Kind of a `.uc` line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordType {
    /// Query founded a new cluster and is its own centroid.
    Seed,
    /// Query joined the cluster of an existing centroid.
    Hit,
    /// Per-cluster summary line.
    Cluster,
}

impl RecordType {
    fn parse(field: &str) -> Result<Self> {
        match field {
            "S" => Ok(RecordType::Seed),
            "H" => Ok(RecordType::Hit),
            "C" => Ok(RecordType::Cluster),
            other => anyhow::bail!("Invalid UC record type: {:?}", other),
        }
    }
}

/// A single `.uc` record, reduced to the columns used for assignment.
#[derive(Debug, Clone)]
pub struct UclustRecord {
    /// Record type (column 1).
    pub record_type: RecordType,
    /// Query label (column 9).
    pub query: String,
    /// Centroid label (column 10), `*` unless this is a hit.
    pub target: String,
}

impl UclustRecord {
    /// Parses a record from a tab-separated line.
    ///
    /// # Errors
    /// Returns an error if the line has fewer than 10 fields, an unknown
    /// record type, a missing query label, or a hit without a target.
    pub fn parse_line(line: &str) -> Result<Self> {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 10 {
            anyhow::bail!("Invalid UC line: fewer than 10 fields");
        }

        let record_type = RecordType::parse(fields[0])?;
        let query = fields[8].to_string();
        let target = fields[9].to_string();

        if query.is_empty() || query == "*" {
            anyhow::bail!("Invalid UC line: missing query label");
        }
        if record_type == RecordType::Hit && (target.is_empty() || target == "*") {
            anyhow::bail!("Invalid UC line: hit for {} has no centroid", query);
        }

        Ok(Self {
            record_type,
            query,
            target,
        })
    }

    /// Returns `(member, centroid)` for seed and hit records.
    ///
    /// A seed is its own centroid; cluster summaries carry no assignment.
    pub fn assignment(&self) -> Option<(&str, &str)> {
        match self.record_type {
            RecordType::Seed => Some((&self.query, &self.query)),
            RecordType::Hit => Some((&self.query, &self.target)),
            RecordType::Cluster => None,
        }
    }
}

// ============================================================================
// UC Reader
// ============================================================================

/// Sequential reader for `.uc` files.
pub struct UclustReader {
    reader: BufReader<File>,
    line_buf: String,
    line_no: usize,
}

impl UclustReader {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .with_context(|| format!("Failed to open UC file: {}", path.as_ref().display()))?;
        Ok(Self {
            reader: BufReader::with_capacity(1024 * 1024, file),
            line_buf: String::with_capacity(256),
            line_no: 0,
        })
    }

    /// Reads the next record, skipping empty lines.
    pub fn read_next(&mut self) -> Result<Option<UclustRecord>> {
        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.line_buf.trim_end();
            if line.is_empty() {
                continue;
            }

            let record = UclustRecord::parse_line(line)
                .with_context(|| format!("UC line {}", self.line_no))?;
            return Ok(Some(record));
        }
    }
}

impl Iterator for UclustReader {
    type Item = Result<UclustRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
