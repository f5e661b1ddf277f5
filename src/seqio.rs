//! Sequence I/O Module
//!
//! Sequential FASTA reading for gene and centroid files, plain or gzipped.
//! Only record names and sequence lengths matter to the reclustering pipeline;
//! sequences are otherwise handed to the clustering tool untouched.
//!
//! # Examples
//! ```no_run
//! use recluster::seqio::FastaFile;
//!
//! let mut reader = FastaFile::open("centroids.99.ffn").unwrap();
//! while let Some(record) = reader.read_next().unwrap() {
//!     println!("{}: {} bp", record.name, record.seq.len());
//! }
//! ```

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// A FASTA record: identifier up to the first whitespace, concatenated sequence.
#[derive(Debug, Clone)]
pub struct FastaRecord {
    pub name: String,
    pub seq: String,
}

/// Sequential reader for FASTA from any byte source.
///
/// Handles multi-line sequences and strips trailing whitespace.
pub struct FastaReader<R: Read> {
    reader: BufReader<R>,
    line_buf: String,
    current_name: Option<String>,
}

impl<R: Read> FastaReader<R> {
    pub fn new(inner: R) -> Result<Self> {
        let mut reader = Self {
            reader: BufReader::with_capacity(1024 * 1024, inner),
            line_buf: String::with_capacity(256),
            current_name: None,
        };

        // Prime with the first header
        loop {
            reader.line_buf.clear();
            if reader.reader.read_line(&mut reader.line_buf)? == 0 {
                break;
            }
            if reader.line_buf.starts_with('>') {
                reader.current_name = Some(header_name(&reader.line_buf));
                break;
            }
            if !reader.line_buf.trim().is_empty() {
                anyhow::bail!("Invalid FASTA: sequence data before the first '>' header");
            }
        }

        Ok(reader)
    }

    /// Reads the next record.
    ///
    /// # Returns
    /// - `Ok(Some(record))` - Successfully read a record
    /// - `Ok(None)` - End of file reached
    /// - `Err(e)` - I/O error occurred
    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        let name = match self.current_name.take() {
            Some(n) => n,
            None => return Ok(None),
        };

        let mut seq = String::with_capacity(2048);

        loop {
            self.line_buf.clear();
            if self.reader.read_line(&mut self.line_buf)? == 0 {
                break;
            }

            if self.line_buf.starts_with('>') {
                self.current_name = Some(header_name(&self.line_buf));
                break;
            }
            seq.push_str(self.line_buf.trim_end());
        }

        Ok(Some(FastaRecord { name, seq }))
    }
}

fn header_name(line: &str) -> String {
    line[1..].split_whitespace().next().unwrap_or("").to_string()
}

impl<R: Read> Iterator for FastaReader<R> {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.read_next() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// FASTA file reader selecting plain or gzip decoding by extension.
pub enum FastaFile {
    Plain(FastaReader<File>),
    Gzipped(FastaReader<MultiGzDecoder<File>>),
}

impl FastaFile {
    /// Opens a FASTA file; paths ending in `.gz` are decompressed on the fly.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Failed to open FASTA: {}", path.display()))?;
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        let reader = if ext == "gz" {
            FastaFile::Gzipped(FastaReader::new(MultiGzDecoder::new(file))?)
        } else {
            FastaFile::Plain(FastaReader::new(file)?)
        };
        Ok(reader)
    }

    pub fn read_next(&mut self) -> Result<Option<FastaRecord>> {
        match self {
            FastaFile::Plain(r) => r.read_next(),
            FastaFile::Gzipped(r) => r.read_next(),
        }
    }
}

/// Summary of a FASTA file's contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FastaStats {
    pub records: usize,
    pub total_len: usize,
}

/// Counts records and bases in a FASTA file.
pub fn stats<P: AsRef<Path>>(path: P) -> Result<FastaStats> {
    let mut reader = FastaFile::open(path.as_ref())?;
    let mut stats = FastaStats::default();
    while let Some(record) = reader.read_next()? {
        stats.records += 1;
        stats.total_len += record.seq.len();
    }
    Ok(stats)
}
