//! Centroid Cross-Reference Module
//!
//! Reconciles the cluster assignments of one species, computed independently
//! at several decreasing thresholds, into a single per-gene table.
//!
//! # Inputs
//! - Finest threshold: every raw gene → its finest-level representative.
//! - Each coarser threshold: finest-level representative → coarser representative
//!   (the coarser runs only ever see the finest representative set).
//!
//! # Method
//! 1. Check the finest relation is idempotent: a representative is its own
//!    finest-level representative, both for finest values and coarser keys.
//! 2. Compose through the finest representative for every coarser threshold:
//!    `centroid[g][p] = coarser[p][finest[g]]`. One hop, no fixpoint.
//! 3. Emit one row per finest gene with a value for every threshold.
//!
//! Any inconsistency aborts the species with an [`XrefError`]; nothing is
//! repaired or guessed.

use anyhow::{Context, Result};
use rustc_hash::FxHashMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::error::XrefError;
use crate::threshold::Thresholds;
use crate::uclust::UclustReader;

/// Member id → representative id at one threshold.
pub type Assignment = FxHashMap<String, String>;

/// One output row: a gene and its representative at every threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneCentroids {
    pub gene_id: String,
    /// Representatives in threshold order, finest first.
    pub centroids: Vec<String>,
}

/// Loads a `.uc` file as an assignment.
///
/// Summary (`C`) records are ignored. A member assigned twice is an
/// [`XrefError::DuplicateAssignment`].
pub fn load_assignment(path: &Path, threshold: u8) -> Result<Assignment> {
    let mut assignment = Assignment::default();
    let mut reader = UclustReader::open(path)?;

    while let Some(record) = reader.read_next()? {
        let Some((member, centroid)) = record.assignment() else {
            continue;
        };
        if let Some(previous) = assignment.get(member) {
            if previous != centroid {
                return Err(XrefError::DuplicateAssignment {
                    threshold,
                    gene: member.to_string(),
                    first: previous.clone(),
                    second: centroid.to_string(),
                }
                .into());
            }
            continue;
        }
        assignment.insert(member.to_string(), centroid.to_string());
    }

    Ok(assignment)
}

/// Cross-references per-threshold assignments into per-gene rows.
///
/// `coarser` must hold one assignment per `thresholds.coarser()` entry, in the
/// same order. Rows come back sorted by gene id.
pub fn cross_reference(
    thresholds: &Thresholds,
    finest: &Assignment,
    coarser: &[Assignment],
) -> Result<Vec<GeneCentroids>, XrefError> {
    let finest_pct = thresholds.finest();
    if let Some(&missing) = thresholds.coarser().get(coarser.len()) {
        return Err(XrefError::MissingThreshold { threshold: missing });
    }

    let mut genes: Vec<&String> = finest.keys().collect();
    genes.sort_unstable();

    // Finest representatives must map to themselves.
    for gene in &genes {
        let rep = &finest[*gene];
        check_self_mapped(finest, rep, finest_pct, finest_pct)?;
    }

    // Coarser runs are keyed by finest representatives only.
    for (assignment, &pct) in coarser.iter().zip(thresholds.coarser()) {
        let mut keys: Vec<&String> = assignment.keys().collect();
        keys.sort_unstable();
        for rep in keys {
            check_self_mapped(finest, rep, finest_pct, pct)?;
        }
    }

    let mut rows = Vec::with_capacity(genes.len());
    for gene in genes {
        let rep = &finest[gene];
        let mut centroids = Vec::with_capacity(thresholds.len());
        centroids.push(rep.clone());

        for (assignment, &pct) in coarser.iter().zip(thresholds.coarser()) {
            let coarse = assignment.get(rep).ok_or_else(|| XrefError::MissingCoarser {
                threshold: pct,
                gene: gene.clone(),
                representative: rep.clone(),
            })?;
            centroids.push(coarse.clone());
        }

        rows.push(GeneCentroids {
            gene_id: gene.clone(),
            centroids,
        });
    }

    Ok(rows)
}

fn check_self_mapped(
    finest: &Assignment,
    rep: &str,
    finest_pct: u8,
    threshold: u8,
) -> Result<(), XrefError> {
    match finest.get(rep) {
        Some(found) if found == rep => Ok(()),
        Some(found) => Err(XrefError::NotIdempotent {
            finest: finest_pct,
            threshold,
            representative: rep.to_string(),
            found: found.clone(),
        }),
        None => Err(XrefError::MissingRepresentative {
            finest: finest_pct,
            threshold,
            representative: rep.to_string(),
        }),
    }
}

/// Header of the gene-info table: `gene_id` then one `centroid_{p}` per threshold.
pub fn gene_info_header(thresholds: &Thresholds) -> String {
    let mut header = String::from("gene_id");
    for p in thresholds.all() {
        header.push_str(&format!("\tcentroid_{}", p));
    }
    header
}

/// Writes the gene-info table.
pub fn write_gene_info(path: &Path, thresholds: &Thresholds, rows: &[GeneCentroids]) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create gene info: {}", path.display()))?;
    let mut out = BufWriter::new(file);

    writeln!(out, "{}", gene_info_header(thresholds))?;
    for row in rows {
        write!(out, "{}", row.gene_id)?;
        for centroid in &row.centroids {
            write!(out, "\t{}", centroid)?;
        }
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Loads the `.uc` files for every threshold, cross-references them and
/// writes the gene-info table. Returns the number of genes written.
///
/// `uc_files` is indexed like `thresholds.all()`.
pub fn xref_files<P: AsRef<Path>>(
    thresholds: &Thresholds,
    uc_files: &[P],
    gene_info: &Path,
) -> Result<usize> {
    if uc_files.len() != thresholds.len() {
        anyhow::bail!(
            "Expected {} cluster files, got {}",
            thresholds.len(),
            uc_files.len()
        );
    }

    let finest = load_assignment(uc_files[0].as_ref(), thresholds.finest())?;
    let mut coarser = Vec::with_capacity(thresholds.coarser().len());
    for (path, &pct) in uc_files[1..].iter().zip(thresholds.coarser()) {
        coarser.push(load_assignment(path.as_ref(), pct)?);
    }

    let rows = cross_reference(thresholds, &finest, &coarser)?;
    write_gene_info(gene_info, thresholds, &rows)?;
    Ok(rows.len())
}
