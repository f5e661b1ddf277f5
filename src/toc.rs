//! Table of contents: which species exist and which genomes belong to each.
//!
//! Read once per run from `genomes.tsv`, a tab-separated file whose header
//! names at least the `genome` and `species` columns.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::ContractViolation;

/// One unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Species {
    pub id: String,
    pub genomes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Toc {
    species: BTreeMap<String, Species>,
}

impl Toc {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("Failed to open table of contents: {}", path.display()))?;
        Self::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid table of contents: {}", path.display()))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut lines = reader.lines();

        let header = match lines.next() {
            Some(line) => line?,
            None => anyhow::bail!("Empty table of contents"),
        };
        let columns: Vec<&str> = header.trim_end().split('\t').collect();
        let genome_col = column_index(&columns, "genome")?;
        let species_col = column_index(&columns, "species")?;
        let needed = genome_col.max(species_col);

        let mut toc = Toc::default();
        for (i, line) in lines.enumerate() {
            let line = line?;
            let line = line.trim_end();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() <= needed {
                anyhow::bail!("Line {}: expected at least {} columns", i + 2, needed + 1);
            }
            let species_id = fields[species_col];
            toc.species
                .entry(species_id.to_string())
                .or_insert_with(|| Species {
                    id: species_id.to_string(),
                    genomes: Vec::new(),
                })
                .genomes
                .push(fields[genome_col].to_string());
        }

        Ok(toc)
    }

    pub fn get(&self, species_id: &str) -> Option<&Species> {
        self.species.get(species_id)
    }

    pub fn contains(&self, species_id: &str) -> bool {
        self.species.contains_key(species_id)
    }

    pub fn len(&self) -> usize {
        self.species.len()
    }

    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.species.keys().map(|s| s.as_str())
    }

    /// Resolves a species selector against the table of contents.
    ///
    /// Accepted forms:
    /// - `all`: every species
    /// - `i:m`: numeric species ids with `id % m == i`
    /// - `a,b,c`: an explicit list; every id must exist
    pub fn select(&self, selector: &str) -> Result<Vec<String>> {
        let selector = selector.trim();
        if selector.is_empty() {
            anyhow::bail!("Empty species selector");
        }

        if selector == "all" {
            return Ok(self.ids().map(str::to_string).collect());
        }

        if let Some((idx, modulus)) = selector.split_once(':') {
            let idx: u64 = idx
                .parse()
                .with_context(|| format!("Invalid slice index in {:?}", selector))?;
            let modulus: u64 = modulus
                .parse()
                .with_context(|| format!("Invalid slice modulus in {:?}", selector))?;
            if modulus == 0 || idx >= modulus {
                anyhow::bail!("Species slice {:?} must satisfy 0 <= idx < modulus", selector);
            }

            let mut selected = Vec::new();
            for id in self.ids() {
                let numeric: u64 = id
                    .parse()
                    .with_context(|| format!("Species id {} is not numeric; cannot slice", id))?;
                if numeric % modulus == idx {
                    selected.push(id.to_string());
                }
            }
            return Ok(selected);
        }

        let mut selected: Vec<String> = Vec::new();
        for id in selector.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            if !self.contains(id) {
                return Err(ContractViolation::UnknownSpecies(id.to_string()).into());
            }
            if !selected.iter().any(|s| s == id) {
                selected.push(id.to_string());
            }
        }
        Ok(selected)
    }
}

fn column_index(columns: &[&str], name: &str) -> Result<usize> {
    columns
        .iter()
        .position(|c| *c == name)
        .ok_or_else(|| anyhow::anyhow!("Missing column '{}' in header", name))
}
