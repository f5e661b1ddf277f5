//! Database Layout Module
//!
//! Resolves where a species' inputs, published artifacts, logs and scratch
//! workspace live, and publishes staged files atomically.
//!
//! # Layout
//! ```text
//! {db}/genomes.tsv                              table of contents
//! {db}/pangenomes/{species}/genes.ffn           input genes
//! {db}/pangenomes/{species}/centroids.ffn       published representatives
//! {db}/pangenomes/{species}/genes_info.tsv      published cross-reference
//! {db}/logs/recluster/{species}.log             worker log
//! {scratch}/recluster/{species}/                worker scratch workspace
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub const TOC_FILE: &str = "genomes.tsv";
pub const GENES_FILE: &str = "genes.ffn";
pub const CENTROIDS_FILE: &str = "centroids.ffn";
pub const GENE_INFO_FILE: &str = "genes_info.tsv";

/// Staged file name of the finest representative set inside scratch.
pub fn staged_centroids(finest: u8) -> String {
    format!("centroids.{}.ffn", finest)
}

/// Staged file name of the cluster assignment at `percent` inside scratch.
pub fn staged_uclust(percent: u8) -> String {
    format!("uclust.{}.txt", percent)
}

/// Artifacts a species build publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Centroids,
    GeneInfo,
}

impl Artifact {
    pub fn file_name(&self) -> &'static str {
        match self {
            Artifact::Centroids => CENTROIDS_FILE,
            Artifact::GeneInfo => GENE_INFO_FILE,
        }
    }
}

/// Path resolution for one database instance.
#[derive(Debug, Clone)]
pub struct DbLayout {
    root: PathBuf,
    scratch_root: PathBuf,
}

impl DbLayout {
    pub fn new<P: Into<PathBuf>, Q: Into<PathBuf>>(root: P, scratch_root: Q) -> Self {
        Self {
            root: root.into(),
            scratch_root: scratch_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    pub fn toc(&self) -> PathBuf {
        self.root.join(TOC_FILE)
    }

    pub fn species_dir(&self, species: &str) -> PathBuf {
        self.root.join("pangenomes").join(species)
    }

    pub fn genes(&self, species: &str) -> PathBuf {
        self.species_dir(species).join(GENES_FILE)
    }

    pub fn artifact(&self, species: &str, artifact: Artifact) -> PathBuf {
        self.species_dir(species).join(artifact.file_name())
    }

    pub fn worker_log(&self, species: &str) -> PathBuf {
        self.root
            .join("logs")
            .join("recluster")
            .join(format!("{}.log", species))
    }

    /// Scratch workspace, a pure function of the species id.
    pub fn worker_subdir(&self, species: &str) -> PathBuf {
        self.scratch_root.join("recluster").join(species)
    }

    /// Cheap existence check: is the artifact already published?
    pub fn exists(&self, species: &str, artifact: Artifact) -> bool {
        self.artifact(species, artifact).is_file()
    }
}

/// Copies `src` to `dest` through a sibling temp file and a rename, so
/// readers never observe a half-written destination.
pub fn publish(src: &Path, dest: &Path) -> Result<()> {
    if !src.is_file() {
        anyhow::bail!("Staged output not found: {}", src.display());
    }
    let parent = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("Destination has no parent: {}", dest.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create {}", parent.display()))?;

    let file_name = dest
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("artifact");
    let tmp = parent.join(format!(".{}.partial", file_name));

    fs::copy(src, &tmp)
        .with_context(|| format!("Failed to copy {} to {}", src.display(), tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to publish {}", dest.display()));
    }
    Ok(())
}

/// Readies a scratch workspace.
///
/// Without `debug` any leftover directory is wiped first. With `debug` an
/// existing workspace is kept so prior tool outputs can be reused.
/// Returns `true` if an existing workspace was reused.
pub fn prepare_scratch(dir: &Path, debug: bool) -> Result<bool> {
    let existed = dir.is_dir();
    if existed && !debug {
        fs::remove_dir_all(dir)
            .with_context(|| format!("Failed to clear scratch {}", dir.display()))?;
    }
    fs::create_dir_all(dir).with_context(|| format!("Failed to create scratch {}", dir.display()))?;
    Ok(existed && debug)
}

/// Deletes a scratch workspace; a missing directory is not an error.
pub fn remove_scratch(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove scratch {}", dir.display())),
    }
}
