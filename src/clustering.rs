//! Clustering Tool Adapter
//!
//! Wraps the external clustering tool (vsearch) behind [`Clusterer`]: a
//! sequence file and a percent identity in, a representative FASTA and a
//! `.uc` assignment file out. The tool is a black box; only its exit status
//! and output files are inspected.

use anyhow::{Context, Result};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

use crate::layout::{staged_centroids, staged_uclust};

/// Output files of one clustering run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRun {
    pub percent: u8,
    /// Representative sequences.
    pub centroids: PathBuf,
    /// Member → representative assignment (`.uc`).
    pub uclust: PathBuf,
}

impl ClusterRun {
    /// Expected output paths for `percent` inside `workdir`.
    pub fn in_dir(workdir: &Path, percent: u8) -> Self {
        Self {
            percent,
            centroids: workdir.join(staged_centroids(percent)),
            uclust: workdir.join(staged_uclust(percent)),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.centroids.is_file() && self.uclust.is_file()
    }
}

/// Clusters a sequence file at one similarity threshold.
///
/// Implementations must be callable from several threads at once: coarser
/// thresholds are clustered concurrently.
pub trait Clusterer: Sync {
    fn cluster(&self, sequences: &Path, percent: u8, workdir: &Path) -> Result<ClusterRun>;
}

/// `vsearch --cluster_fast` invoked as a subprocess.
#[derive(Debug, Clone)]
pub struct Vsearch {
    exe: PathBuf,
    threads: usize,
}

impl Vsearch {
    pub fn new<P: Into<PathBuf>>(exe: P, threads: usize) -> Self {
        Self {
            exe: exe.into(),
            threads: threads.max(1),
        }
    }

    fn args(&self, sequences: &Path, run: &ClusterRun) -> Vec<String> {
        vec![
            "--quiet".to_string(),
            "--cluster_fast".to_string(),
            sequences.display().to_string(),
            "--id".to_string(),
            format!("{:.2}", run.percent as f64 / 100.0),
            "--threads".to_string(),
            self.threads.to_string(),
            "--centroids".to_string(),
            run.centroids.display().to_string(),
            "--uc".to_string(),
            run.uclust.display().to_string(),
        ]
    }
}

impl Clusterer for Vsearch {
    fn cluster(&self, sequences: &Path, percent: u8, workdir: &Path) -> Result<ClusterRun> {
        let run = ClusterRun::in_dir(workdir, percent);
        if run.is_complete() {
            info!("Found vsearch results at percent identity {} from prior run.", percent);
            return Ok(run);
        }

        let args = self.args(sequences, &run);
        debug!("{} {}", self.exe.display(), args.join(" "));

        let result = Command::new(&self.exe)
            .args(&args)
            .output()
            .with_context(|| format!("Failed to execute {}", self.exe.display()));

        let failure = match result {
            Ok(output) if output.status.success() && run.is_complete() => return Ok(run),
            Ok(output) if output.status.success() => {
                anyhow::anyhow!("vsearch at {}% exited cleanly but produced no output", percent)
            }
            Ok(output) => anyhow::anyhow!(
                "vsearch at {}% failed ({}): {}",
                percent,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => e,
        };

        // Never leave partial outputs where a rerun would trust them.
        mark_bogus(&run.centroids);
        mark_bogus(&run.uclust);
        Err(failure)
    }
}

fn mark_bogus(path: &Path) {
    if !path.exists() {
        return;
    }
    let mut bogus = path.as_os_str().to_owned();
    bogus.push(".bogus");
    if let Err(e) = fs::rename(path, &bogus) {
        warn!("Could not set aside {}: {}", path.display(), e);
    }
}

/// Locates an executable by path or on `PATH`.
///
/// The result is always absolute: workers run inside their scratch
/// directory, where a relative path would resolve elsewhere.
pub fn find_executable(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    if path.is_absolute() || name.contains(std::path::MAIN_SEPARATOR) {
        if path.is_file() {
            return absolute(path);
        }
        anyhow::bail!("{} does not exist", path.display());
    }

    if let Ok(paths) = env::var("PATH") {
        for dir in env::split_paths(&paths) {
            let full_path = dir.join(name);
            if full_path.is_file() {
                return absolute(&full_path);
            }
        }
    }

    anyhow::bail!("{} not found in PATH. Please install it or add it to your PATH.", name)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Cannot resolve {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vsearch_arguments() {
        let v = Vsearch::new("/usr/bin/vsearch", 0);
        let run = ClusterRun::in_dir(Path::new("/w"), 95);
        let args = v.args(Path::new("/w/centroids.99.ffn"), &run);
        assert_eq!(
            args,
            vec![
                "--quiet",
                "--cluster_fast",
                "/w/centroids.99.ffn",
                "--id",
                "0.95",
                "--threads",
                "1",
                "--centroids",
                "/w/centroids.95.ffn",
                "--uc",
                "/w/uclust.95.txt",
            ]
        );
    }

    #[test]
    fn test_prior_outputs_are_reused() {
        let dir = tempfile::tempdir().unwrap();
        let run = ClusterRun::in_dir(dir.path(), 90);
        fs::write(&run.centroids, ">a\nACGT\n").unwrap();
        fs::write(&run.uclust, "S\t0\t4\t*\t*\t*\t*\t*\ta\t*\n").unwrap();

        // The executable does not exist, so reaching it would fail.
        let v = Vsearch::new(dir.path().join("no-such-vsearch"), 1);
        let got = v.cluster(Path::new("genes.ffn"), 90, dir.path()).unwrap();
        assert_eq!(got, run);
    }

    #[test]
    fn test_failed_run_sets_partial_output_aside() {
        let dir = tempfile::tempdir().unwrap();
        let run = ClusterRun::in_dir(dir.path(), 85);
        fs::write(&run.uclust, "partial").unwrap();

        let v = Vsearch::new(dir.path().join("no-such-vsearch"), 1);
        assert!(v.cluster(Path::new("genes.ffn"), 85, dir.path()).is_err());
        assert!(!run.uclust.exists());
        assert!(dir.path().join("uclust.85.txt.bogus").exists());
    }

    #[test]
    fn test_find_executable_resolves_relative_path() {
        // Tests run from the package root.
        let found = find_executable("src/clustering.rs").unwrap();
        assert!(found.is_absolute());
        assert!(found.ends_with("src/clustering.rs"));
        assert!(found.is_file());
    }

    #[test]
    fn test_find_executable_missing() {
        assert!(find_executable("definitely-not-a-real-tool-xyz").is_err());
        assert!(find_executable("/definitely/not/here").is_err());
    }
}
