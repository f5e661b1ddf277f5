//! Worker Process Module
//!
//! One species is built per worker process. The master describes the build as
//! a [`WorkerTask`] and hands it to a [`Launcher`]; the production launcher
//! re-executes this binary in hidden worker mode with output captured to a
//! per-species log, so a crash or resource blow-up stays inside that species.
//!
//! # Worker Steps
//! 1. Cluster the full gene set at the finest threshold
//! 2. Recluster the finest representatives at every coarser threshold (in parallel)
//! 3. Cross-reference all assignments into `genes_info.tsv`
//!
//! Outputs are staged in the scratch workspace; publishing is the master's job.

use anyhow::{Context, Result};
use rayon::prelude::*;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::info;

use crate::clustering::{ClusterRun, Clusterer};
use crate::error::{ContractViolation, FailureKind, EXIT_OK};
use crate::layout::{self, DbLayout};
use crate::seqio;
use crate::threshold::Thresholds;
use crate::toc::Toc;
use crate::xref;

/// Hidden flag marking a re-entered worker invocation.
pub const WORKER_MODE_FLAG: &str = "--zzz-worker-mode";

/// Everything a worker needs to build one species.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerTask {
    pub species_id: String,
    pub db_dir: PathBuf,
    pub scratch_root: PathBuf,
    pub threads: usize,
    pub thresholds: Thresholds,
    pub vsearch: PathBuf,
    pub force: bool,
    pub debug: bool,
    /// Set only on re-entered invocations.
    pub worker_mode: bool,
}

impl WorkerTask {
    pub fn layout(&self) -> DbLayout {
        DbLayout::new(&self.db_dir, &self.scratch_root)
    }

    /// Command-line arguments that reproduce this task in a worker process.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            WORKER_MODE_FLAG.into(),
            "--species".into(),
            self.species_id.clone().into(),
            "--threads".into(),
            self.threads.to_string().into(),
            "--db-dir".into(),
            self.db_dir.clone().into(),
            "--scratch-dir".into(),
            self.scratch_root.clone().into(),
            "--thresholds".into(),
            self.thresholds.to_string().into(),
            "--vsearch".into(),
            self.vsearch.clone().into(),
        ];
        if self.force {
            args.push("--force".into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        args
    }
}

/// Exit status of a finished worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl WorkerExit {
    pub fn is_success(&self) -> bool {
        self.code == Some(EXIT_OK)
    }

    pub fn failure_kind(&self) -> FailureKind {
        FailureKind::from_exit_code(self.code)
    }
}

/// Runs a worker task to completion and reports how it exited.
///
/// Called concurrently from the dispatch pool, one call per species.
pub trait Launcher: Sync {
    fn launch(&self, task: &WorkerTask, workdir: &Path, log: &Path) -> Result<WorkerExit>;
}

/// Re-executes an executable (normally this program) in worker mode.
#[derive(Debug, Clone)]
pub struct ReentryLauncher {
    exe: PathBuf,
}

impl ReentryLauncher {
    pub fn new<P: Into<PathBuf>>(exe: P) -> Self {
        Self { exe: exe.into() }
    }

    /// Launcher for the currently running binary.
    pub fn current() -> Result<Self> {
        let exe = std::env::current_exe().context("Cannot locate the running executable")?;
        Ok(Self::new(exe))
    }

    fn command_line(&self, task: &WorkerTask) -> String {
        let mut line = self.exe.display().to_string();
        for arg in task.to_args() {
            line.push(' ');
            line.push_str(&arg.to_string_lossy());
        }
        line
    }
}

impl Launcher for ReentryLauncher {
    fn launch(&self, task: &WorkerTask, workdir: &Path, log: &Path) -> Result<WorkerExit> {
        if let Some(parent) = log.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
        }

        let mut log_file = File::create(log)
            .with_context(|| format!("Failed to create worker log {}", log.display()))?;
        writeln!(log_file, "Reclustering centroids for species {}", task.species_id)?;
        writeln!(log_file, "{}", self.command_line(task))?;
        log_file.flush()?;

        let stderr = log_file.try_clone()?;
        let status = Command::new(&self.exe)
            .args(task.to_args())
            .current_dir(workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr))
            .status()
            .with_context(|| format!("Failed to start worker {}", self.exe.display()))?;

        Ok(WorkerExit {
            code: status.code(),
        })
    }
}

/// What a successful worker produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub genes: usize,
    pub representatives: usize,
    pub centroids: PathBuf,
    pub gene_info: PathBuf,
}

/// Staged file locations for a species workspace.
pub fn staged_outputs(workdir: &Path, thresholds: &Thresholds) -> (PathBuf, PathBuf) {
    (
        workdir.join(layout::staged_centroids(thresholds.finest())),
        workdir.join(layout::GENE_INFO_FILE),
    )
}

/// Builds one species inside a worker process.
pub fn run_worker(task: &WorkerTask, clusterer: &dyn Clusterer) -> Result<WorkerSummary> {
    if !task.worker_mode {
        return Err(ContractViolation::NotWorkerMode.into());
    }

    let layout = task.layout();
    let toc = Toc::load(&layout.toc())?;
    let species = toc
        .get(&task.species_id)
        .ok_or_else(|| ContractViolation::UnknownSpecies(task.species_id.clone()))?;

    info!(
        "Worker for species {} ({} genomes), thresholds {}{}{}",
        species.id,
        species.genomes.len(),
        task.thresholds,
        if task.force { ", forced" } else { "" },
        if task.debug { ", debug" } else { "" }
    );

    let workdir = layout.worker_subdir(&species.id);
    fs::create_dir_all(&workdir)
        .with_context(|| format!("Failed to create {}", workdir.display()))?;

    let genes = layout.genes(&species.id);
    if !genes.is_file() {
        anyhow::bail!("Gene sequences not found for species {}: {}", species.id, genes.display());
    }

    let finest = task.thresholds.finest();
    info!("  [1/3] Clustering genes at {}% identity...", finest);
    let finest_run = clusterer
        .cluster(&genes, finest, &workdir)
        .with_context(|| format!("Clustering species {} at {}%", species.id, finest))?;
    let rep_stats = seqio::stats(&finest_run.centroids)?;
    info!("        {} representatives at {}%", rep_stats.records, finest);

    info!(
        "  [2/3] Reclustering {}% representatives at {:?}...",
        finest,
        task.thresholds.coarser()
    );
    let coarser_runs: Vec<ClusterRun> = task
        .thresholds
        .coarser()
        .par_iter()
        .map(|&pct| {
            clusterer
                .cluster(&finest_run.centroids, pct, &workdir)
                .with_context(|| format!("Reclustering species {} at {}%", species.id, pct))
        })
        .collect::<Result<_>>()?;

    info!("  [3/3] Cross-referencing centroids...");
    let mut uc_files = Vec::with_capacity(task.thresholds.len());
    uc_files.push(finest_run.uclust.clone());
    uc_files.extend(coarser_runs.iter().map(|r| r.uclust.clone()));

    let (centroids, gene_info) = staged_outputs(&workdir, &task.thresholds);
    let genes_written = xref::xref_files(&task.thresholds, &uc_files, &gene_info)
        .with_context(|| format!("Cross-referencing species {}", species.id))?;
    info!("        {} genes written to {}", genes_written, gene_info.display());

    Ok(WorkerSummary {
        genes: genes_written,
        representatives: rep_stats.records,
        centroids,
        gene_info,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{exit_code_for, EXIT_CONTRACT, EXIT_INCONSISTENT, XrefError};
    use std::sync::Mutex;

    /// Clusters by sequence identity: genes with the same sequence share the
    /// first-seen gene as centroid at `percent >= split`, and everything
    /// collapses onto the first gene below it.
    struct FakeClusterer {
        split: u8,
        calls: Mutex<Vec<(PathBuf, u8)>>,
    }

    impl FakeClusterer {
        fn new(split: u8) -> Self {
            Self {
                split,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl Clusterer for FakeClusterer {
        fn cluster(&self, sequences: &Path, percent: u8, workdir: &Path) -> Result<ClusterRun> {
            self.calls.lock().unwrap().push((sequences.to_path_buf(), percent));
            let run = ClusterRun::in_dir(workdir, percent);

            let mut records = Vec::new();
            let mut reader = seqio::FastaFile::open(sequences)?;
            while let Some(r) = reader.read_next()? {
                records.push(r);
            }

            let mut uc = String::new();
            let mut fasta = String::new();
            let mut seeds: Vec<(String, String)> = Vec::new();
            for r in &records {
                let centroid = if percent >= self.split {
                    seeds.iter().find(|(_, s)| *s == r.seq).map(|(n, _)| n.clone())
                } else {
                    seeds.first().map(|(n, _)| n.clone())
                };
                match centroid {
                    Some(c) => uc.push_str(&format!("H\t0\t0\t99.0\t+\t0\t0\t*\t{}\t{}\n", r.name, c)),
                    None => {
                        uc.push_str(&format!("S\t0\t0\t*\t*\t*\t*\t*\t{}\t*\n", r.name));
                        fasta.push_str(&format!(">{}\n{}\n", r.name, r.seq));
                        seeds.push((r.name.clone(), r.seq.clone()));
                    }
                }
            }
            fs::write(&run.uclust, uc)?;
            fs::write(&run.centroids, fasta)?;
            Ok(run)
        }
    }

    fn setup(dir: &Path, worker_mode: bool) -> WorkerTask {
        let db = dir.join("db");
        fs::create_dir_all(db.join("pangenomes").join("100001")).unwrap();
        fs::write(db.join("genomes.tsv"), "genome\tspecies\nG1\t100001\nG2\t100001\n").unwrap();
        fs::write(
            db.join("pangenomes").join("100001").join("genes.ffn"),
            ">g1\nAAAA\n>g2\nAAAA\n>g3\nCCCC\n>g4\nGGGG\n",
        )
        .unwrap();

        WorkerTask {
            species_id: "100001".into(),
            db_dir: db,
            scratch_root: dir.join("scratch"),
            threads: 2,
            thresholds: Thresholds::parse("99,95,80").unwrap(),
            vsearch: PathBuf::from("vsearch"),
            force: false,
            debug: false,
            worker_mode,
        }
    }

    #[test]
    fn test_worker_builds_gene_info() {
        let dir = tempfile::tempdir().unwrap();
        let task = setup(dir.path(), true);
        let clusterer = FakeClusterer::new(90);

        let summary = run_worker(&task, &clusterer).unwrap();
        assert_eq!(summary.genes, 4);
        assert_eq!(summary.representatives, 3);

        let text = fs::read_to_string(&summary.gene_info).unwrap();
        assert_eq!(
            text,
            "gene_id\tcentroid_99\tcentroid_95\tcentroid_80\n\
             g1\tg1\tg1\tg1\n\
             g2\tg1\tg1\tg1\n\
             g3\tg3\tg3\tg1\n\
             g4\tg4\tg4\tg1\n"
        );
        assert!(summary.centroids.is_file());

        // Finest run sees the full gene set, coarser runs only the representatives.
        let calls = clusterer.calls.lock().unwrap();
        assert_eq!(calls.len(), 3);
        let finest_input = &calls.iter().find(|(_, p)| *p == 99).unwrap().0;
        assert!(finest_input.ends_with("genes.ffn"));
        assert!(calls
            .iter()
            .filter(|(_, p)| *p != 99)
            .all(|(input, _)| input.ends_with("centroids.99.ffn")));
    }

    #[test]
    fn test_direct_invocation_is_contract_violation() {
        let dir = tempfile::tempdir().unwrap();
        let task = setup(dir.path(), false);
        let err = run_worker(&task, &FakeClusterer::new(90)).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONTRACT);
        assert_eq!(
            err.downcast_ref::<ContractViolation>(),
            Some(&ContractViolation::NotWorkerMode)
        );
    }

    #[test]
    fn test_unknown_species_is_contract_violation() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = setup(dir.path(), true);
        task.species_id = "999999".into();
        let err = run_worker(&task, &FakeClusterer::new(90)).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_CONTRACT);
    }

    #[test]
    fn test_clashing_ids_abort_with_inconsistency() {
        struct ClashingClusterer;
        impl Clusterer for ClashingClusterer {
            fn cluster(&self, _sequences: &Path, percent: u8, workdir: &Path) -> Result<ClusterRun> {
                let run = ClusterRun::in_dir(workdir, percent);
                fs::write(&run.centroids, ">a\nAAAA\n>b\nCCCC\n")?;
                let uc = if percent == 99 {
                    // "b" is a centroid at 95% but a member of "a" at 99%.
                    "S\t0\t4\t*\t*\t*\t*\t*\ta\t*\nH\t0\t4\t99.5\t+\t0\t0\t*\tb\ta\n"
                } else {
                    "S\t0\t4\t*\t*\t*\t*\t*\ta\t*\nS\t1\t4\t*\t*\t*\t*\t*\tb\t*\n"
                };
                fs::write(&run.uclust, uc)?;
                Ok(run)
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut task = setup(dir.path(), true);
        task.thresholds = Thresholds::parse("99,95").unwrap();

        let err = run_worker(&task, &ClashingClusterer).unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_INCONSISTENT);
        assert!(err.chain().any(|c| matches!(
            c.downcast_ref::<XrefError>(),
            Some(XrefError::NotIdempotent { .. })
        )));
        let (_, gene_info) = staged_outputs(&task.layout().worker_subdir("100001"), &task.thresholds);
        assert!(!gene_info.exists());
    }

    #[test]
    fn test_task_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let mut task = setup(dir.path(), true);
        task.debug = true;
        let args: Vec<String> = task
            .to_args()
            .into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(args[0], WORKER_MODE_FLAG);
        assert_eq!(args[1..3], ["--species".to_string(), "100001".to_string()]);
        assert!(args.windows(2).any(|w| w[0] == "--thresholds" && w[1] == "99,95,80"));
        assert!(args.contains(&"--debug".to_string()));
        assert!(!args.contains(&"--force".to_string()));
    }

    #[cfg(unix)]
    #[test]
    fn test_reentry_launcher_captures_log_and_status() {
        let dir = tempfile::tempdir().unwrap();
        let task = setup(dir.path(), true);
        let log = dir.path().join("logs").join("100001.log");

        let ok = ReentryLauncher::new("/bin/true")
            .launch(&task, dir.path(), &log)
            .unwrap();
        assert!(ok.is_success());
        let text = fs::read_to_string(&log).unwrap();
        assert!(text.starts_with("Reclustering centroids for species 100001"));
        assert!(text.contains(WORKER_MODE_FLAG));

        let failed = ReentryLauncher::new("/bin/false")
            .launch(&task, dir.path(), &log)
            .unwrap();
        assert!(!failed.is_success());
        assert_eq!(failed.failure_kind(), FailureKind::Build);
    }
}
