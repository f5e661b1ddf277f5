//! Build Orchestrator Module
//!
//! Drives one reclustering build per species. Every species is first checked
//! for its published `genes_info.tsv`; these checks are cheap metadata lookups and
//! run with the full dispatch parallelism. Species that need building then
//! wait on the build [`Semaphore`] before a worker process is launched, so
//! only a handful of expensive builds run at once.
//!
//! # Per-Species States
//! ```text
//! not started ──check──► skipped                 (exists, not forced)
//!                   └───► in progress ──► published
//!                                     └─► failed
//! ```
//!
//! A failing species never cancels the others; every outcome is collected
//! into the [`BuildReport`].

use anyhow::Result;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::{FailureKind, WorkerFailed};
use crate::layout::{self, Artifact, DbLayout};
use crate::limiter::Semaphore;
use crate::threshold::Thresholds;
use crate::worker::{self, Launcher, WorkerTask};

/// Settings shared by every species build in a run.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Threads handed to each worker (and its clustering runs).
    pub threads: usize,
    /// Threads used to check and dispatch species.
    pub dispatch_threads: usize,
    pub thresholds: Thresholds,
    pub vsearch: PathBuf,
    /// Rebuild even if the destination already exists.
    pub force: bool,
    /// Keep scratch workspaces and reuse them on the next run.
    pub debug: bool,
}

/// Terminal state of one species.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitOutcome {
    Skipped,
    Published,
    Failed { kind: FailureKind, message: String },
}

impl UnitOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            UnitOutcome::Skipped => "skipped",
            UnitOutcome::Published => "published",
            UnitOutcome::Failed { .. } => "failed",
        }
    }
}

/// Per-species outcomes of one orchestrator run, in input order.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub outcomes: Vec<(String, UnitOutcome)>,
    /// Most builds observed in progress at once.
    pub peak_builds: usize,
}

impl BuildReport {
    fn ids_where(&self, pred: impl Fn(&UnitOutcome) -> bool) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(id, _)| id.as_str())
            .collect()
    }

    pub fn published(&self) -> Vec<&str> {
        self.ids_where(|o| *o == UnitOutcome::Published)
    }

    pub fn skipped(&self) -> Vec<&str> {
        self.ids_where(|o| *o == UnitOutcome::Skipped)
    }

    pub fn failed(&self) -> Vec<&str> {
        self.ids_where(|o| matches!(o, UnitOutcome::Failed { .. }))
    }

    pub fn outcome(&self, species_id: &str) -> Option<&UnitOutcome> {
        self.outcomes
            .iter()
            .find(|(id, _)| id == species_id)
            .map(|(_, o)| o)
    }

    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }
}

/// Coordinates probing, bounded building and publishing of species.
pub struct Orchestrator<'a, L: Launcher> {
    layout: &'a DbLayout,
    config: &'a BuildConfig,
    launcher: &'a L,
    limiter: &'a Semaphore,
}

impl<'a, L: Launcher> Orchestrator<'a, L> {
    pub fn new(
        layout: &'a DbLayout,
        config: &'a BuildConfig,
        launcher: &'a L,
        limiter: &'a Semaphore,
    ) -> Self {
        Self {
            layout,
            config,
            launcher,
            limiter,
        }
    }

    /// Builds every listed species and reports each outcome.
    ///
    /// Only pool construction can fail; per-species failures are recorded
    /// in the report.
    pub fn run(&self, species_ids: &[String]) -> Result<BuildReport> {
        let start = Instant::now();
        let threads = self
            .config
            .dispatch_threads
            .max(self.limiter.capacity())
            .max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("recluster-dispatch-{}", i))
            .build()?;

        info!(
            "Processing {} species ({} dispatch threads, {} concurrent builds)",
            species_ids.len(),
            threads,
            self.limiter.capacity()
        );

        let outcomes: Vec<(String, UnitOutcome)> = pool.install(|| {
            species_ids
                .par_iter()
                .map(|id| (id.clone(), self.species_work(id)))
                .collect()
        });

        let report = BuildReport {
            outcomes,
            peak_builds: self.limiter.peak(),
        };
        info!(
            "Finished in {:.1}s: {} published, {} skipped, {} failed",
            start.elapsed().as_secs_f64(),
            report.published().len(),
            report.skipped().len(),
            report.failed().len()
        );
        Ok(report)
    }

    fn species_work(&self, species_id: &str) -> UnitOutcome {
        let dest = self.layout.artifact(species_id, Artifact::GeneInfo);
        let mut msg = format!("Reclustering centroids for species {}.", species_id);

        if self.layout.exists(species_id, Artifact::GeneInfo) {
            if !self.config.force {
                info!(
                    "Destination {} for species {} already exists.  Specify --force to overwrite.",
                    dest.display(),
                    species_id
                );
                return UnitOutcome::Skipped;
            }
            msg = format!("Rebuilding centroids for species {}.", species_id);
        }

        let scratch = self.layout.worker_subdir(species_id);
        let _permit = self.limiter.acquire();
        info!("{}", msg);

        let result = self.build(species_id, &scratch);

        if !self.config.debug {
            if let Err(e) = layout::remove_scratch(&scratch) {
                warn!("Species {}: {:#}", species_id, e);
            }
        }

        match result {
            Ok(()) => {
                info!("Published species {} to {}", species_id, dest.display());
                UnitOutcome::Published
            }
            Err(e) => {
                error!("ERROR processing species {}: {:#}", species_id, e);
                let kind = e
                    .downcast_ref::<WorkerFailed>()
                    .map(|w| w.kind)
                    .unwrap_or(FailureKind::Build);
                UnitOutcome::Failed {
                    kind,
                    message: format!("{:#}", e),
                }
            }
        }
    }

    fn build(&self, species_id: &str, scratch: &Path) -> Result<()> {
        if layout::prepare_scratch(scratch, self.config.debug)? {
            info!("Reusing scratch workspace {}", scratch.display());
        }

        let task = WorkerTask {
            species_id: species_id.to_string(),
            db_dir: self.layout.root().to_path_buf(),
            scratch_root: self.layout.scratch_root().to_path_buf(),
            threads: self.config.threads,
            thresholds: self.config.thresholds.clone(),
            vsearch: self.config.vsearch.clone(),
            force: self.config.force,
            debug: self.config.debug,
            worker_mode: true,
        };
        let log = self.layout.worker_log(species_id);

        let exit = self.launcher.launch(&task, scratch, &log)?;
        if !exit.is_success() {
            return Err(WorkerFailed {
                species: species_id.to_string(),
                kind: exit.failure_kind(),
                code: exit.code,
                log,
            }
            .into());
        }

        // genes_info.tsv goes last: its presence marks a finished species.
        let (centroids, gene_info) = worker::staged_outputs(scratch, &self.config.thresholds);
        layout::publish(&centroids, &self.layout.artifact(species_id, Artifact::Centroids))?;
        layout::publish(&gene_info, &self.layout.artifact(species_id, Artifact::GeneInfo))?;
        Ok(())
    }
}
