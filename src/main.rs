use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use recluster::clustering::{find_executable, Vsearch};
use recluster::error::{exit_code_for, ContractViolation};
use recluster::layout::DbLayout;
use recluster::limiter::{default_build_slots, Semaphore};
use recluster::orchestrator::{BuildConfig, Orchestrator, UnitOutcome};
use recluster::threshold::{parse_thresholds, Thresholds};
use recluster::toc::Toc;
use recluster::worker::{run_worker, ReentryLauncher, WorkerTask};

#[derive(Parser)]
#[command(name = "recluster")]
#[command(version)]
#[command(about = "Recluster pangenome centroids at coarser identities and cross-reference them")]
#[command(long_about = r#"
recluster - multi-threshold centroid table builder for pangenome databases

For every selected species:
  1. Clusters pangenomes/{species}/genes.ffn at the finest identity (vsearch)
  2. Reclusters the finest centroids at every coarser identity
  3. Cross-references all levels into one row per gene
  4. Publishes centroids.ffn and genes_info.tsv

Species whose genes_info.tsv already exists are skipped unless --force is given.
Each species is built in its own worker process; its output goes to
logs/recluster/{species}.log under the database directory.

SPECIES SELECTION:
  all          Every species in genomes.tsv
  a,b,c        An explicit list of species ids
  i:m          Numeric species ids with id % m == i

EXAMPLES:
  recluster -s all --db-dir /data/db -t 32
  recluster -s 100001,100002 --db-dir /data/db --force
  recluster -s 3:10 --db-dir /data/db --scratch-dir /scratch --debug
"#)]
struct Args {
    #[arg(short = 's', long, value_name = "SPECIES", help_heading = "Input")]
    species: String,

    #[arg(long = "db-dir", value_name = "DIR", default_value = ".", help_heading = "Input")]
    db_dir: PathBuf,

    #[arg(long, value_name = "LIST", default_value_t = Thresholds::default(),
          value_parser = parse_thresholds, help_heading = "Clustering")]
    thresholds: Thresholds,

    #[arg(long, value_name = "PATH", default_value = "vsearch", help_heading = "Clustering")]
    vsearch: String,

    #[arg(short = 't', long, value_name = "NUM", default_value = "0", help_heading = "Runtime")]
    threads: usize,

    #[arg(short = 'j', long = "concurrent-builds", value_name = "NUM", help_heading = "Runtime")]
    concurrent_builds: Option<usize>,

    #[arg(long = "scratch-dir", value_name = "DIR", default_value = ".", help_heading = "Runtime")]
    scratch_dir: PathBuf,

    #[arg(short = 'f', long, help_heading = "Runtime")]
    force: bool,

    #[arg(long, help_heading = "Runtime")]
    debug: bool,

    #[arg(short = 'v', long, help_heading = "Output")]
    verbose: bool,

    #[arg(long = "zzz-worker-mode", hide = true)]
    zzz_worker_mode: bool,
}

fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let mut args = Args::parse();
    init_logging(args.verbose);

    if args.threads == 0 {
        args.threads = num_cpus::get();
    }

    if args.zzz_worker_mode {
        return match worker_main(&args) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{:#}", e);
                ExitCode::from(exit_code_for(&e) as u8)
            }
        };
    }

    match master_main(&args) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(exit_code_for(&e) as u8)
        }
    }
}

fn worker_main(args: &Args) -> Result<()> {
    if args.species.contains(',') || args.species.contains(':') || args.species == "all" {
        return Err(ContractViolation::SpeciesSelector(args.species.clone()).into());
    }

    let task = worker_task(args);

    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(task.thresholds.coarser().len().max(1))
        .build_global()
    {
        warn!("Could not size the reclustering thread pool: {}", e);
    }

    let clusterer = Vsearch::new(&task.vsearch, task.threads);
    let summary = run_worker(&task, &clusterer)?;
    info!(
        "Species {}: {} genes, {} representatives at {}%",
        task.species_id,
        summary.genes,
        summary.representatives,
        task.thresholds.finest()
    );
    Ok(())
}

/// Rebuilds the task the master rendered with [`WorkerTask::to_args`].
fn worker_task(args: &Args) -> WorkerTask {
    WorkerTask {
        species_id: args.species.clone(),
        db_dir: args.db_dir.clone(),
        scratch_root: args.scratch_dir.clone(),
        threads: args.threads,
        thresholds: args.thresholds.clone(),
        vsearch: PathBuf::from(&args.vsearch),
        force: args.force,
        debug: args.debug,
        worker_mode: args.zzz_worker_mode,
    }
}

fn master_main(args: &Args) -> Result<bool> {
    let db_dir = std::path::absolute(&args.db_dir)
        .with_context(|| format!("Invalid database directory {}", args.db_dir.display()))?;
    let scratch_dir = std::path::absolute(&args.scratch_dir)
        .with_context(|| format!("Invalid scratch directory {}", args.scratch_dir.display()))?;
    let layout = DbLayout::new(db_dir, scratch_dir);

    // Absolute, since workers run with the scratch directory as cwd.
    let vsearch = find_executable(&args.vsearch)?;
    info!("Found vsearch: {}", vsearch.display());

    let toc = Toc::load(&layout.toc())?;
    let species = toc.select(&args.species)?;
    if species.is_empty() {
        anyhow::bail!("No species selected by {:?}", args.species);
    }

    let build_slots = args
        .concurrent_builds
        .unwrap_or_else(|| default_build_slots(args.threads));
    let config = BuildConfig {
        threads: args.threads,
        dispatch_threads: args.threads,
        thresholds: args.thresholds.clone(),
        vsearch,
        force: args.force,
        debug: args.debug,
    };

    let limiter = Semaphore::new(build_slots);
    let launcher = ReentryLauncher::current()?;
    let report = Orchestrator::new(&layout, &config, &launcher, &limiter).run(&species)?;

    for (id, outcome) in &report.outcomes {
        match outcome {
            UnitOutcome::Failed { kind, message } => {
                error!("{}\t{}\t{}\t{}", id, outcome.label(), kind.as_str(), message)
            }
            _ => info!("{}\t{}", id, outcome.label()),
        }
    }
    info!("Peak concurrent builds: {}/{}", report.peak_builds, limiter.capacity());

    Ok(report.is_success())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsString;
    use std::path::Path;

    fn parse(task: &WorkerTask) -> Args {
        let argv = std::iter::once(OsString::from("recluster")).chain(task.to_args());
        Args::try_parse_from(argv).unwrap()
    }

    fn task() -> WorkerTask {
        WorkerTask {
            species_id: "100001".into(),
            db_dir: PathBuf::from("/data/db"),
            scratch_root: PathBuf::from("/scratch"),
            threads: 8,
            thresholds: Thresholds::parse("99,95,80").unwrap(),
            vsearch: PathBuf::from("/opt/vsearch/bin/vsearch"),
            force: false,
            debug: false,
            worker_mode: true,
        }
    }

    #[test]
    fn test_worker_arguments_rebuild_the_task() {
        let task = task();
        let args = parse(&task);

        assert!(args.zzz_worker_mode);
        assert_eq!(args.thresholds.to_string(), "99,95,80");
        assert!(args.db_dir.is_absolute());
        assert!(args.scratch_dir.is_absolute());
        assert!(Path::new(&args.vsearch).is_absolute());
        assert_eq!(worker_task(&args), task);
    }

    #[test]
    fn test_worker_arguments_carry_flags() {
        let mut task = task();
        task.force = true;
        task.debug = true;
        let args = parse(&task);

        assert!(args.force);
        assert!(args.debug);
        assert_eq!(worker_task(&args), task);
    }

    #[test]
    fn test_default_thresholds() {
        let args = Args::try_parse_from(["recluster", "-s", "all"]).unwrap();
        assert_eq!(args.thresholds, Thresholds::default());
        assert!(!args.zzz_worker_mode);
    }
}
