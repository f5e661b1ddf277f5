//! recluster - per-species pangenome centroid reclustering
//!
//! Builds the multi-threshold centroid table of a pangenome database, one
//! species at a time, each species in its own worker process.
//!
//! # Modules
//! - `threshold`: ordered clustering thresholds (finest first)
//! - `uclust`: vsearch `.uc` cluster-assignment parsing
//! - `seqio`: FASTA reading with gzip support
//! - `clustering`: clustering tool adapter (vsearch)
//! - `xref`: centroid cross-referencing across thresholds
//! - `limiter`: build concurrency limiter
//! - `layout`: database paths, probing and atomic publishing
//! - `toc`: species table of contents and species selection
//! - `worker`: worker tasks, process re-entry and the per-species build
//! - `orchestrator`: existence checks and dispatch of species builds
//! - `error`: fatal error types and worker exit codes

pub mod threshold;
pub mod uclust;
pub mod seqio;
pub mod clustering;
pub mod xref;
pub mod limiter;
pub mod layout;
pub mod toc;
pub mod worker;
pub mod orchestrator;
pub mod error;
