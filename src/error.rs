//! Fatal error types and the worker exit-code contract.
//!
//! Worker processes report how they failed through their exit status so the
//! master can tell a broken tool run apart from corrupted input or misuse.

use thiserror::Error;

/// Input-consistency failures found while cross-referencing cluster files.
///
/// These are never retried: they mean two genomes produced clashing
/// sequence identifiers upstream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XrefError {
    #[error(
        "The {finest}-centroid relation should be idempotent, however centroid {representative} \
         (used at {threshold}%) maps to {found} at {finest}%"
    )]
    NotIdempotent {
        finest: u8,
        threshold: u8,
        representative: String,
        found: String,
    },

    #[error("Representative {representative} (seen at {threshold}%) has no {finest}% assignment")]
    MissingRepresentative {
        finest: u8,
        threshold: u8,
        representative: String,
    },

    #[error("Representative {representative} of gene {gene} is missing from the {threshold}% clustering")]
    MissingCoarser {
        threshold: u8,
        gene: String,
        representative: String,
    },

    #[error("Gene {gene} is assigned twice at {threshold}% ({first} and {second})")]
    DuplicateAssignment {
        threshold: u8,
        gene: String,
        first: String,
        second: String,
    },

    #[error("No cluster assignment supplied for the {threshold}% threshold")]
    MissingThreshold { threshold: u8 },
}

/// Programming-contract failures: the worker was invoked the wrong way.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("Please do not call the recluster worker directly. Violation: missing --zzz-worker-mode")]
    NotWorkerMode,

    #[error("Species {0} is not in the database")]
    UnknownSpecies(String),

    #[error("Worker mode requires exactly one species, got {0:?}")]
    SpeciesSelector(String),
}

/// A worker process exited unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Worker for species {species} failed ({kind}, exit code {code:?}); see {}", .log.display())]
pub struct WorkerFailed {
    pub species: String,
    pub kind: FailureKind,
    pub code: Option<i32>,
    pub log: std::path::PathBuf,
}

pub const EXIT_OK: i32 = 0;
pub const EXIT_BUILD_FAILED: i32 = 1;
pub const EXIT_CONTRACT: i32 = 2;
pub const EXIT_INCONSISTENT: i32 = 3;

/// How a unit's build failed, as seen by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Tool invocation, I/O or publish failure.
    Build,
    /// Worker invoked outside its contract.
    Contract,
    /// Clashing or incomplete cluster assignments.
    Inconsistent,
}

impl FailureKind {
    /// Decodes a worker exit status; `None` means killed by a signal.
    pub fn from_exit_code(code: Option<i32>) -> Self {
        match code {
            Some(EXIT_CONTRACT) => FailureKind::Contract,
            Some(EXIT_INCONSISTENT) => FailureKind::Inconsistent,
            _ => FailureKind::Build,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Build => "build",
            FailureKind::Contract => "contract",
            FailureKind::Inconsistent => "inconsistent",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Picks the process exit code for an error bubbling out of the worker.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<XrefError>().is_some() {
            return EXIT_INCONSISTENT;
        }
        if cause.downcast_ref::<ContractViolation>().is_some() {
            return EXIT_CONTRACT;
        }
    }
    EXIT_BUILD_FAILED
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_exit_code_walks_context_chain() {
        let err = Err::<(), _>(XrefError::MissingThreshold { threshold: 95 })
            .context("Cross-referencing species 100001")
            .unwrap_err();
        assert_eq!(exit_code_for(&err), EXIT_INCONSISTENT);

        let err = anyhow::Error::new(ContractViolation::NotWorkerMode);
        assert_eq!(exit_code_for(&err), EXIT_CONTRACT);

        let err = anyhow::anyhow!("vsearch exited with status 1");
        assert_eq!(exit_code_for(&err), EXIT_BUILD_FAILED);
    }

    #[test]
    fn test_failure_kind_decoding() {
        assert_eq!(FailureKind::from_exit_code(Some(EXIT_INCONSISTENT)), FailureKind::Inconsistent);
        assert_eq!(FailureKind::from_exit_code(Some(EXIT_CONTRACT)), FailureKind::Contract);
        assert_eq!(FailureKind::from_exit_code(Some(EXIT_BUILD_FAILED)), FailureKind::Build);
        assert_eq!(FailureKind::from_exit_code(None), FailureKind::Build);
    }

    #[test]
    fn test_idempotence_message_names_identifiers() {
        let err = XrefError::NotIdempotent {
            finest: 99,
            threshold: 95,
            representative: "geneB".into(),
            found: "geneA".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("geneB") && msg.contains("geneA"));
    }
}
