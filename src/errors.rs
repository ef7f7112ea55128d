//! Error taxonomy for the calling pipeline
//!

use thiserror::Error;

use crate::genome_region::GenomeRegion;

/// Errors scoped to a single active sub-region
///
/// These are the only errors recovered during a run: the offending sub-region is logged and
/// skipped, and processing continues with the next sub-region.
///
#[derive(Error, Debug, Clone)]
pub enum RegionError {
    /// The haplotype tree exceeded the hard overflow limit even after all holdout retries
    #[error(
        "haplotype count exceeded overflow limit {limit} in sub-region {region:?} after {holdout_depth} holdout rounds"
    )]
    HaplotypeOverflow {
        region: GenomeRegion,
        limit: usize,
        holdout_depth: usize,
    },
}

/// Fatal errors propagated to the top-level driver
///
#[derive(Error, Debug)]
pub enum MorayError {
    /// Conflicting or missing options, surfaced before any processing
    #[error("Invalid command-line setting: {0}")]
    Usage(String),

    /// Unreadable reference/read file, missing index, or malformed record
    #[error("Input data error: {0}")]
    InputData(String),

    /// Invariant violation in the calling pipeline
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MorayError {
    pub fn usage(msg: impl Into<String>) -> Self {
        Self::Usage(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::InputData(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Process exit code for each error class
    ///
    /// Usage errors exit 1, input data errors 2, internal errors 3.
    ///
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Usage(_) => 1,
            Self::InputData(_) => 2,
            Self::Internal(_) => 3,
        }
    }
}

pub type MorayResult<T> = Result<T, MorayError>;
