//! CouplerError: unified error type for mesh-coupler public APIs
//!
//! Every fallible operation in the crate returns `Result<_, CouplerError>`.
//! None of them abort the process: the decision to terminate is made once,
//! at the top of the calling application, through [`exit_on_fatal`].

use crate::data::registry::{DecompId, GridId};
use thiserror::Error;

/// Broad classification of a [`CouplerError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Source and destination grids or decompositions are not compatible.
    Structural,
    /// A local-to-global index or weight index lies outside its index space.
    OutOfRange,
    /// Processes do not collectively cover the global index space exactly once.
    Coverage,
    /// Message passing failed or delivered malformed data.
    Transport,
    /// The caller asked for something that does not exist or is inconsistent.
    Usage,
}

/// Unified error type for mesh-coupler operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CouplerError {
    /// Two decompositions routed against each other disagree on the global size.
    #[error(
        "global size mismatch: decomposition `{src_decomp}` has {src_size} cells but `{dst_decomp}` has {dst_size}"
    )]
    GlobalSizeMismatch {
        src_decomp: String,
        src_size: u64,
        dst_decomp: String,
        dst_size: u64,
    },
    /// Grids expected to be structurally compatible are not.
    #[error("grid `{src_grid}` is incompatible with grid `{dst_grid}`: {reason}")]
    GridMismatch {
        src_grid: String,
        dst_grid: String,
        reason: String,
    },
    /// A grid definition is internally inconsistent.
    #[error("invalid grid `{grid}`: {reason}")]
    InvalidGrid { grid: String, reason: String },
    /// A non-sentinel local-to-global entry is outside `[0, global_size)`.
    #[error(
        "decomposition `{decomp}`: local cell {local} maps to global index {global}, outside [0, {global_size})"
    )]
    IndexOutOfRange {
        decomp: String,
        local: usize,
        global: u64,
        global_size: u64,
    },
    /// No process provides data for a global cell.
    #[error("decomposition `{decomp}`: no process provides data for global cell {cell}")]
    MissingCoverage { decomp: String, cell: u64 },
    /// More than one process provides data for the same global cell.
    #[error(
        "decomposition `{decomp}`: global cell {cell} is provided by processes {first_rank} and {second_rank}"
    )]
    DuplicateCoverage {
        decomp: String,
        cell: u64,
        first_rank: usize,
        second_rank: usize,
    },
    /// A remap triplet refers to a cell outside its grid.
    #[error("remap weights `{operator}`: triplet {triplet} has {side} index {index}, outside [0, {size})")]
    WeightIndexOutOfRange {
        operator: String,
        triplet: usize,
        side: &'static str,
        index: usize,
        size: usize,
    },
    /// Weight arrays of different lengths were supplied.
    #[error("remap weights `{operator}`: {detail}")]
    InvalidWeights { operator: String, detail: String },
    /// A conservative operator produced a destination row that does not sum to 0 or 1.
    #[error(
        "remap weights `{operator}`: destination cell {cell} has weight sum {sum}, expected 0 or 1 within {tolerance}"
    )]
    NotConservative {
        operator: String,
        cell: usize,
        sum: f64,
        tolerance: f64,
    },
    /// A remap operator could not produce weights for the given grids.
    #[error("remap operator `{operator}` failed: {reason}")]
    OperatorFailed { operator: String, reason: String },
    /// Source and destination axis orders are not permutations of each other.
    #[error("cannot interchange dimensions: {0}")]
    InvalidInterchange(String),
    /// A caller-supplied buffer has the wrong length.
    #[error("buffer `{what}` has length {got}, expected {expected}")]
    BufferSizeMismatch {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    /// A segment list or router violates its structural invariants.
    #[error("invalid route: {0}")]
    InvalidRoute(String),
    /// A router was asked about a remote process it does not know.
    #[error("router {router} has no {direction} segments for remote process {remote}")]
    UnknownRemote {
        router: String,
        direction: &'static str,
        remote: usize,
    },
    /// Grid handle not present in the registry.
    #[error("unknown grid handle {0:?}")]
    UnknownGrid(GridId),
    /// Grid name not present in the registry.
    #[error("unknown grid name `{0}`")]
    UnknownGridName(String),
    /// Decomposition handle not present in the registry.
    #[error("unknown decomposition handle {0:?}")]
    UnknownDecomp(DecompId),
    /// A name was registered twice with a different definition.
    #[error("`{0}` is already registered with a different definition")]
    DuplicateRegistration(String),
    /// A component group was defined without any process.
    #[error("component group `{0}` has no processes")]
    EmptyGroup(String),
    /// Communication with a neighbor failed.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: CommFailure,
    },
    /// Data received over the wire could not be decoded.
    #[error("malformed wire data: {0}")]
    Wire(String),
}

/// Description of a transport-level failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct CommFailure(pub String);

impl From<String> for CommFailure {
    fn from(s: String) -> Self {
        CommFailure(s)
    }
}

impl From<&str> for CommFailure {
    fn from(s: &str) -> Self {
        CommFailure(s.to_owned())
    }
}

impl CouplerError {
    /// Which class of failure this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        use CouplerError::*;
        match self {
            GlobalSizeMismatch { .. }
            | GridMismatch { .. }
            | InvalidGrid { .. }
            | InvalidInterchange(_)
            | InvalidRoute(_)
            | NotConservative { .. }
            | OperatorFailed { .. } => ErrorCategory::Structural,
            IndexOutOfRange { .. } | WeightIndexOutOfRange { .. } => ErrorCategory::OutOfRange,
            MissingCoverage { .. } | DuplicateCoverage { .. } => ErrorCategory::Coverage,
            CommError { .. } | Wire(_) => ErrorCategory::Transport,
            InvalidWeights { .. }
            | BufferSizeMismatch { .. }
            | UnknownRemote { .. }
            | UnknownGrid(_)
            | UnknownGridName(_)
            | UnknownDecomp(_)
            | DuplicateRegistration(_)
            | EmptyGroup(_) => ErrorCategory::Usage,
        }
    }
}

/// Process exit code used by [`exit_on_fatal`].
pub const FATAL_EXIT_CODE: i32 = 2;

/// Top-level boundary that turns an unrecoverable error into process termination.
///
/// Library code never calls this; coupled applications wrap their calls into
/// the core with it so that a structurally invalid configuration stops the
/// run with a diagnostic instead of being retried.
pub fn exit_on_fatal<T>(result: Result<T, CouplerError>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => {
            log::error!("fatal coupling error ({:?}): {e}", e.category());
            eprintln!("mesh-coupler: fatal error: {e}");
            std::process::exit(FATAL_EXIT_CODE);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_name_the_offender() {
        let e = CouplerError::MissingCoverage {
            decomp: "ocn_decomp".into(),
            cell: 17,
        };
        assert_eq!(
            e.to_string(),
            "decomposition `ocn_decomp`: no process provides data for global cell 17"
        );
        assert_eq!(e.category(), ErrorCategory::Coverage);
    }

    #[test]
    fn comm_error_keeps_source() {
        use std::error::Error;
        let e = CouplerError::CommError {
            neighbor: 3,
            source: "timed out".into(),
        };
        assert_eq!(e.category(), ErrorCategory::Transport);
        assert_eq!(e.source().map(|s| s.to_string()), Some("timed out".into()));
    }

    #[test]
    fn categories_cover_structural_and_usage() {
        assert_eq!(
            CouplerError::InvalidInterchange("x".into()).category(),
            ErrorCategory::Structural
        );
        assert_eq!(
            CouplerError::GridMismatch {
                src_grid: "a".into(),
                dst_grid: "b".into(),
                reason: "sizes".into(),
            }
            .category(),
            ErrorCategory::Structural
        );
        assert_eq!(CouplerError::EmptyGroup("ocn".into()).category(), ErrorCategory::Usage);
    }

    #[test]
    fn exit_on_fatal_passes_ok_through() {
        assert_eq!(exit_on_fatal::<u8>(Ok(7)), 7);
    }
}
