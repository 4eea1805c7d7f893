//! Crate-wide error type.

use thiserror::Error;

/// Failures the analysis distinguishes.
///
/// Formula and solver failures are recovered at the classifier boundary:
/// the affected block is logged and skipped, the analysis of the remaining
/// blocks continues. I/O failures on the main input abort the run.
#[derive(Debug, Error)]
pub enum Error {
    /// Syntactic problem in a propositional formula string.
    #[error("formula syntax error at offset {offset}: {message}")]
    Formula { offset: usize, message: String },

    /// The underlying SAT solver rejected the problem.
    #[error("solver error: {0}")]
    Solver(String),

    /// The MUS minimizer produced output we cannot parse.
    #[error("MUS tool output mismatch: {0}")]
    MusFormat(String),

    /// A model file could not be read or has an unusable shape.
    #[error("model file {path}: {message}")]
    Model { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
