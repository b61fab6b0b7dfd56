//! Errors raised while building or evolving a simulated state.
//!
//! Nothing here is retried: every failure is reported synchronously to the
//! caller of the operation that produced it, and any mutation performed
//! before the failing step is left in place.

use thiserror::Error;
use crate::qid::Qid;

/// Every way state evolution can fail.
#[derive(Debug, Error)]
pub enum SimError {
    /// No application strategy accepted an operation and it could not be
    /// decomposed any further.
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A validated factorization found the state to be entangled across the
    /// requested cut.
    #[error("state is not separable on {qubits:?} within tolerance {atol:e}")]
    Factor { qubits: Vec<Qid>, atol: f64 },

    /// An operation's dimensions disagree with the dimensions of the axes it
    /// acts on.
    #[error("shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch { expected: Vec<usize>, found: Vec<usize> },

    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("qubit {0} is not owned by this state")]
    QubitNotFound(Qid),

    /// An operation names the same qubit more than once.
    #[error("qubit {0} is targeted more than once")]
    RepeatedQubit(Qid),

    /// Malformed mixture weights or Kraus operators.
    #[error("invalid channel: {0}")]
    InvalidChannel(String),
}

impl SimError {
    pub(crate) fn unsupported<S>(name: S) -> Self
    where S: Into<String>
    {
        Self::UnsupportedOperation(name.into())
    }

    pub(crate) fn config<S>(msg: S) -> Self
    where S: Into<String>
    {
        Self::Configuration(msg.into())
    }

    pub(crate) fn channel<S>(msg: S) -> Self
    where S: Into<String>
    {
        Self::InvalidChannel(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, SimError>;
