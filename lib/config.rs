//! Construction parameters for a [`StateContainer`][crate::container::StateContainer].

use rand::{ rngs::StdRng, SeedableRng };
use rustc_hash::FxHashSet;
use crate::{
    error::{ Result, SimError },
    qid::Qid,
};

/// Default tolerance used when validating a factorization.
pub const DEFAULT_FACTOR_ATOL: f64 = 1e-7;

/// Simulation parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SimConfig {
    /// Canonical qubit order. Required whenever `initial_state` is given.
    pub qubits: Option<Vec<Qid>>,
    /// Initial computational basis state, as a big-endian index over
    /// `qubits`.
    pub initial_state: u64,
    /// Keep unentangled qubits in separate representations, splitting them
    /// off again after measurements and resets.
    pub split_untangled_states: bool,
    /// Seed for the shared random source; drawn from system entropy if
    /// `None`.
    pub seed: Option<u64>,
    pub factor_atol: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            qubits: None,
            initial_state: 0,
            split_untangled_states: true,
            seed: None,
            factor_atol: DEFAULT_FACTOR_ATOL,
        }
    }
}

impl SimConfig {
    /// Default parameters over `qubits`.
    pub fn new(qubits: Vec<Qid>) -> Self {
        Self { qubits: Some(qubits), ..Self::default() }
    }

    pub fn with_qubits(mut self, qubits: Vec<Qid>) -> Self {
        self.qubits = Some(qubits);
        self
    }

    pub fn with_initial_state(mut self, index: u64) -> Self {
        self.initial_state = index;
        self
    }

    pub fn with_split(mut self, split: bool) -> Self {
        self.split_untangled_states = split;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_factor_atol(mut self, atol: f64) -> Self {
        self.factor_atol = atol;
        self
    }

    /// Check the parameters for consistency and return the qubit order.
    pub fn validate(&self) -> Result<&[Qid]> {
        let Some(qubits) = self.qubits.as_deref() else {
            return Err(SimError::config(
                "must specify qubits if the initial state is an integer"));
        };
        let mut seen: FxHashSet<Qid> = FxHashSet::default();
        if let Some(q) = qubits.iter().find(|q| !seen.insert(**q)) {
            return Err(SimError::config(format!("qubit {} listed twice", q)));
        }
        if let Some(q) = qubits.iter().find(|q| q.dim == 0) {
            return Err(SimError::config(format!("qubit {} has dimension 0", q)));
        }
        if !self.factor_atol.is_finite() || self.factor_atol < 0.0 {
            return Err(SimError::config(
                format!("invalid factoring tolerance {}", self.factor_atol)));
        }
        let in_range
            = qubits.iter()
            .try_fold(1_u64, |acc, q| acc.checked_mul(q.dim as u64))
            .map_or(true, |total| self.initial_state < total);
        if !in_range {
            return Err(SimError::config(format!(
                "initial state {} out of range for {} qubits",
                self.initial_state,
                qubits.len(),
            )));
        }
        Ok(qubits)
    }

    /// Build the shared random source.
    pub fn make_rng(&self) -> StdRng {
        self.seed.map(StdRng::seed_from_u64)
            .unwrap_or_else(StdRng::from_entropy)
    }
}
