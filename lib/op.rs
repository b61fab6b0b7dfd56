//! Operations and the capability surface that state representations query.
//!
//! An operation advertises what it can do through [`Operation`]: expose a
//! dense unitary, a weighted mixture of unitaries, a list of Kraus operators,
//! a decomposition into simpler operations, a measurement, a reset, or a
//! sequence of stabilizer generators. Before applying an operation, a
//! representation resolves it once into an [`Action`] by checking these
//! capabilities in a fixed priority order given by its own list of
//! [`Strategy`]s.

use std::{ fmt, rc::Rc };
use itertools::Itertools;
use nalgebra as na;
use num_complex::Complex64 as C64;
use rand::{ distributions::{ Distribution, WeightedIndex }, Rng };
use crate::{
    classical::ClassicalDataLog,
    error::{ Result, SimError },
    gate::{ Gate, StabGate },
    qid::{ hilbert_dim, Qid },
};

/// Shared handle to a type-erased operation.
pub type OpRef = Rc<dyn Operation>;

/// Tolerance used when validating channel weights and completeness.
pub const CHANNEL_ATOL: f64 = 1e-8;

/// Capabilities of an operation that can act on a simulated state.
///
/// Every capability except [`qubits`][Self::qubits] defaults to "absent".
pub trait Operation: fmt::Debug {
    /// Target qubits, in the order used by all matrices returned below.
    fn qubits(&self) -> Vec<Qid>;

    /// Human-readable name for error messages.
    fn name(&self) -> String { format!("{:?}", self) }

    fn unitary(&self) -> Option<na::DMatrix<C64>> { None }

    /// Weighted unitary branches; the weights sum to 1.
    fn mixture(&self) -> Option<Vec<(f64, na::DMatrix<C64>)>> { None }

    /// Kraus operators satisfying `Σ K†K = I`.
    fn kraus(&self) -> Option<Vec<na::DMatrix<C64>>> { None }

    fn decompose(&self) -> Option<Vec<OpRef>> { None }

    fn measurement(&self) -> Option<&Measure> { None }

    /// Key under which the index of a sampled mixture or channel branch is
    /// recorded.
    fn channel_key(&self) -> Option<&str> { None }

    fn is_reset(&self) -> bool { false }

    fn is_identity(&self) -> bool { false }

    /// `true` only for an exact two-qubit exchange.
    fn is_swap(&self) -> bool { false }

    fn stabilizer_gates(&self) -> Option<Vec<StabGate>> { None }

    /// A classical condition (measurement key) and the operation it guards.
    fn control(&self) -> Option<(&str, &dyn Operation)> { None }
}

/// A single way of consuming an operation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Strategy {
    Unitary,
    Mixture,
    Channel,
    Stabilizer,
    Decompose,
}

/// Strategy chain for dense state vectors.
pub const DENSE_STRATEGIES: [Strategy; 4] = [
    Strategy::Unitary,
    Strategy::Mixture,
    Strategy::Channel,
    Strategy::Decompose,
];

/// Strategy chain for stabilizer states.
pub const STABILIZER_STRATEGIES: [Strategy; 2] = [
    Strategy::Stabilizer,
    Strategy::Decompose,
];

/// An operation resolved against one strategy chain.
#[derive(Clone, Debug)]
pub enum Action<'a> {
    /// Nothing to do (identity, or an unsatisfied classical condition).
    Skip,
    Measure(&'a Measure),
    Reset(Vec<Qid>),
    Unitary(na::DMatrix<C64>),
    Mixture {
        branches: Vec<(f64, na::DMatrix<C64>)>,
        key: Option<&'a str>,
    },
    Channel {
        ops: Vec<na::DMatrix<C64>>,
        key: Option<&'a str>,
    },
    Stabilizer(Vec<StabGate>),
    Decompose(Vec<OpRef>),
}

impl<'a> Action<'a> {
    /// Resolve `op` into the first action that `strategies` admits, checking
    /// classical control, identity, measurement, and reset first.
    ///
    /// Returns `None` if nothing in the chain accepts the operation.
    pub fn resolve(
        op: &'a dyn Operation,
        log: &ClassicalDataLog,
        strategies: &[Strategy],
    ) -> Option<Self>
    {
        if let Some((key, inner)) = op.control() {
            return if log.condition_holds(key) {
                Self::resolve(inner, log, strategies)
            } else {
                Some(Self::Skip)
            };
        }
        if op.is_identity() { return Some(Self::Skip); }
        if let Some(m) = op.measurement() { return Some(Self::Measure(m)); }
        if op.is_reset() { return Some(Self::Reset(op.qubits())); }
        strategies.iter()
            .find_map(|strat| {
                match strat {
                    Strategy::Unitary => op.unitary().map(Self::Unitary),
                    Strategy::Mixture => op.mixture()
                        .map(|branches| {
                            Self::Mixture { branches, key: op.channel_key() }
                        }),
                    Strategy::Channel => op.kraus()
                        .map(|ops| Self::Channel { ops, key: op.channel_key() }),
                    Strategy::Stabilizer
                        => op.stabilizer_gates().map(Self::Stabilizer),
                    Strategy::Decompose => op.decompose().map(Self::Decompose),
                }
            })
    }
}

/// Check that `m` is square and sized for `qubits`.
pub(crate) fn check_square(qubits: &[Qid], m: &na::DMatrix<C64>) -> Result<()> {
    let d = hilbert_dim(qubits);
    if m.nrows() != d || m.ncols() != d {
        return Err(SimError::ShapeMismatch {
            expected: vec![d, d],
            found: vec![m.nrows(), m.ncols()],
        });
    }
    Ok(())
}

/// A stochastic remapping of measured values applied after the state
/// collapses, indexed by the positions of the measured qubits it covers.
#[derive(Clone, Debug, PartialEq)]
pub struct Confusion {
    pub(crate) positions: Vec<usize>,
    pub(crate) matrix: na::DMatrix<f64>,
}

/// Projective measurement in the computational basis.
#[derive(Clone, Debug, PartialEq)]
pub struct Measure {
    pub(crate) qubits: Vec<Qid>,
    pub(crate) key: String,
    pub(crate) invert_mask: Vec<bool>,
    pub(crate) confusion: Vec<Confusion>,
    pub(crate) collapse: bool,
}

impl Measure {
    /// Measure `qubits`, recording the outcome under `key`.
    pub fn new<K>(qubits: Vec<Qid>, key: K) -> Self
    where K: Into<String>
    {
        Self {
            qubits,
            key: key.into(),
            invert_mask: Vec::new(),
            confusion: Vec::new(),
            collapse: true,
        }
    }

    /// Flip the recorded bit for every `true` entry. Shorter masks leave the
    /// remaining qubits untouched; values above 1 are never flipped.
    pub fn with_invert_mask(mut self, mask: Vec<bool>) -> Self {
        self.invert_mask = mask;
        self
    }

    /// Attach a row-stochastic confusion matrix to the measured qubits at
    /// `positions`. Row `i` gives the distribution of recorded values when the
    /// true joint outcome is `i`.
    pub fn with_confusion(mut self, positions: Vec<usize>, matrix: na::DMatrix<f64>)
        -> Result<Self>
    {
        if let Some(&p) = positions.iter().find(|&&p| p >= self.qubits.len()) {
            return Err(SimError::config(
                format!("confusion position {} out of range", p)));
        }
        let sub: Vec<Qid>
            = positions.iter().map(|&p| self.qubits[p]).collect();
        let d = hilbert_dim(&sub);
        if matrix.nrows() != d || matrix.ncols() != d {
            return Err(SimError::ShapeMismatch {
                expected: vec![d, d],
                found: vec![matrix.nrows(), matrix.ncols()],
            });
        }
        let stochastic
            = matrix.row_iter()
            .all(|row| {
                row.iter().all(|&x| x >= 0.0)
                    && (row.sum() - 1.0).abs() < CHANNEL_ATOL
            });
        if !stochastic {
            return Err(SimError::config("confusion matrix rows must be probability distributions"));
        }
        self.confusion.push(Confusion { positions, matrix });
        Ok(self)
    }

    /// Sample the outcome without collapsing the state.
    pub fn non_collapsing(mut self) -> Self {
        self.collapse = false;
        self
    }

    pub fn key(&self) -> &str { &self.key }

    pub fn targets(&self) -> &[Qid] { &self.qubits }

    pub fn collapses(&self) -> bool { self.collapse }

    /// Apply confusion matrices and then the invert mask to raw outcomes.
    pub(crate) fn correct<R>(&self, mut bits: Vec<usize>, rng: &mut R)
        -> Vec<usize>
    where R: Rng + ?Sized
    {
        for conf in self.confusion.iter() {
            let dims: Vec<usize>
                = conf.positions.iter().map(|&p| self.qubits[p].dim).collect();
            let digits: Vec<usize>
                = conf.positions.iter().map(|&p| bits[p]).collect();
            let row = crate::qid::basis_index(&digits, &dims);
            let weights: Vec<f64> = conf.matrix.row(row).iter().copied().collect();
            // rows were validated as distributions
            let Ok(dist) = WeightedIndex::new(&weights) else { continue; };
            let new = crate::qid::basis_digits(dist.sample(rng) as u64, &dims);
            conf.positions.iter().zip(new)
                .for_each(|(&p, d)| { bits[p] = d; });
        }
        bits.iter_mut().zip(self.invert_mask.iter())
            .filter(|(b, &flip)| flip && **b < 2)
            .for_each(|(b, _)| { *b ^= 1; });
        bits
    }
}

impl Operation for Measure {
    fn qubits(&self) -> Vec<Qid> { self.qubits.clone() }

    fn name(&self) -> String {
        format!("Measure[{}]({})", self.key, self.qubits.iter().join(", "))
    }

    fn measurement(&self) -> Option<&Measure> { Some(self) }
}

/// Reset qubits to their `|0>` state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reset(pub Vec<Qid>);

impl Operation for Reset {
    fn qubits(&self) -> Vec<Qid> { self.0.clone() }

    fn name(&self) -> String { format!("Reset({})", self.0.iter().join(", ")) }

    fn is_reset(&self) -> bool { true }
}

/// Probabilistic application of one of several unitaries.
#[derive(Clone, Debug, PartialEq)]
pub struct MixtureChannel {
    name: String,
    qubits: Vec<Qid>,
    branches: Vec<(f64, na::DMatrix<C64>)>,
    key: Option<String>,
}

impl MixtureChannel {
    /// Validate and build a mixture. Weights must be non-negative and sum to
    /// 1, and every matrix must be sized for `qubits`.
    pub fn new<S>(
        name: S,
        qubits: Vec<Qid>,
        branches: Vec<(f64, na::DMatrix<C64>)>,
    ) -> Result<Self>
    where S: Into<String>
    {
        if branches.is_empty() {
            return Err(SimError::channel("mixture has no branches"));
        }
        if branches.iter().any(|(p, _)| !p.is_finite() || *p < 0.0) {
            return Err(SimError::channel("mixture weights must be non-negative"));
        }
        let total: f64 = branches.iter().map(|(p, _)| p).sum();
        if (total - 1.0).abs() > CHANNEL_ATOL {
            return Err(SimError::channel(
                format!("mixture weights sum to {}", total)));
        }
        for (_, u) in branches.iter() { check_square(&qubits, u)?; }
        Ok(Self { name: name.into(), qubits, branches, key: None })
    }

    /// Record the sampled branch index under `key`.
    pub fn with_key<K>(mut self, key: K) -> Self
    where K: Into<String>
    {
        self.key = Some(key.into());
        self
    }

    /// Apply X with probability `p`.
    pub fn bit_flip(q: Qid, p: f64) -> Result<Self> {
        Self::new(
            format!("BitFlip[{}]({})", p, q),
            vec![q],
            vec![
                (1.0 - p, Gate::I(q).matrix()),
                (p, Gate::X(q).matrix()),
            ],
        )
    }

    /// Apply Z with probability `p`.
    pub fn phase_flip(q: Qid, p: f64) -> Result<Self> {
        Self::new(
            format!("PhaseFlip[{}]({})", p, q),
            vec![q],
            vec![
                (1.0 - p, Gate::I(q).matrix()),
                (p, Gate::Z(q).matrix()),
            ],
        )
    }

    /// Apply each of X, Y, Z with probability `p / 3`.
    pub fn depolarize(q: Qid, p: f64) -> Result<Self> {
        Self::new(
            format!("Depolarize[{}]({})", p, q),
            vec![q],
            vec![
                (1.0 - p, Gate::I(q).matrix()),
                (p / 3.0, Gate::X(q).matrix()),
                (p / 3.0, Gate::Y(q).matrix()),
                (p / 3.0, Gate::Z(q).matrix()),
            ],
        )
    }

    pub fn branches(&self) -> &[(f64, na::DMatrix<C64>)] { &self.branches }
}

impl Operation for MixtureChannel {
    fn qubits(&self) -> Vec<Qid> { self.qubits.clone() }

    fn name(&self) -> String { self.name.clone() }

    fn mixture(&self) -> Option<Vec<(f64, na::DMatrix<C64>)>> {
        Some(self.branches.clone())
    }

    // sampling a unitary mixture is the same as sampling its Kraus operators
    // √p U, so channel-only representations can still use it
    fn kraus(&self) -> Option<Vec<na::DMatrix<C64>>> {
        Some(
            self.branches.iter()
                .map(|(p, u)| u * C64::from(p.sqrt()))
                .collect()
        )
    }

    fn channel_key(&self) -> Option<&str> { self.key.as_deref() }
}

/// General quantum channel given by its Kraus operators.
#[derive(Clone, Debug, PartialEq)]
pub struct KrausChannel {
    name: String,
    qubits: Vec<Qid>,
    ops: Vec<na::DMatrix<C64>>,
    key: Option<String>,
}

impl KrausChannel {
    /// Validate and build a channel. Every operator must be sized for
    /// `qubits`, and together they must satisfy `Σ K†K = I`.
    pub fn new<S>(name: S, qubits: Vec<Qid>, ops: Vec<na::DMatrix<C64>>)
        -> Result<Self>
    where S: Into<String>
    {
        if ops.is_empty() {
            return Err(SimError::channel("channel has no Kraus operators"));
        }
        for k in ops.iter() { check_square(&qubits, k)?; }
        let d = hilbert_dim(&qubits);
        let eye: na::DMatrix<C64> = na::DMatrix::identity(d, d);
        let completeness
            = ops.iter()
            .fold(na::DMatrix::<C64>::zeros(d, d), |acc, k| acc + k.adjoint() * k);
        let err = (completeness - eye).norm();
        if err > CHANNEL_ATOL.sqrt() {
            return Err(SimError::channel(
                format!("Kraus operators are incomplete (deviation {:e})", err)));
        }
        Ok(Self { name: name.into(), qubits, ops, key: None })
    }

    /// Record the sampled Kraus index under `key`.
    pub fn with_key<K>(mut self, key: K) -> Self
    where K: Into<String>
    {
        self.key = Some(key.into());
        self
    }

    /// Energy relaxation toward `|0>` with rate `gamma`.
    pub fn amplitude_damp(q: Qid, gamma: f64) -> Result<Self> {
        let z = C64::from(0.0);
        let one = C64::from(1.0);
        Self::new(
            format!("AmplitudeDamp[{}]({})", gamma, q),
            vec![q],
            vec![
                na::DMatrix::from_row_slice(2, 2, &[
                    one, z,
                    z,   C64::from((1.0 - gamma).sqrt()),
                ]),
                na::DMatrix::from_row_slice(2, 2, &[
                    z, C64::from(gamma.sqrt()),
                    z, z,
                ]),
            ],
        )
    }

    /// Dephasing without energy loss with rate `gamma`.
    pub fn phase_damp(q: Qid, gamma: f64) -> Result<Self> {
        let z = C64::from(0.0);
        let one = C64::from(1.0);
        Self::new(
            format!("PhaseDamp[{}]({})", gamma, q),
            vec![q],
            vec![
                na::DMatrix::from_row_slice(2, 2, &[
                    one, z,
                    z,   C64::from((1.0 - gamma).sqrt()),
                ]),
                na::DMatrix::from_row_slice(2, 2, &[
                    z, z,
                    z, C64::from(gamma.sqrt()),
                ]),
            ],
        )
    }

    /// Reset a qudit as a channel: every basis state is mapped to `|0>`.
    pub fn reset(q: Qid) -> Result<Self> {
        let ops: Vec<na::DMatrix<C64>>
            = (0..q.dim)
            .map(|k| {
                let mut m: na::DMatrix<C64> = na::DMatrix::zeros(q.dim, q.dim);
                m[(0, k)] = C64::from(1.0);
                m
            })
            .collect();
        Self::new(format!("ResetChannel({})", q), vec![q], ops)
    }

    pub fn operators(&self) -> &[na::DMatrix<C64>] { &self.ops }
}

impl Operation for KrausChannel {
    fn qubits(&self) -> Vec<Qid> { self.qubits.clone() }

    fn name(&self) -> String { self.name.clone() }

    fn kraus(&self) -> Option<Vec<na::DMatrix<C64>>> { Some(self.ops.clone()) }

    fn channel_key(&self) -> Option<&str> { self.key.as_deref() }
}

/// An operation known only through its decomposition.
#[derive(Clone, Debug)]
pub struct Composite {
    name: String,
    qubits: Vec<Qid>,
    ops: Vec<OpRef>,
}

impl Composite {
    /// Group `ops` under one name. The target qubits are the union of the
    /// sub-operations' qubits in first-appearance order.
    pub fn new<S>(name: S, ops: Vec<OpRef>) -> Self
    where S: Into<String>
    {
        let qubits: Vec<Qid>
            = ops.iter()
            .flat_map(|op| op.qubits())
            .unique()
            .collect();
        Self { name: name.into(), qubits, ops }
    }
}

impl Operation for Composite {
    fn qubits(&self) -> Vec<Qid> { self.qubits.clone() }

    fn name(&self) -> String { self.name.clone() }

    fn decompose(&self) -> Option<Vec<OpRef>> { Some(self.ops.clone()) }
}

/// An operation applied only if the most recent record under a measurement
/// key contains a non-zero value.
#[derive(Clone, Debug)]
pub struct ClassicallyControlled {
    key: String,
    op: OpRef,
}

impl ClassicallyControlled {
    pub fn new<K>(key: K, op: OpRef) -> Self
    where K: Into<String>
    {
        Self { key: key.into(), op }
    }
}

impl Operation for ClassicallyControlled {
    fn qubits(&self) -> Vec<Qid> { self.op.qubits() }

    fn name(&self) -> String {
        format!("{}.with_condition({})", self.op.name(), self.key)
    }

    fn control(&self) -> Option<(&str, &dyn Operation)> {
        Some((self.key.as_str(), self.op.as_ref()))
    }
}
