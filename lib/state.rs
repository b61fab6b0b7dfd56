//! The contract shared by every state representation.
//!
//! A representation owns the quantum state of an ordered list of qubits,
//! independent of every other qubit in the simulation. Alongside its payload
//! it carries a [`StateCore`]: the qubit-to-axis mapping, a handle to the
//! random source, and a handle to the shared [`ClassicalDataLog`].

use std::{ cell::RefCell, fmt, mem, rc::Rc };
use nalgebra as na;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use rustc_hash::FxHashMap;
use crate::{
    classical::{ ClassicalDataLog, SharedLog },
    error::{ Result, SimError },
    op::{ Measure, Operation },
    qid::Qid,
};

/// Shared handle to a random source.
pub type SharedRng = Rc<RefCell<StdRng>>;

/// Wrap a generator in a shared handle.
pub fn shared_rng(rng: StdRng) -> SharedRng { Rc::new(RefCell::new(rng)) }

/// Bookkeeping common to all representations.
#[derive(Clone, Debug)]
pub struct StateCore {
    pub(crate) qubits: Vec<Qid>,
    pub(crate) qubit_map: FxHashMap<Qid, usize>,
    pub(crate) rng: SharedRng,
    pub(crate) log: SharedLog,
}

impl StateCore {
    /// Create a new core over `qubits`, which must be distinct.
    pub fn new(qubits: Vec<Qid>, rng: SharedRng, log: SharedLog)
        -> Result<Self>
    {
        let qubit_map: FxHashMap<Qid, usize>
            = qubits.iter().enumerate().map(|(k, q)| (*q, k)).collect();
        if qubit_map.len() != qubits.len() {
            return Err(SimError::config("duplicate qubits in state"));
        }
        Ok(Self { qubits, qubit_map, rng, log })
    }

    /// A core over different qubits sharing the same random source and log.
    pub(crate) fn with_qubits(&self, qubits: Vec<Qid>) -> Result<Self> {
        Self::new(qubits, self.rng.clone(), self.log.clone())
    }

    pub fn qubits(&self) -> &[Qid] { &self.qubits }

    /// Return the axis of `q`.
    pub fn axis(&self, q: Qid) -> Result<usize> {
        self.qubit_map.get(&q).copied().ok_or(SimError::QubitNotFound(q))
    }

    /// Return the axes of `qubits`, in order. Fails if any qubit appears
    /// more than once.
    pub fn axes(&self, qubits: &[Qid]) -> Result<Vec<usize>> {
        let mut seen = vec![false; self.qubits.len()];
        qubits.iter()
            .map(|&q| {
                let a = self.axis(q)?;
                if mem::replace(&mut seen[a], true) {
                    return Err(SimError::RepeatedQubit(q));
                }
                Ok(a)
            })
            .collect()
    }

    /// Axis dimensions, in axis order.
    pub fn dims(&self) -> Vec<usize> { self.qubits.iter().map(|q| q.dim).collect() }

    pub fn log(&self) -> SharedLog { self.log.clone() }

    pub fn rng(&self) -> SharedRng { self.rng.clone() }

    pub(crate) fn set_log(&mut self, log: SharedLog) { self.log = log; }

    pub(crate) fn set_rng(&mut self, rng: SharedRng) { self.rng = rng; }

    /// Duplicate this core for a copied representation. The log is always
    /// deep-copied; the random source is cloned if `deep` and shared
    /// otherwise.
    pub(crate) fn fork(&self, deep: bool) -> Self {
        let rng
            = if deep {
                shared_rng(self.rng.borrow().clone())
            } else {
                self.rng.clone()
            };
        let log: ClassicalDataLog = self.log.borrow().clone();
        Self {
            qubits: self.qubits.clone(),
            qubit_map: self.qubit_map.clone(),
            rng,
            log: Rc::new(RefCell::new(log)),
        }
    }

    /// Relabel the axis owned by `from` as `to`, which must not already be
    /// owned.
    pub(crate) fn rename(&mut self, from: Qid, to: Qid) -> Result<()> {
        if from == to { return Ok(()); }
        if self.qubit_map.contains_key(&to) {
            return Err(SimError::config(format!("qubit {} is already owned", to)));
        }
        let k = self.qubit_map.remove(&from).ok_or(SimError::QubitNotFound(from))?;
        self.qubits[k] = to;
        self.qubit_map.insert(to, k);
        Ok(())
    }

    /// Exchange the axes owned by `a` and `b`.
    pub(crate) fn swap_labels(&mut self, a: Qid, b: Qid) -> Result<()> {
        let ka = self.axis(a)?;
        let kb = self.axis(b)?;
        self.qubits.swap(ka, kb);
        self.qubit_map.insert(a, kb);
        self.qubit_map.insert(b, ka);
        Ok(())
    }

    /// Seed a fresh generator, either from `seed` or from the shared source.
    pub(crate) fn sampling_rng(&self, seed: Option<u64>) -> StdRng {
        let seed = seed.unwrap_or_else(|| self.rng.borrow_mut().gen());
        StdRng::seed_from_u64(seed)
    }

    /// Concatenated core for a tensor product with `other`. The random source
    /// and log of `self` are kept.
    pub(crate) fn concat(&self, other: &Self) -> Result<Self> {
        let qubits: Vec<Qid>
            = self.qubits.iter().chain(other.qubits.iter()).copied().collect();
        Self::new(qubits, self.rng.clone(), self.log.clone())
    }

    /// Check that `order` is a permutation of the owned qubits and return the
    /// matching axes.
    pub(crate) fn permutation(&self, order: &[Qid]) -> Result<Vec<usize>> {
        if order.len() != self.qubits.len() {
            return Err(SimError::ShapeMismatch {
                expected: vec![self.qubits.len()],
                found: vec![order.len()],
            });
        }
        self.axes(order)
    }
}

/// A representation of the quantum state of a set of qubits.
pub trait SimState: Sized + fmt::Debug {
    /// Create the computational basis state with big-endian index `index`
    /// over `qubits`.
    fn from_basis_state(
        qubits: Vec<Qid>,
        index: u64,
        rng: SharedRng,
        log: SharedLog,
    ) -> Result<Self>;

    fn core(&self) -> &StateCore;

    fn core_mut(&mut self) -> &mut StateCore;

    fn qubits(&self) -> &[Qid] { &self.core().qubits }

    /// Apply an operation in place.
    fn apply(&mut self, op: &dyn Operation) -> Result<()>;

    /// Tensor product of two independent states, in concatenated qubit
    /// order. The result keeps the random source and log of `self`.
    fn kronecker_product(&self, other: &Self) -> Result<Self>;

    /// Split into a state over `qubits` and one over the remaining qubits.
    ///
    /// If `validate` is `true`, fails with [`SimError::Factor`] if the state
    /// is not a product state across the cut within `atol`.
    fn factor(&self, qubits: &[Qid], validate: bool, atol: f64)
        -> Result<(Self, Self)>;

    /// `true` if [`factor`][Self::factor] is supported.
    fn allows_factoring(&self) -> bool;

    /// Reorder axes to match `order` without changing the state.
    fn transpose_to_qubit_order(&self, order: &[Qid]) -> Result<Self>;

    /// Return an independent copy of `self`.
    ///
    /// With `deep_copy_buffers`, the random source is cloned and any scratch
    /// space is duplicated; otherwise the copy shares the random source and
    /// allocates scratch space lazily. The classical log is always copied.
    fn copy(&self, deep_copy_buffers: bool) -> Self;

    /// Draw `repetitions` joint outcomes of measuring `qubits` without
    /// disturbing the state. Rows are repetitions, columns follow `qubits`.
    fn sample(&self, qubits: &[Qid], repetitions: usize, seed: Option<u64>)
        -> Result<na::DMatrix<usize>>;

    /// Measure `qubits`, collapsing the state, without recording anything.
    fn perform_measurement(&mut self, qubits: &[Qid]) -> Result<Vec<usize>>;

    /// Return every qubit in `qubits` to `|0>`.
    fn reset(&mut self, qubits: &[Qid]) -> Result<()>;

    /// Carry out a measurement operation: collapse (or sample, if the
    /// measurement does not collapse), apply confusion and inversion, and
    /// record the result under the measurement key.
    fn measure(&mut self, m: &Measure) -> Result<Vec<usize>> {
        self.core().axes(&m.qubits)?;
        let raw: Vec<usize>
            = if m.collapse {
                self.perform_measurement(&m.qubits)?
            } else {
                let seed: u64 = self.core().rng.borrow_mut().gen();
                self.sample(&m.qubits, 1, Some(seed))?
                    .row(0).iter().copied().collect()
            };
        let values = m.correct(raw, &mut *self.core().rng.borrow_mut());
        self.core().log.borrow_mut()
            .record_measurement(&m.key, &m.qubits, values.clone())?;
        Ok(values)
    }
}
