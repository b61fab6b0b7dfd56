//! Partitioning of a simulated register into independent sub-states.
//!
//! A [`StateContainer`] keeps each group of mutually entangled qubits in its
//! own representation. Representations live in an arena of slots and every
//! qubit maps to the handle of the slot that owns it. When an operation acts
//! across several slots, they are first merged with a Kronecker product; after
//! a collapsing measurement or a reset, the affected qubits are factored back
//! out into slots of their own (if the representation supports factoring and
//! splitting is enabled). A two-qubit swap never touches amplitudes: it only
//! exchanges labels.
//!
//! # Example
//! ```
//! use entangle_sim::{
//!     config::SimConfig,
//!     container::DenseContainer,
//!     gate::Gate,
//!     op::Measure,
//!     qid::Qid,
//! };
//!
//! let q = Qid::range(3);
//! let cfg = SimConfig::new(q.clone()).with_seed(10546);
//! let mut sim = DenseContainer::new(&cfg).unwrap();
//! sim.apply(&Gate::H(q[0])).unwrap();
//! sim.apply(&Gate::CX(q[0], q[1])).unwrap();
//! assert!(sim.same_state(q[0], q[1]).unwrap());
//! assert!(!sim.same_state(q[0], q[2]).unwrap());
//!
//! sim.apply(&Measure::new(vec![q[0], q[1]], "m")).unwrap();
//! assert!(!sim.same_state(q[0], q[1]).unwrap());
//! let log = sim.log();
//! let rec = log.borrow().last("m").unwrap().to_vec();
//! assert_eq!(rec[0], rec[1]);
//! ```

use std::{ cell::RefCell, rc::Rc };
use itertools::Itertools;
use nalgebra as na;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use rustc_hash::FxHashMap;
use tracing::{ debug, info };
use crate::{
    ch::ChFormState,
    classical::{ ClassicalDataLog, SharedLog },
    config::SimConfig,
    dense::StateVector,
    error::{ Result, SimError },
    op::Operation,
    qid::{ basis_digits, Qid },
    state::{ shared_rng, SharedRng, SimState },
};

/// Container of dense state vectors.
pub type DenseContainer = StateContainer<StateVector>;

/// Container of CH-form stabilizer states.
pub type StabilizerContainer = StateContainer<ChFormState>;

/// An arena of independent representations covering a fixed set of qubits.
#[derive(Debug)]
pub struct StateContainer<S: SimState> {
    slots: Vec<Option<S>>,
    free: Vec<usize>,
    owners: FxHashMap<Qid, usize>,
    // owns no qubits when splitting, otherwise the only state
    default: usize,
    qubits: Vec<Qid>,
    split_untangled: bool,
    atol: f64,
    rng: SharedRng,
    log: SharedLog,
}

impl<S: SimState> StateContainer<S> {
    /// Create a new container in the initial state given by `config`.
    pub fn new(config: &SimConfig) -> Result<Self> {
        let qubits: Vec<Qid> = config.validate()?.to_vec();
        let rng = shared_rng(config.make_rng());
        let log = ClassicalDataLog::shared();
        let mut slots: Vec<Option<S>> = Vec::new();
        let mut owners: FxHashMap<Qid, usize> = FxHashMap::default();
        let default: usize;
        if config.split_untangled_states {
            let dims: Vec<usize> = qubits.iter().map(|q| q.dim).collect();
            let digits = basis_digits(config.initial_state, &dims);
            for (&q, d) in qubits.iter().zip(digits) {
                let state = S::from_basis_state(
                    vec![q], d as u64, rng.clone(), log.clone())?;
                owners.insert(q, slots.len());
                slots.push(Some(state));
            }
            default = slots.len();
            slots.push(Some(
                S::from_basis_state(Vec::new(), 0, rng.clone(), log.clone())?
            ));
        } else {
            let state = S::from_basis_state(
                qubits.clone(), config.initial_state, rng.clone(), log.clone())?;
            qubits.iter().for_each(|&q| { owners.insert(q, 0); });
            slots.push(Some(state));
            default = 0;
        }
        info!(
            qubits = qubits.len(),
            split = config.split_untangled_states,
            initial_state = config.initial_state,
            "created state container"
        );
        Ok(Self {
            slots,
            free: Vec::new(),
            owners,
            default,
            qubits,
            split_untangled: config.split_untangled_states,
            atol: config.factor_atol,
            rng,
            log,
        })
    }

    fn slot(&self, h: usize) -> &S {
        self.slots[h].as_ref()
            .unwrap_or_else(|| unreachable!("dangling state handle {}", h))
    }

    fn slot_mut(&mut self, h: usize) -> &mut S {
        self.slots[h].as_mut()
            .unwrap_or_else(|| unreachable!("dangling state handle {}", h))
    }

    fn alloc(&mut self, state: S) -> usize {
        if let Some(h) = self.free.pop() {
            self.slots[h] = Some(state);
            h
        } else {
            self.slots.push(Some(state));
            self.slots.len() - 1
        }
    }

    fn release(&mut self, h: usize) {
        self.slots[h] = None;
        self.free.push(h);
    }

    fn owner(&self, q: Qid) -> Result<usize> {
        self.owners.get(&q).copied().ok_or(SimError::QubitNotFound(q))
    }

    /// Canonical qubit order.
    pub fn qubits(&self) -> &[Qid] { &self.qubits }

    pub fn split_untangled_states(&self) -> bool { self.split_untangled }

    /// Shared handle to the classical log.
    pub fn log(&self) -> SharedLog { self.log.clone() }

    /// Shared handle to the random source.
    pub fn rng(&self) -> SharedRng { self.rng.clone() }

    /// The representation that currently owns `q`.
    pub fn state_of(&self, q: Qid) -> Result<&S> {
        self.owner(q).map(|h| self.slot(h))
    }

    /// `true` if `a` and `b` are held in the same representation.
    pub fn same_state(&self, a: Qid, b: Qid) -> Result<bool> {
        Ok(self.owner(a)? == self.owner(b)?)
    }

    /// Iterate over all live representations, including the qubit-less
    /// placeholder used when splitting.
    pub fn states(&self) -> impl Iterator<Item = &S> + '_ {
        self.slots.iter().flatten()
    }

    /// Number of live representations that own at least one qubit.
    pub fn num_states(&self) -> usize {
        self.states().filter(|s| !s.qubits().is_empty()).count()
    }

    /// Apply an operation, merging and splitting representations as needed.
    pub fn apply(&mut self, op: &dyn Operation) -> Result<()> {
        if op.is_identity() { return Ok(()); }
        let qubits = op.qubits();
        for &q in qubits.iter() { self.owner(q)?; }
        if let Some(&q) = qubits.iter().duplicates().next() {
            return Err(SimError::RepeatedQubit(q));
        }
        if op.is_swap() && qubits.len() == 2 {
            return self.swap(qubits[0], qubits[1]);
        }
        let h = self.merge(&qubits)?;
        self.slot_mut(h).apply(op)?;
        let collapses
            = op.is_reset()
            || op.measurement().is_some_and(|m| m.collapses());
        if self.split_untangled && collapses && self.slot(h).allows_factoring() {
            self.split(&qubits)?;
        }
        Ok(())
    }

    /// Apply a sequence of operations in order, stopping at the first error.
    pub fn apply_circuit<I>(&mut self, ops: I) -> Result<()>
    where
        I: IntoIterator,
        I::Item: AsRef<dyn Operation>,
    {
        ops.into_iter().try_for_each(|op| self.apply(op.as_ref()))
    }

    // exchange two qubits by relabeling only
    fn swap(&mut self, a: Qid, b: Qid) -> Result<()> {
        if a.dim != b.dim {
            return Err(SimError::ShapeMismatch {
                expected: vec![a.dim],
                found: vec![b.dim],
            });
        }
        let (ha, hb) = (self.owner(a)?, self.owner(b)?);
        if ha == hb {
            self.slot_mut(ha).core_mut().swap_labels(a, b)?;
        } else {
            self.slot_mut(ha).core_mut().rename(a, b)?;
            self.slot_mut(hb).core_mut().rename(b, a)?;
            self.owners.insert(a, hb);
            self.owners.insert(b, ha);
        }
        debug!(%a, %b, shared = ha == hb, "swapped qubits by relabeling");
        Ok(())
    }

    // merge the owners of `qubits` into one representation and return its
    // handle
    fn merge(&mut self, qubits: &[Qid]) -> Result<usize> {
        let handles: Vec<usize>
            = qubits.iter()
            .map(|&q| self.owner(q))
            .collect::<Result<Vec<usize>>>()?
            .into_iter()
            .unique()
            .collect();
        match handles.as_slice() {
            [] => return Ok(self.default),
            [h] => return Ok(*h),
            _ => { },
        }
        let merged
            = handles[2..].iter()
            .try_fold(
                self.slot(handles[0]).kronecker_product(self.slot(handles[1]))?,
                |acc, &h| acc.kronecker_product(self.slot(h)),
            )?;
        let n = merged.qubits().len();
        handles.iter().for_each(|&h| { self.release(h); });
        let owned: Vec<Qid> = merged.qubits().to_vec();
        let h = self.alloc(merged);
        owned.into_iter().for_each(|q| { self.owners.insert(q, h); });
        debug!(?handles, into = h, qubits = n, "merged states");
        Ok(h)
    }

    // factor each of `qubits` out into its own representation
    fn split(&mut self, qubits: &[Qid]) -> Result<()> {
        for &q in qubits.iter() {
            let h = self.owner(q)?;
            if self.slot(h).qubits().len() <= 1 { continue; }
            let (ext, rem) = self.slot(h).factor(&[q], false, self.atol)?;
            self.slots[h] = Some(rem);
            let hq = self.alloc(ext);
            self.owners.insert(q, hq);
            debug!(%q, from = h, into = hq, "split off qubit");
        }
        Ok(())
    }

    /// Combine every representation into one over all qubits, in canonical
    /// order, leaving the container untouched.
    pub fn create_merged_state(&self) -> Result<S> {
        let rest: Vec<usize>
            = self.qubits.iter()
            .map(|q| self.owners[q])
            .unique()
            .filter(|&h| h != self.default)
            .collect();
        let first = self.slot(self.default);
        let merged
            = rest.iter()
            .try_fold(None, |acc: Option<S>, &h| {
                acc.as_ref().unwrap_or(first)
                    .kronecker_product(self.slot(h))
                    .map(Some)
            })?;
        merged.as_ref().unwrap_or(first).transpose_to_qubit_order(&self.qubits)
    }

    /// Draw `repetitions` joint outcomes of measuring `qubits` without
    /// disturbing any state. Each representation samples its own qubits
    /// independently; columns follow the order of `qubits`.
    pub fn sample(&self, qubits: &[Qid], repetitions: usize, seed: Option<u64>)
        -> Result<na::DMatrix<usize>>
    {
        let seed = seed.unwrap_or_else(|| self.rng.borrow_mut().gen());
        let mut rng = StdRng::seed_from_u64(seed);
        let mut groups: Vec<(usize, Vec<Qid>)> = Vec::new();
        let mut column_of: FxHashMap<Qid, (usize, usize)> = FxHashMap::default();
        for &q in qubits.iter().unique() {
            let h = self.owner(q)?;
            let g = match groups.iter().position(|(hg, _)| *hg == h) {
                Some(g) => g,
                None => {
                    groups.push((h, Vec::new()));
                    groups.len() - 1
                },
            };
            column_of.insert(q, (g, groups[g].1.len()));
            groups[g].1.push(q);
        }
        let samples: Vec<na::DMatrix<usize>>
            = groups.iter()
            .map(|(h, qs)| self.slot(*h).sample(qs, repetitions, Some(rng.gen())))
            .collect::<Result<_>>()?;
        Ok(na::DMatrix::from_fn(repetitions, qubits.len(), |r, c| {
            let (g, k) = column_of[&qubits[c]];
            samples[g][(r, k)]
        }))
    }

    /// Return an independent copy of the container, preserving which qubits
    /// share a representation.
    ///
    /// The log is always copied. With `deep_copy_buffers`, the random source
    /// is cloned once and shared by every copied representation; otherwise
    /// the copy draws from the same source as `self`.
    pub fn copy(&self, deep_copy_buffers: bool) -> Self {
        let rng
            = if deep_copy_buffers {
                shared_rng(self.rng.borrow().clone())
            } else {
                self.rng.clone()
            };
        let log: SharedLog = Rc::new(RefCell::new(self.log.borrow().clone()));
        let slots: Vec<Option<S>>
            = self.slots.iter()
            .map(|slot| {
                slot.as_ref().map(|state| {
                    let mut state = state.copy(deep_copy_buffers);
                    state.core_mut().set_rng(rng.clone());
                    state.core_mut().set_log(log.clone());
                    state
                })
            })
            .collect();
        Self {
            slots,
            free: self.free.clone(),
            owners: self.owners.clone(),
            default: self.default,
            qubits: self.qubits.clone(),
            split_untangled: self.split_untangled,
            atol: self.atol,
            rng,
            log,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use approx::assert_abs_diff_eq;
    use num_complex::Complex64 as C64;
    use crate::{
        gate::Gate,
        op::{ ClassicallyControlled, KrausChannel, Measure, OpRef, Reset },
    };

    fn dense(n: usize, index: u64, seed: u64) -> DenseContainer {
        let cfg = SimConfig::new(Qid::range(n))
            .with_initial_state(index)
            .with_seed(seed);
        DenseContainer::new(&cfg).unwrap()
    }

    fn assert_vec_close(a: &na::DVector<C64>, b: &na::DVector<C64>) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-9, "{}\n{}", a, b);
        }
    }

    #[test]
    fn creation() {
        let c = dense(3, 0b101, 0);
        assert_eq!(c.num_states(), 3);
        let psi = c.create_merged_state().unwrap();
        assert_eq!(psi.qubits(), c.qubits());
        assert_abs_diff_eq!(psi.probabilities()[5], 1.0, epsilon = 1e-12);

        let cfg = SimConfig::new(Qid::range(3)).with_initial_state(0b011).with_split(false);
        let c = DenseContainer::new(&cfg).unwrap();
        assert_eq!(c.num_states(), 1);
        assert_abs_diff_eq!(
            c.create_merged_state().unwrap().probabilities()[3], 1.0, epsilon = 1e-12);

        let res = DenseContainer::new(&SimConfig::default().with_initial_state(1));
        assert!(matches!(res, Err(SimError::Configuration(_))));
        let res = DenseContainer::new(&SimConfig::new(Qid::range(2)).with_initial_state(4));
        assert!(matches!(res, Err(SimError::Configuration(_))));
    }

    #[test]
    fn merge_idempotence() {
        let q = Qid::range(3);
        let mut c = dense(3, 0, 0);
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        let slots = c.slots.len();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        assert_eq!(c.slots.len(), slots);
        assert!(c.same_state(q[0], q[1]).unwrap());
        assert_eq!(c.state_of(q[0]).unwrap().qubits(), &[q[0], q[1]]);
        assert!(!c.same_state(q[1], q[2]).unwrap());
        assert_eq!(c.num_states(), 2);
    }

    #[test]
    fn swap_relabels_without_merging() {
        let q = Qid::range(2);
        let mut c = dense(2, 0b10, 0);
        let slots = c.slots.len();
        c.apply(&Gate::Swap(q[0], q[1])).unwrap();
        assert_eq!(c.slots.len(), slots);
        assert!(!c.same_state(q[0], q[1]).unwrap());
        assert_eq!(c.state_of(q[0]).unwrap().qubits(), &[q[0]]);
        assert_abs_diff_eq!(
            c.create_merged_state().unwrap().probabilities()[0b01], 1.0, epsilon = 1e-12);

        // both |0>: only the mapping changes
        let mut c = dense(2, 0, 0);
        let before = c.owners.clone();
        c.apply(&Gate::Swap(q[0], q[1])).unwrap();
        assert_eq!(c.owners[&q[0]], before[&q[1]]);
        assert_eq!(c.owners[&q[1]], before[&q[0]]);
        assert_eq!(c.num_states(), 2);
    }

    #[test]
    fn repeated_targets_rejected() {
        let q = Qid::range(2);
        let mut c = dense(2, 0, 0);
        c.apply(&Gate::H(q[0])).unwrap();
        let owners = c.owners.clone();
        assert!(matches!(
            c.apply(&Gate::CX(q[0], q[0])),
            Err(SimError::RepeatedQubit(r)) if r == q[0]
        ));
        assert!(matches!(
            c.apply(&Measure::new(vec![q[1], q[0], q[1]], "m")),
            Err(SimError::RepeatedQubit(r)) if r == q[1]
        ));
        assert!(c.apply(&Gate::Swap(q[1], q[1])).is_err());
        assert_eq!(c.owners, owners);
        assert_eq!(c.num_states(), 2);
        assert!(c.log().borrow().is_empty());
        assert_abs_diff_eq!(
            c.create_merged_state().unwrap().probabilities()[0b10], 0.5, epsilon = 1e-12);

        let mut c = StabilizerContainer::new(&SimConfig::new(q.clone()).with_seed(0)).unwrap();
        assert!(matches!(c.apply(&Gate::CZ(q[1], q[1])), Err(SimError::RepeatedQubit(_))));
    }

    #[test]
    fn swap_within_and_across_states() {
        let q = Qid::range(3);
        let mut c = dense(3, 0b100, 0);
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.apply(&Gate::Swap(q[0], q[1])).unwrap();
        assert_eq!(c.state_of(q[0]).unwrap().qubits(), &[q[1], q[0]]);
        c.apply(&Gate::Swap(q[1], q[2])).unwrap();
        assert!(c.same_state(q[0], q[2]).unwrap());
        assert_eq!(c.state_of(q[1]).unwrap().qubits(), &[q[1]]);
        assert_abs_diff_eq!(
            c.create_merged_state().unwrap().probabilities()[0b101], 1.0, epsilon = 1e-12);

        let mut c = DenseContainer::new(
            &SimConfig::new(vec![q[0], Qid::qudit(1, 3)]).with_seed(0)).unwrap();
        assert!(matches!(
            c.apply(&Gate::Swap(q[0], Qid::qudit(1, 3))),
            Err(SimError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn bell_measurement_splits() {
        let q = Qid::range(2);
        for seed in 0..10 {
            let mut c = dense(2, 0, seed);
            c.apply(&Gate::H(q[0])).unwrap();
            c.apply(&Gate::CX(q[0], q[1])).unwrap();
            assert_eq!(c.num_states(), 1);
            c.apply(&Measure::new(q.clone(), "m")).unwrap();
            let log = c.log();
            assert_eq!(log.borrow().num_records("m"), 1);
            assert_eq!(c.num_states(), 2);
            assert!(!c.same_state(q[0], q[1]).unwrap());
            assert_eq!(c.state_of(q[0]).unwrap().qubits(), &[q[0]]);
            assert_eq!(c.state_of(q[1]).unwrap().qubits(), &[q[1]]);
            let rec = log.borrow().last("m").unwrap().to_vec();
            assert_eq!(rec[0], rec[1]);
            let psi = c.create_merged_state().unwrap();
            let idx = 2 * rec[0] + rec[1];
            assert_abs_diff_eq!(psi.probabilities()[idx], 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn no_split_when_disabled() {
        let q = Qid::range(2);
        let cfg = SimConfig::new(q.clone()).with_split(false).with_seed(1);
        let mut c = DenseContainer::new(&cfg).unwrap();
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.apply(&Measure::new(q.clone(), "m")).unwrap();
        assert_eq!(c.num_states(), 1);
        assert!(c.same_state(q[0], q[1]).unwrap());
    }

    #[test]
    fn reset_splits() {
        let q = Qid::range(2);
        let mut c = dense(2, 0, 3);
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.apply(&Reset(vec![q[0]])).unwrap();
        assert!(!c.same_state(q[0], q[1]).unwrap());
        let p0 = c.state_of(q[0]).unwrap().probabilities();
        assert_abs_diff_eq!(p0[0], 1.0, epsilon = 1e-9);
        assert!(c.log().borrow().is_empty());
    }

    #[test]
    fn non_collapsing_measurement_keeps_state() {
        let q = Qid::range(2);
        let mut c = dense(2, 0, 3);
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.apply(&Measure::new(q.clone(), "peek").non_collapsing()).unwrap();
        assert!(c.same_state(q[0], q[1]).unwrap());
        let p = c.create_merged_state().unwrap().probabilities();
        assert_abs_diff_eq!(p[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(p[3], 0.5, epsilon = 1e-9);
    }

    #[test]
    fn sampling_is_deterministic() {
        let q = Qid::range(3);
        let mut c = dense(3, 0, 0);
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.apply(&Gate::H(q[2])).unwrap();
        let order = [q[2], q[0], q[1]];
        let a = c.sample(&order, 100, Some(5)).unwrap();
        let b = c.sample(&order, 100, Some(5)).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.shape(), (100, 3));
        assert!(a.row_iter().all(|row| row[1] == row[2]));
        assert_eq!(c.num_states(), 2);
        assert!(matches!(
            c.sample(&[Qid::qubit(7)], 1, None),
            Err(SimError::QubitNotFound(_))
        ));
    }

    #[test]
    fn merged_state_matches_global() {
        let q = Qid::range(4);
        let ops: Vec<OpRef> = vec![
            Rc::new(Gate::H(q[2])),
            Rc::new(Gate::CX(q[2], q[0])),
            Rc::new(Gate::YRot(q[3], 0.7)),
            Rc::new(Gate::T(q[0])),
            Rc::new(Gate::CZ(q[3], q[1])),
            Rc::new(Gate::Swap(q[1], q[2])),
        ];
        let mut split = dense(4, 0b0100, 0);
        split.apply_circuit(&ops).unwrap();
        let cfg = SimConfig::new(q.clone())
            .with_initial_state(0b0100)
            .with_split(false)
            .with_seed(0);
        let mut global = DenseContainer::new(&cfg).unwrap();
        global.apply_circuit(&ops).unwrap();
        assert_vec_close(
            &split.create_merged_state().unwrap().state_vector(),
            &global.create_merged_state().unwrap().state_vector(),
        );
    }

    #[test]
    fn copies_preserve_aliasing() {
        let q = Qid::range(3);
        let mut c = dense(3, 0, 0);
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.log().borrow_mut().record_channel("k", 0);
        for deep in [false, true] {
            let mut d = c.copy(deep);
            assert!(d.same_state(q[0], q[1]).unwrap());
            assert!(!d.same_state(q[0], q[2]).unwrap());
            d.apply(&Gate::X(q[2])).unwrap();
            d.log().borrow_mut().record_channel("k", 1);
            assert_abs_diff_eq!(
                c.state_of(q[2]).unwrap().probabilities()[0], 1.0, epsilon = 1e-12);
            assert_eq!(c.log().borrow().channel_records("k"), Some(&[0][..]));
            assert_eq!(Rc::ptr_eq(&c.rng(), &d.rng()), !deep);
            assert!(d.states().all(|s| Rc::ptr_eq(&s.core().log(), &d.log())));
        }
    }

    #[test]
    fn channels_and_control() {
        let q = Qid::range(2);
        let mut c = dense(2, 0b10, 0);
        let damp = KrausChannel::amplitude_damp(q[0], 1.0).unwrap().with_key("decay");
        c.apply(&damp).unwrap();
        assert_eq!(c.log().borrow().channel_records("decay"), Some(&[1][..]));
        c.apply(&Gate::X(q[0])).unwrap();
        c.apply(&Measure::new(vec![q[0]], "m")).unwrap();
        c.apply(&ClassicallyControlled::new("m", Rc::new(Gate::X(q[1])))).unwrap();
        let p = c.create_merged_state().unwrap().probabilities();
        assert_abs_diff_eq!(p[0b11], 1.0, epsilon = 1e-9);
        assert!(matches!(
            c.apply(&Gate::X(Qid::qubit(5))),
            Err(SimError::QubitNotFound(_))
        ));
    }

    #[test]
    fn stabilizer_container_never_splits() {
        let q = Qid::range(3);
        let cfg = SimConfig::new(q.clone()).with_seed(10546);
        let mut c = StabilizerContainer::new(&cfg).unwrap();
        c.apply(&Gate::H(q[0])).unwrap();
        c.apply(&Gate::CX(q[0], q[1])).unwrap();
        c.apply(&Gate::Swap(q[1], q[2])).unwrap();
        c.apply(&Measure::new(vec![q[0], q[2]], "m")).unwrap();
        assert!(c.same_state(q[0], q[2]).unwrap());
        assert!(!c.same_state(q[0], q[1]).unwrap());
        let rec = c.log().borrow().last("m").unwrap().to_vec();
        assert_eq!(rec[0], rec[1]);
        let psi = c.create_merged_state().unwrap();
        assert_eq!(psi.qubits(), q.as_slice());
        let idx = 4 * rec[0] + rec[1];
        assert_abs_diff_eq!(psi.state_vector()[idx].norm_sqr(), 1.0, epsilon = 1e-9);
        assert!(matches!(
            c.apply(&Gate::T(q[1])),
            Err(SimError::UnsupportedOperation(_))
        ));
    }
}
