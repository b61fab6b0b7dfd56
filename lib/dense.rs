//! Dense state-vector representation.
//!
//! The state of *N* qudits is held as an *N*-axis complex array whose `k`-th
//! axis has length equal to the dimension of the `k`-th qudit. Applying a
//! matrix to a subset of axes writes the result into a second, equally shaped
//! buffer, after which the two buffers trade places; the old state becomes
//! scratch space for the next application and nothing is reallocated.
//!
//! Operations are consumed by trying, in order: a dense unitary, a weighted
//! mixture of unitaries, a set of Kraus operators, and finally a
//! decomposition into simpler operations, each of which goes through the same
//! chain.
//!
//! # Example
//! ```
//! use entangle_sim::{
//!     classical::ClassicalDataLog,
//!     dense::StateVector,
//!     gate::Gate,
//!     qid::Qid,
//!     state::{ shared_rng, SimState },
//! };
//! use rand::{ rngs::StdRng, SeedableRng };
//!
//! let qubits = Qid::range(2);
//! let rng = shared_rng(StdRng::seed_from_u64(10546));
//! let mut psi
//!     = StateVector::from_basis_state(
//!         qubits.clone(), 0, rng, ClassicalDataLog::shared())
//!     .unwrap();
//! psi.apply(&Gate::H(qubits[0])).unwrap();
//! psi.apply(&Gate::CX(qubits[0], qubits[1])).unwrap();
//! let probs = psi.probabilities();
//! assert!((probs[0] - 0.5).abs() < 1e-12);
//! assert!((probs[3] - 0.5).abs() < 1e-12);
//! ```

use std::mem;
use itertools::Itertools;
use nalgebra as na;
use ndarray as nd;
use num_complex::Complex64 as C64;
use rand::{ distributions::{ Distribution, WeightedIndex }, Rng };
use tracing::{ debug, trace };
use crate::{
    classical::SharedLog,
    error::{ Result, SimError },
    op::{ check_square, Action, Operation, DENSE_STRATEGIES },
    qid::{ basis_digits, Qid },
    select::RandomChannelSelector,
    state::{ SharedRng, SimState, StateCore },
};

/// Tolerance on the squared norm of user-supplied amplitudes.
pub const NORM_ATOL: f64 = 1e-8;

// amplitude buffers are only ever created in standard (row-major) layout
fn flat(a: &nd::ArrayD<C64>) -> &[C64] {
    a.as_slice()
        .unwrap_or_else(|| unreachable!("amplitude buffer in non-standard layout"))
}

fn flat_mut(a: &mut nd::ArrayD<C64>) -> &mut [C64] {
    a.as_slice_mut()
        .unwrap_or_else(|| unreachable!("amplitude buffer in non-standard layout"))
}

fn strides(dims: &[usize]) -> Vec<usize> {
    let mut s: Vec<usize> = vec![1; dims.len()];
    for k in (0..dims.len().saturating_sub(1)).rev() {
        s[k] = s[k + 1] * dims[k + 1];
    }
    s
}

// Draw an index from unnormalized probabilities. Rounding that leaves the
// draw past the total falls back to the last index with non-zero weight.
fn sample_index<R>(probs: &[f64], rng: &mut R) -> usize
where R: Rng + ?Sized
{
    let total: f64 = probs.iter().sum();
    let mut r: f64 = rng.gen::<f64>() * total;
    let mut last: usize = 0;
    for (k, &p) in probs.iter().enumerate() {
        if p <= 0.0 { continue; }
        last = k;
        if r < p { return k; }
        r -= p;
    }
    last
}

/// Precomputed flat-index layout for contracting a matrix against a subset
/// of axes.
#[derive(Clone, Debug)]
struct Contraction {
    // (dimension, stride) of every untargeted axis, most significant first
    rest: Vec<(usize, usize)>,
    // flat offset of each joint target value, most significant target first
    offsets: Vec<usize>,
}

impl Contraction {
    fn new(dims: &[usize], axes: &[usize]) -> Self {
        let s = strides(dims);
        let tdims: Vec<usize> = axes.iter().map(|&a| dims[a]).collect();
        let d: usize = tdims.iter().product();
        let offsets: Vec<usize>
            = (0..d)
            .map(|j| {
                basis_digits(j as u64, &tdims).into_iter()
                    .zip(axes)
                    .map(|(digit, &a)| digit * s[a])
                    .sum()
            })
            .collect();
        let rest: Vec<(usize, usize)>
            = (0..dims.len())
            .filter(|a| !axes.contains(a))
            .map(|a| (dims[a], s[a]))
            .collect();
        Self { rest, offsets }
    }

    // call `f` on every flat index at which all target digits are zero,
    // counting through the untargeted axes in place
    fn for_each_base<F>(&self, mut f: F)
    where F: FnMut(usize)
    {
        if self.rest.iter().any(|&(d, _)| d == 0) { return; }
        let mut digits: Vec<usize> = vec![0; self.rest.len()];
        let mut base: usize = 0;
        loop {
            f(base);
            let mut k = self.rest.len();
            loop {
                if k == 0 { return; }
                k -= 1;
                let (d, s) = self.rest[k];
                digits[k] += 1;
                base += s;
                if digits[k] < d { break; }
                digits[k] = 0;
                base -= d * s;
            }
        }
    }

    fn left_multiply(&self, m: &na::DMatrix<C64>, src: &[C64], dst: &mut [C64]) {
        self.for_each_base(|b| {
            for (r, &off_r) in self.offsets.iter().enumerate() {
                dst[b + off_r]
                    = self.offsets.iter().enumerate()
                    .map(|(c, &off_c)| m[(r, c)] * src[b + off_c])
                    .sum();
            }
        });
    }
}

/// The live amplitude array and a scratch array of the same shape.
///
/// The scratch array is allocated lazily, the first time it is needed.
#[derive(Clone, Debug)]
pub struct DoubleBuffer {
    current: nd::ArrayD<C64>,
    spare: nd::ArrayD<C64>,
}

impl DoubleBuffer {
    pub fn new(current: nd::ArrayD<C64>) -> Self {
        let current
            = if current.is_standard_layout() {
                current
            } else {
                current.as_standard_layout().into_owned()
            };
        Self { current, spare: nd::ArrayD::zeros(nd::IxDyn(&[0])) }
    }

    pub fn current(&self) -> &nd::ArrayD<C64> { &self.current }

    fn ensure_spare(&mut self) {
        if self.spare.shape() != self.current.shape() {
            self.spare = nd::ArrayD::zeros(self.current.raw_dim());
        }
    }

    // write m · current into the spare buffer
    fn prepare(&mut self, m: &na::DMatrix<C64>, plan: &Contraction) {
        self.ensure_spare();
        plan.left_multiply(m, flat(&self.current), flat_mut(&mut self.spare));
    }

    fn spare_norm_sqr(&self) -> f64 {
        self.spare.iter().map(|a| a.norm_sqr()).sum()
    }

    fn scale_spare(&mut self, s: f64) {
        self.spare.mapv_inplace(|a| a * s);
    }

    // hand the spare buffer's contents over as the new state
    fn swap(&mut self) { mem::swap(&mut self.current, &mut self.spare); }
}

/// State vector of a set of qudits.
#[derive(Debug)]
pub struct StateVector {
    core: StateCore,
    buf: DoubleBuffer,
}

impl StateVector {
    /// Build a state from an amplitude array with one axis per qudit.
    ///
    /// Fails if the array's shape does not match the qudit dimensions or if
    /// the amplitudes are not normalized.
    pub fn from_amplitudes(
        qubits: Vec<Qid>,
        amps: nd::ArrayD<C64>,
        rng: SharedRng,
        log: SharedLog,
    ) -> Result<Self>
    {
        let core = StateCore::new(qubits, rng, log)?;
        let dims = core.dims();
        if amps.shape() != dims.as_slice() {
            return Err(SimError::ShapeMismatch {
                expected: dims,
                found: amps.shape().to_vec(),
            });
        }
        let norm: f64 = amps.iter().map(|a| a.norm_sqr()).sum();
        if (norm - 1.0).abs() > NORM_ATOL {
            return Err(SimError::config(
                format!("amplitudes are not normalized (norm² = {})", norm)));
        }
        Ok(Self { core, buf: DoubleBuffer::new(amps) })
    }

    fn with_core(core: StateCore, amps: nd::ArrayD<C64>) -> Self {
        Self { core, buf: DoubleBuffer::new(amps) }
    }

    /// The amplitude array, one axis per qudit in [`SimState::qubits`] order.
    pub fn tensor(&self) -> &nd::ArrayD<C64> { self.buf.current() }

    /// Flattened amplitudes; the first qudit is the most significant.
    pub fn state_vector(&self) -> na::DVector<C64> {
        let cur = self.buf.current();
        na::DVector::from_iterator(cur.len(), cur.iter().copied())
    }

    /// Probabilities of every basis state, in the order of
    /// [`state_vector`][Self::state_vector].
    pub fn probabilities(&self) -> Vec<f64> {
        self.buf.current().iter().map(|a| a.norm_sqr()).collect()
    }

    pub fn norm_sqr(&self) -> f64 {
        self.buf.current().iter().map(|a| a.norm_sqr()).sum()
    }

    fn plan(&self, qubits: &[Qid]) -> Result<Contraction> {
        let axes = self.core.axes(qubits)?;
        Ok(Contraction::new(&self.core.dims(), &axes))
    }

    /// Apply a matrix to `qubits`. The matrix is not checked for
    /// unitarity.
    pub fn apply_matrix(&mut self, qubits: &[Qid], m: &na::DMatrix<C64>)
        -> Result<()>
    {
        check_square(qubits, m)?;
        let plan = self.plan(qubits)?;
        self.buf.prepare(m, &plan);
        self.buf.swap();
        Ok(())
    }

    fn apply_mixture(
        &mut self,
        qubits: &[Qid],
        branches: &[(f64, na::DMatrix<C64>)],
        key: Option<&str>,
    ) -> Result<()>
    {
        for (_, u) in branches.iter() { check_square(qubits, u)?; }
        let plan = self.plan(qubits)?;
        let dist
            = WeightedIndex::new(branches.iter().map(|(p, _)| *p))
            .map_err(|e| SimError::channel(format!("mixture weights: {}", e)))?;
        let k = dist.sample(&mut *self.core.rng.borrow_mut());
        trace!(branch = k, "sampled mixture branch");
        self.buf.prepare(&branches[k].1, &plan);
        self.buf.swap();
        if let Some(key) = key {
            self.core.log.borrow_mut().record_channel(key, k);
        }
        Ok(())
    }

    fn apply_channel(
        &mut self,
        qubits: &[Qid],
        ops: &[na::DMatrix<C64>],
        key: Option<&str>,
    ) -> Result<()>
    {
        if ops.is_empty() {
            return Err(SimError::channel("channel has no Kraus operators"));
        }
        for k in ops.iter() { check_square(qubits, k)?; }
        let plan = self.plan(qubits)?;
        let p: f64 = self.core.rng.borrow_mut().gen();
        let buf = &mut self.buf;
        let sel = RandomChannelSelector::select_with(p, ops.len(), |k| {
            buf.prepare(&ops[k], &plan);
            buf.spare_norm_sqr()
        });
        if sel.needs_reevaluation() {
            self.buf.prepare(&ops[sel.index], &plan);
        }
        if sel.weight <= 0.0 {
            return Err(SimError::channel("selected Kraus branch has zero weight"));
        }
        trace!(branch = sel.index, weight = sel.weight, "sampled Kraus branch");
        self.buf.scale_spare(sel.weight.sqrt().recip());
        self.buf.swap();
        if let Some(key) = key {
            self.core.log.borrow_mut().record_channel(key, sel.index);
        }
        Ok(())
    }

    // joint distribution over the values of `axes`
    fn marginal(&self, axes: &[usize]) -> Vec<f64> {
        let dims = self.core.dims();
        let s = strides(&dims);
        let d: usize = axes.iter().map(|&a| dims[a]).product();
        let mut probs: Vec<f64> = vec![0.0; d];
        for (i, a) in self.buf.current().iter().enumerate() {
            let j
                = axes.iter()
                .fold(0, |acc, &ax| acc * dims[ax] + (i / s[ax]) % dims[ax]);
            probs[j] += a.norm_sqr();
        }
        probs
    }

    // zero out everything inconsistent with `digits` on `axes` and renormalize
    fn project(&mut self, axes: &[usize], digits: &[usize], prob: f64) {
        let dims = self.core.dims();
        let s = strides(&dims);
        let scale = prob.sqrt().recip();
        for (i, a) in flat_mut(&mut self.buf.current).iter_mut().enumerate() {
            let keep
                = axes.iter().zip(digits)
                .all(|(&ax, &d)| (i / s[ax]) % dims[ax] == d);
            if keep { *a *= scale; } else { *a = C64::from(0.0); }
        }
    }
}

impl SimState for StateVector {
    fn from_basis_state(
        qubits: Vec<Qid>,
        index: u64,
        rng: SharedRng,
        log: SharedLog,
    ) -> Result<Self>
    {
        let core = StateCore::new(qubits, rng, log)?;
        let dims = core.dims();
        let total
            = dims.iter()
            .try_fold(1_u64, |acc, &d| acc.checked_mul(d as u64))
            .ok_or_else(|| SimError::config("state space too large"))?;
        if index >= total {
            return Err(SimError::config(
                format!("initial state {} out of range for {} basis states", index, total)));
        }
        let mut amps: nd::ArrayD<C64> = nd::ArrayD::zeros(nd::IxDyn(&dims));
        let digits = basis_digits(index, &dims);
        amps[nd::IxDyn(&digits)] = C64::from(1.0);
        Ok(Self::with_core(core, amps))
    }

    fn core(&self) -> &StateCore { &self.core }

    fn core_mut(&mut self) -> &mut StateCore { &mut self.core }

    fn apply(&mut self, op: &dyn Operation) -> Result<()> {
        let action = {
            let log = self.core.log.borrow();
            Action::resolve(op, &log, &DENSE_STRATEGIES)
        };
        let Some(action) = action else {
            return Err(SimError::unsupported(op.name()));
        };
        match action {
            Action::Skip => Ok(()),
            Action::Measure(m) => self.measure(m).map(|_| ()),
            Action::Reset(qubits) => self.reset(&qubits),
            Action::Unitary(u) => self.apply_matrix(&op.qubits(), &u),
            Action::Mixture { branches, key }
                => self.apply_mixture(&op.qubits(), &branches, key),
            Action::Channel { ops, key }
                => self.apply_channel(&op.qubits(), &ops, key),
            Action::Decompose(ops) => {
                trace!(op = %op.name(), n = ops.len(), "decomposing");
                ops.iter().try_for_each(|sub| self.apply(sub.as_ref()))
            },
            Action::Stabilizer(_) => Err(SimError::unsupported(op.name())),
        }
    }

    fn kronecker_product(&self, other: &Self) -> Result<Self> {
        let core = self.core.concat(&other.core)?;
        let shape: Vec<usize>
            = self.tensor().shape().iter()
            .chain(other.tensor().shape())
            .copied()
            .collect();
        let data: Vec<C64>
            = self.tensor().iter()
            .cartesian_product(other.tensor().iter())
            .map(|(a, b)| a * b)
            .collect();
        let n = data.len();
        let amps
            = nd::ArrayD::from_shape_vec(nd::IxDyn(&shape), data)
            .map_err(|_| SimError::ShapeMismatch {
                expected: shape.clone(),
                found: vec![n],
            })?;
        Ok(Self::with_core(core, amps))
    }

    fn factor(&self, qubits: &[Qid], validate: bool, atol: f64)
        -> Result<(Self, Self)>
    {
        let axes = self.core.axes(qubits)?;
        let n = self.core.qubits.len();
        let rest_axes: Vec<usize>
            = (0..n).filter(|a| !axes.contains(a)).collect();
        let rest: Vec<Qid>
            = rest_axes.iter().map(|&a| self.core.qubits[a]).collect();
        let ext_core = self.core.with_qubits(qubits.to_vec())?;
        let rem_core = self.core.with_qubits(rest)?;
        let ext_dims = ext_core.dims();
        let rem_dims = rem_core.dims();
        let d1: usize = ext_dims.iter().product();
        let d2: usize = rem_dims.iter().product();

        // as a d1 × d2 row-major matrix
        let perm: Vec<usize> = axes.iter().chain(&rest_axes).copied().collect();
        let t: nd::ArrayD<C64>
            = self.tensor().view()
            .permuted_axes(perm)
            .as_standard_layout()
            .into_owned();
        let t = flat(&t);
        let Some((pivot, _)) = t.iter().map(|a| a.norm_sqr()).enumerate()
            .max_by(|(_, a), (_, b)| a.total_cmp(b))
            .filter(|(_, a)| *a > 0.0)
        else {
            return Err(SimError::Factor { qubits: qubits.to_vec(), atol });
        };
        let (pi, pj) = (pivot / d2, pivot % d2);
        let mut ext: Vec<C64> = (0..d1).map(|i| t[i * d2 + pj]).collect();
        let mut rem: Vec<C64> = (0..d2).map(|j| t[pi * d2 + j]).collect();
        let ext_norm: f64 = ext.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
        let rem_norm: f64 = rem.iter().map(|a| a.norm_sqr()).sum::<f64>().sqrt();
        let phase: C64 = t[pivot] / t[pivot].norm();
        ext.iter_mut().for_each(|a| { *a /= ext_norm; });
        rem.iter_mut().for_each(|a| { *a /= phase * rem_norm; });

        if validate {
            let err
                = ext.iter().cartesian_product(rem.iter())
                .zip(t)
                .map(|((a, b), x)| (a * b - x).norm())
                .fold(0.0_f64, f64::max);
            if err > atol {
                debug!(?qubits, err, "state is not separable");
                return Err(SimError::Factor { qubits: qubits.to_vec(), atol });
            }
        }
        let ext_amps
            = nd::ArrayD::from_shape_vec(nd::IxDyn(&ext_dims), ext)
            .map_err(|_| SimError::ShapeMismatch {
                expected: ext_dims.clone(),
                found: vec![d1],
            })?;
        let rem_amps
            = nd::ArrayD::from_shape_vec(nd::IxDyn(&rem_dims), rem)
            .map_err(|_| SimError::ShapeMismatch {
                expected: rem_dims.clone(),
                found: vec![d2],
            })?;
        Ok((Self::with_core(ext_core, ext_amps), Self::with_core(rem_core, rem_amps)))
    }

    fn allows_factoring(&self) -> bool { true }

    fn transpose_to_qubit_order(&self, order: &[Qid]) -> Result<Self> {
        let axes = self.core.permutation(order)?;
        let amps: nd::ArrayD<C64>
            = self.tensor().view()
            .permuted_axes(axes)
            .as_standard_layout()
            .into_owned();
        Ok(Self::with_core(self.core.with_qubits(order.to_vec())?, amps))
    }

    fn copy(&self, deep_copy_buffers: bool) -> Self {
        let buf
            = if deep_copy_buffers {
                self.buf.clone()
            } else {
                DoubleBuffer::new(self.buf.current.clone())
            };
        Self { core: self.core.fork(deep_copy_buffers), buf }
    }

    fn sample(&self, qubits: &[Qid], repetitions: usize, seed: Option<u64>)
        -> Result<na::DMatrix<usize>>
    {
        let axes = self.core.axes(qubits)?;
        let tdims: Vec<usize> = qubits.iter().map(|q| q.dim).collect();
        let probs = self.marginal(&axes);
        let mut rng = self.core.sampling_rng(seed);
        let mut out: na::DMatrix<usize> = na::DMatrix::zeros(repetitions, qubits.len());
        for r in 0..repetitions {
            let k = sample_index(&probs, &mut rng);
            for (c, d) in basis_digits(k as u64, &tdims).into_iter().enumerate() {
                out[(r, c)] = d;
            }
        }
        Ok(out)
    }

    fn perform_measurement(&mut self, qubits: &[Qid]) -> Result<Vec<usize>> {
        let axes = self.core.axes(qubits)?;
        let tdims: Vec<usize> = qubits.iter().map(|q| q.dim).collect();
        let probs = self.marginal(&axes);
        let k = sample_index(&probs, &mut *self.core.rng.borrow_mut());
        let digits = basis_digits(k as u64, &tdims);
        self.project(&axes, &digits, probs[k]);
        Ok(digits)
    }

    fn reset(&mut self, qubits: &[Qid]) -> Result<()> {
        self.core.axes(qubits)?;
        for &q in qubits.iter() {
            let k = self.perform_measurement(&[q])?[0];
            if k != 0 {
                // exchange |0> and |k>
                let mut perm: na::DMatrix<C64> = na::DMatrix::identity(q.dim, q.dim);
                perm.swap_columns(0, k);
                self.apply_matrix(&[q], &perm)?;
            }
        }
        Ok(())
    }
}
