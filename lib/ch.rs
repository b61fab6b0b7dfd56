//! *N*-qubit stabilizer states in CH-form.
//!
//! A stabilizer state is written as
//!
//! ```text
//! ∣ψ⟩ = ω U_C U_H ∣s⟩
//! ```
//!
//! where *ω* is a complex scalar, *U*<sub>*C*</sub> is a circuit of `S`, `CZ`,
//! and `CNOT` gates, *U*<sub>*H*</sub> is a layer of Hadamards on the qubits
//! selected by the bit vector *v*, and ∣*s*⟩ is a computational basis state.
//! *U*<sub>*C*</sub> is kept through its action on Paulis by conjugation,
//! encoded in three *N* × *N* binary matrices *G*, *F*, *M* and a vector *γ* of
//! phase exponents (on **i**), so that
//!
//! ```text
//! U_C† Z_p U_C = Π_j Z_j^G[p, j]
//! U_C† X_p U_C = i^γ[p] Π_j X_j^F[p, j] Z_j^M[p, j]
//! ```
//!
//! Gates from the left-hand side (`S`, `CZ`, `CNOT`) update only the
//! *U*<sub>*C*</sub> part in *O*(*N*) time. A Hadamard is pushed through
//! *U*<sub>*C*</sub>, which produces a sum of two basis states behind the
//! Hadamard layer; this sum is folded back into a single basis state by
//! right-multiplying *U*<sub>*C*</sub> with a few more Clifford gates, in
//! *O*(*N*<sup>2</sup>) time. Unlike the tableau representation, the global
//! phase is tracked exactly, so amplitudes can be computed one at a time in
//! *O*(*N*<sup>2</sup>).
//!
//! See [arXiv:1808.00128][ch-form] for details.
//!
//! # Example
//! ```
//! use entangle_sim::ch::ChForm;
//!
//! let mut ch = ChForm::new(2);
//! ch.apply_h(0).apply_cnot(0, 1);
//! let psi = ch.state_vector();
//! assert!((psi[0].re - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
//! assert!((psi[3].re - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-12);
//! ```
//!
//! [ch-form]: https://arxiv.org/abs/1808.00128

use std::f64::consts::{ FRAC_1_SQRT_2, FRAC_PI_4 };
use nalgebra as na;
use num_complex::Complex64 as C64;
use rand::Rng;
use tracing::trace;
use crate::{
    classical::SharedLog,
    error::{ Result, SimError },
    gate::StabGate,
    op::{ Action, Operation, STABILIZER_STRATEGIES },
    qid::Qid,
    state::{ SharedRng, SimState, StateCore },
};

// i^k, exactly
fn ipow(k: u8) -> C64 {
    match k % 4 {
        0 => C64::new(1.0, 0.0),
        1 => C64::new(0.0, 1.0),
        2 => C64::new(-1.0, 0.0),
        _ => C64::new(0.0, -1.0),
    }
}

fn sign(neg: bool) -> f64 { if neg { -1.0 } else { 1.0 } }

// Reduce (|y> + i^delta |z>) / √2 for single-qubit y != z to
// om · S^a H^b |c>.
fn hdec(v: bool, y: bool, delta: u8) -> (C64, bool, bool, bool) {
    let mut om = C64::new(1.0, 0.0);
    let mut delta = delta % 4;
    if y {
        om = ipow(delta);
        delta = (4 - delta) % 4;
    }
    if !v {
        return (om, delta & 1 == 1, true, (delta >> 1) & 1 == 1);
    }
    match delta {
        0 => (om, false, false, false),
        2 => (om, false, false, true),
        1 => (om * C64::cis(FRAC_PI_4), true, true, true),
        _ => (om * C64::cis(-FRAC_PI_4), true, true, false),
    }
}

/// A stabilizer state of a finite register of qubits in CH-form.
#[derive(Clone, Debug, PartialEq)]
pub struct ChForm {
    pub(crate) n: usize,
    pub(crate) g: na::DMatrix<bool>,
    pub(crate) f: na::DMatrix<bool>,
    pub(crate) m: na::DMatrix<bool>,
    pub(crate) gamma: na::DVector<u8>, // exponents on i, mod 4
    pub(crate) v: na::DVector<bool>, // Hadamard layer
    pub(crate) s: na::DVector<bool>, // basis state
    pub(crate) omega: C64,
}

impl ChForm {
    /// Create a new state of size `n` initialized to ∣0...0⟩.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            g: na::DMatrix::from_fn(n, n, |i, j| i == j),
            f: na::DMatrix::from_fn(n, n, |i, j| i == j),
            m: na::DMatrix::from_element(n, n, false),
            gamma: na::DVector::from_element(n, 0),
            v: na::DVector::from_element(n, false),
            s: na::DVector::from_element(n, false),
            omega: C64::new(1.0, 0.0),
        }
    }

    /// Create the basis state with big-endian index `index`.
    pub fn from_basis_state(n: usize, index: u64) -> Self {
        let mut ch = Self::new(n);
        for k in 0..n {
            let bit = index.checked_shr((n - 1 - k) as u32).unwrap_or(0) & 1;
            if bit == 1 { ch.apply_x(k); }
        }
        ch
    }

    pub fn n(&self) -> usize { self.n }

    /// The global scalar ω.
    pub fn omega(&self) -> C64 { self.omega }

    /// Apply an S gate (= Z(π/2)) to the `q`-th qubit.
    pub fn apply_s(&mut self, q: usize) -> &mut Self {
        for j in 0..self.n {
            let b = self.g[(q, j)];
            self.m[(q, j)] ^= b;
        }
        self.gamma[q] = (self.gamma[q] + 3) % 4;
        self
    }

    /// Apply a CZ gate to the `a`-th and `b`-th qubits, which must differ.
    pub fn apply_cz(&mut self, a: usize, b: usize) -> &mut Self {
        for j in 0..self.n {
            let ga = self.g[(a, j)];
            let gb = self.g[(b, j)];
            self.m[(a, j)] ^= gb;
            self.m[(b, j)] ^= ga;
        }
        self
    }

    /// Apply a CNOT gate to the `b`-th qubit, with the `a`-th qubit as
    /// control. `a` and `b` must differ.
    pub fn apply_cnot(&mut self, a: usize, b: usize) -> &mut Self {
        let par
            = (0..self.n)
            .filter(|&j| self.m[(a, j)] && self.f[(b, j)])
            .count() % 2;
        self.gamma[a] = (self.gamma[a] + self.gamma[b] + 2 * par as u8) % 4;
        for j in 0..self.n {
            let ga = self.g[(a, j)];
            let fb = self.f[(b, j)];
            let mb = self.m[(b, j)];
            self.g[(b, j)] ^= ga;
            self.f[(a, j)] ^= fb;
            self.m[(a, j)] ^= mb;
        }
        self
    }

    /// Apply a Hadamard gate to the `q`-th qubit.
    pub fn apply_h(&mut self, q: usize) -> &mut Self {
        let n = self.n;
        let mut t: Vec<bool> = vec![false; n];
        let mut u: Vec<bool> = vec![false; n];
        let mut alpha: usize = 0;
        let mut beta: usize = 0;
        for j in 0..n {
            let (g, f, m) = (self.g[(q, j)], self.f[(q, j)], self.m[(q, j)]);
            let (v, s) = (self.v[j], self.s[j]);
            t[j] = s ^ (g && v);
            u[j] = s ^ (f && !v) ^ (m && v);
            if g && !v && s { alpha += 1; }
            if m && !v && s { beta += 1; }
            if f && v && m { beta += 1; }
            if f && v && s { beta += 1; }
        }
        let delta = ((self.gamma[q] as usize + 2 * (alpha + beta)) % 4) as u8;
        self.update_sum(t, u, delta, alpha % 2 == 1);
        self
    }

    /// Apply a Z gate to the `q`-th qubit.
    pub fn apply_z(&mut self, q: usize) -> &mut Self {
        self.apply_s(q).apply_s(q)
    }

    /// Apply an X gate to the `q`-th qubit.
    pub fn apply_x(&mut self, q: usize) -> &mut Self {
        self.apply_h(q).apply_z(q).apply_h(q)
    }

    /// Apply a Y gate to the `q`-th qubit.
    pub fn apply_y(&mut self, q: usize) -> &mut Self {
        self.apply_z(q).apply_x(q);
        self.omega *= C64::i();
        self
    }

    /// Apply a SWAP gate to the `a`-th and `b`-th qubits.
    pub fn apply_swap(&mut self, a: usize, b: usize) -> &mut Self {
        self.apply_cnot(a, b).apply_cnot(b, a).apply_cnot(a, b)
    }

    // U_C <- U_C S_q
    fn right_s(&mut self, q: usize) {
        for p in 0..self.n {
            let fpq = self.f[(p, q)];
            self.m[(p, q)] ^= fpq;
            if fpq { self.gamma[p] = (self.gamma[p] + 3) % 4; }
        }
    }

    // U_C <- U_C CZ_{q, r}
    fn right_cz(&mut self, q: usize, r: usize) {
        for p in 0..self.n {
            let (fpq, fpr) = (self.f[(p, q)], self.f[(p, r)]);
            self.m[(p, q)] ^= fpr;
            self.m[(p, r)] ^= fpq;
            if fpq && fpr { self.gamma[p] = (self.gamma[p] + 2) % 4; }
        }
    }

    // U_C <- U_C CNOT_{q, r}
    fn right_cnot(&mut self, q: usize, r: usize) {
        for p in 0..self.n {
            let gpr = self.g[(p, r)];
            let fpq = self.f[(p, q)];
            let mpr = self.m[(p, r)];
            self.g[(p, q)] ^= gpr;
            self.f[(p, r)] ^= fpq;
            self.m[(p, q)] ^= mpr;
        }
    }

    // Fold (-1)^alpha (|t> + i^delta |u>) / √2 behind the Hadamard layer back
    // into a single basis state.
    fn update_sum(&mut self, t: Vec<bool>, u: Vec<bool>, delta: u8, alpha: bool) {
        if t == u {
            self.s = na::DVector::from_vec(t);
            self.omega *= (C64::new(1.0, 0.0) + ipow(delta)) * (sign(alpha) * FRAC_1_SQRT_2);
            return;
        }
        let set0: Vec<usize>
            = (0..self.n).filter(|&i| !self.v[i] && t[i] != u[i]).collect();
        let set1: Vec<usize>
            = (0..self.n).filter(|&i| self.v[i] && t[i] != u[i]).collect();
        let q: usize;
        if let Some(&q0) = set0.first() {
            q = q0;
            for &i in set0.iter().skip(1) { self.right_cnot(q, i); }
            for &i in set1.iter() { self.right_cz(q, i); }
        } else {
            q = set1[0];
            for &i in set1.iter().skip(1) { self.right_cnot(i, q); }
        }
        let y: Vec<bool>
            = if t[q] {
                let mut y = u;
                y[q] = !y[q];
                y
            } else {
                t
            };
        let (om, a, b, c) = hdec(self.v[q], y[q], delta);
        self.s = na::DVector::from_vec(y);
        self.s[q] = c;
        self.omega *= om * sign(alpha);
        if a { self.right_s(q); }
        self.v[q] = b;
    }

    /// Apply a generator of the Clifford group, given by qubit indices.
    pub fn apply_gate(&mut self, gate: StabIndexGate) -> &mut Self {
        match gate {
            StabIndexGate::H(q) => self.apply_h(q),
            StabIndexGate::S(q) => self.apply_s(q),
            StabIndexGate::X(q) => self.apply_x(q),
            StabIndexGate::Y(q) => self.apply_y(q),
            StabIndexGate::Z(q) => self.apply_z(q),
            StabIndexGate::CX(a, b) => self.apply_cnot(a, b),
            StabIndexGate::CZ(a, b) => self.apply_cz(a, b),
        }
    }

    /// Project the `q`-th qubit onto the Z eigenspace for `outcome`,
    /// renormalizing the state.
    ///
    /// The outcome must have non-zero probability.
    pub fn project_z(&mut self, q: usize, outcome: bool) -> &mut Self {
        let n = self.n;
        let t: Vec<bool> = self.s.iter().copied().collect();
        let u: Vec<bool>
            = (0..n).map(|j| (self.g[(q, j)] && self.v[j]) ^ self.s[j]).collect();
        let count
            = (0..n)
            .filter(|&j| self.g[(q, j)] && !self.v[j] && self.s[j])
            .count();
        let delta = ((2 * count + 2 * outcome as usize) % 4) as u8;
        if t == u { self.omega *= FRAC_1_SQRT_2; }
        self.update_sum(t, u, delta, false);
        self
    }

    /// Perform a projective measurement on the `q`-th qubit in the Z basis,
    /// collapsing the state.
    pub fn measure<R>(&mut self, q: usize, rng: &mut R) -> bool
    where R: Rng + ?Sized
    {
        let mut parity = false;
        for j in 0..self.n {
            let w = if self.v[j] { rng.gen::<bool>() } else { self.s[j] };
            parity ^= w && self.g[(q, j)];
        }
        self.project_z(q, parity);
        parity
    }

    /// Amplitude of the basis state given by `bits`, most significant first.
    ///
    /// *Panics if `bits` does not have one entry per qubit.*
    pub fn amplitude(&self, bits: &[bool]) -> C64 {
        assert_eq!(bits.len(), self.n, "ChForm::amplitude: wrong number of bits");
        let n = self.n;
        let mut mu: usize = 0;
        let mut u: Vec<bool> = vec![false; n];
        for p in (0..n).filter(|&p| bits[p]) {
            mu += self.gamma[p] as usize;
            for (j, uj) in u.iter_mut().enumerate() { *uj ^= self.f[(p, j)]; }
            let par = (0..n).filter(|&j| self.m[(p, j)] && u[j]).count();
            mu += 2 * par;
        }
        if (0..n).any(|j| !self.v[j] && u[j] != self.s[j]) {
            return C64::new(0.0, 0.0);
        }
        let neg
            = (0..n).filter(|&j| self.v[j] && u[j] && self.s[j]).count() % 2 == 1;
        let nv = self.v.iter().filter(|&&vj| vj).count();
        self.omega
            * ipow((mu % 4) as u8)
            * (sign(neg) * 2.0_f64.powf(-(nv as f64) / 2.0))
    }

    /// Compute the full state vector, with the first qubit as the most
    /// significant.
    pub fn state_vector(&self) -> na::DVector<C64> {
        let n = self.n;
        na::DVector::from_fn(1 << n, |x, _| {
            let bits: Vec<bool> = (0..n).map(|k| (x >> (n - 1 - k)) & 1 == 1).collect();
            self.amplitude(&bits)
        })
    }

    /// Tensor product with `other`, whose qubits are placed after those of
    /// `self`.
    pub fn kron(&self, other: &Self) -> Self {
        let (n1, n2) = (self.n, other.n);
        let n = n1 + n2;
        let block = |a: &na::DMatrix<bool>, b: &na::DMatrix<bool>| {
            na::DMatrix::from_fn(n, n, |i, j| {
                match (i < n1, j < n1) {
                    (true, true) => a[(i, j)],
                    (false, false) => b[(i - n1, j - n1)],
                    _ => false,
                }
            })
        };
        let cat = |a: &na::DVector<_>, b: &na::DVector<_>| {
            na::DVector::from_iterator(n, a.iter().chain(b.iter()).copied())
        };
        Self {
            n,
            g: block(&self.g, &other.g),
            f: block(&self.f, &other.f),
            m: block(&self.m, &other.m),
            gamma: na::DVector::from_iterator(
                n, self.gamma.iter().chain(other.gamma.iter()).copied()),
            v: cat(&self.v, &other.v),
            s: cat(&self.s, &other.s),
            omega: self.omega * other.omega,
        }
    }

    /// Reorder qubits so that the new `i`-th qubit is the old `axes[i]`-th.
    pub fn reindex(&self, axes: &[usize]) -> Self {
        let n = self.n;
        let pick = |a: &na::DMatrix<bool>| {
            na::DMatrix::from_fn(n, n, |i, j| a[(axes[i], axes[j])])
        };
        Self {
            n,
            g: pick(&self.g),
            f: pick(&self.f),
            m: pick(&self.m),
            gamma: na::DVector::from_fn(n, |i, _| self.gamma[axes[i]]),
            v: na::DVector::from_fn(n, |i, _| self.v[axes[i]]),
            s: na::DVector::from_fn(n, |i, _| self.s[axes[i]]),
            omega: self.omega,
        }
    }
}

/// [`StabGate`] with qubits resolved to register indices.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StabIndexGate {
    H(usize),
    S(usize),
    X(usize),
    Y(usize),
    Z(usize),
    CX(usize, usize),
    CZ(usize, usize),
}

/// A CH-form stabilizer state over labeled qubits.
///
/// Only qubits (dimension 2) are accepted, and only Clifford operations (or
/// operations that decompose into them) can be applied. Factoring is not
/// supported, so a container holding these states never splits them.
#[derive(Debug)]
pub struct ChFormState {
    core: StateCore,
    ch: ChForm,
}

impl ChFormState {
    fn check_qubits(qubits: &[Qid]) -> Result<()> {
        if qubits.iter().any(|q| q.dim != 2) {
            return Err(SimError::ShapeMismatch {
                expected: vec![2; qubits.len()],
                found: qubits.iter().map(|q| q.dim).collect(),
            });
        }
        Ok(())
    }

    pub fn ch(&self) -> &ChForm { &self.ch }

    /// Full state vector in [`SimState::qubits`] order.
    pub fn state_vector(&self) -> na::DVector<C64> { self.ch.state_vector() }

    fn resolve_gate(&self, gate: StabGate) -> Result<StabIndexGate> {
        use StabIndexGate as G;
        let ax = |q: Qid| self.core.axis(q);
        Ok(match gate {
            StabGate::CX(a, b) | StabGate::CZ(a, b) if a == b
                => return Err(SimError::RepeatedQubit(a)),
            StabGate::H(q) => G::H(ax(q)?),
            StabGate::S(q) => G::S(ax(q)?),
            StabGate::X(q) => G::X(ax(q)?),
            StabGate::Y(q) => G::Y(ax(q)?),
            StabGate::Z(q) => G::Z(ax(q)?),
            StabGate::CX(a, b) => G::CX(ax(a)?, ax(b)?),
            StabGate::CZ(a, b) => G::CZ(ax(a)?, ax(b)?),
        })
    }

    fn apply_stab(&mut self, gates: Vec<StabGate>) -> Result<()> {
        let resolved: Vec<StabIndexGate>
            = gates.into_iter()
            .map(|g| self.resolve_gate(g))
            .collect::<Result<_>>()?;
        resolved.into_iter().for_each(|g| { self.ch.apply_gate(g); });
        Ok(())
    }
}

impl SimState for ChFormState {
    fn from_basis_state(
        qubits: Vec<Qid>,
        index: u64,
        rng: SharedRng,
        log: SharedLog,
    ) -> Result<Self>
    {
        Self::check_qubits(&qubits)?;
        let core = StateCore::new(qubits, rng, log)?;
        let n = core.qubits.len();
        if n < 64 && index >> n != 0 {
            return Err(SimError::config(
                format!("initial state {} out of range for {} qubits", index, n)));
        }
        Ok(Self { core, ch: ChForm::from_basis_state(n, index) })
    }

    fn core(&self) -> &StateCore { &self.core }

    fn core_mut(&mut self) -> &mut StateCore { &mut self.core }

    fn apply(&mut self, op: &dyn Operation) -> Result<()> {
        let action = {
            let log = self.core.log.borrow();
            Action::resolve(op, &log, &STABILIZER_STRATEGIES)
        };
        let Some(action) = action else {
            return Err(SimError::unsupported(op.name()));
        };
        match action {
            Action::Skip => Ok(()),
            Action::Measure(m) => self.measure(m).map(|_| ()),
            Action::Reset(qubits) => self.reset(&qubits),
            Action::Stabilizer(gates) => {
                Self::check_qubits(&op.qubits())?;
                self.apply_stab(gates)
            },
            Action::Decompose(ops) => {
                trace!(op = %op.name(), n = ops.len(), "decomposing");
                ops.iter().try_for_each(|sub| self.apply(sub.as_ref()))
            },
            Action::Unitary(_)
            | Action::Mixture { .. }
            | Action::Channel { .. }
            => Err(SimError::unsupported(op.name())),
        }
    }

    fn kronecker_product(&self, other: &Self) -> Result<Self> {
        let core = self.core.concat(&other.core)?;
        Ok(Self { core, ch: self.ch.kron(&other.ch) })
    }

    fn factor(&self, qubits: &[Qid], _validate: bool, _atol: f64)
        -> Result<(Self, Self)>
    {
        Err(SimError::unsupported(format!(
            "factoring a CH-form state on [{}]",
            qubits.iter().map(|q| q.to_string()).collect::<Vec<_>>().join(", "),
        )))
    }

    fn allows_factoring(&self) -> bool { false }

    fn transpose_to_qubit_order(&self, order: &[Qid]) -> Result<Self> {
        let axes = self.core.permutation(order)?;
        let core = self.core.with_qubits(order.to_vec())?;
        Ok(Self { core, ch: self.ch.reindex(&axes) })
    }

    fn copy(&self, deep_copy_buffers: bool) -> Self {
        Self { core: self.core.fork(deep_copy_buffers), ch: self.ch.clone() }
    }

    fn sample(&self, qubits: &[Qid], repetitions: usize, seed: Option<u64>)
        -> Result<na::DMatrix<usize>>
    {
        let axes = self.core.axes(qubits)?;
        let mut rng = self.core.sampling_rng(seed);
        let mut out: na::DMatrix<usize> = na::DMatrix::zeros(repetitions, axes.len());
        for r in 0..repetitions {
            let mut ch = self.ch.clone();
            for (c, &a) in axes.iter().enumerate() {
                out[(r, c)] = ch.measure(a, &mut rng) as usize;
            }
        }
        Ok(out)
    }

    fn perform_measurement(&mut self, qubits: &[Qid]) -> Result<Vec<usize>> {
        let axes = self.core.axes(qubits)?;
        let rng = self.core.rng();
        let mut rng = rng.borrow_mut();
        Ok(
            axes.into_iter()
                .map(|a| self.ch.measure(a, &mut *rng) as usize)
                .collect()
        )
    }

    fn reset(&mut self, qubits: &[Qid]) -> Result<()> {
        let axes = self.core.axes(qubits)?;
        let rng = self.core.rng();
        let mut rng = rng.borrow_mut();
        for a in axes.into_iter() {
            if self.ch.measure(a, &mut *rng) { self.ch.apply_x(a); }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::rc::Rc;
    use rand::{ rngs::StdRng, SeedableRng };
    use crate::{
        classical::ClassicalDataLog,
        dense::StateVector,
        gate::Gate,
        op::{ Measure, OpRef },
        state::shared_rng,
    };

    fn new_pair(n: usize, index: u64, seed: u64) -> (ChFormState, StateVector) {
        let rng = shared_rng(StdRng::seed_from_u64(seed));
        let log = ClassicalDataLog::shared();
        let qubits = Qid::range(n);
        let ch = ChFormState::from_basis_state(
            qubits.clone(), index, rng.clone(), log.clone()).unwrap();
        let sv = StateVector::from_basis_state(qubits, index, rng, log).unwrap();
        (ch, sv)
    }

    fn assert_vec_close(a: &na::DVector<C64>, b: &na::DVector<C64>) {
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).norm() < 1e-9, "{} != {}\n{}\n{}", x, y, a, b);
        }
    }

    fn assert_close_up_to_phase(a: &na::DVector<C64>, b: &na::DVector<C64>) {
        let (k, _)
            = b.iter().enumerate()
            .max_by(|(_, x), (_, y)| x.norm().total_cmp(&y.norm()))
            .unwrap();
        let phase = a[k] / b[k];
        assert!((phase.norm() - 1.0).abs() < 1e-9);
        assert_vec_close(a, &b.map(|y| y * phase));
    }

    #[test]
    fn basis_states() {
        for index in 0..8_u64 {
            let (ch, sv) = new_pair(3, index, 0);
            assert_vec_close(&ch.state_vector(), &sv.state_vector());
        }
        let rng = shared_rng(StdRng::seed_from_u64(0));
        let res = ChFormState::from_basis_state(
            Qid::range(2), 4, rng, ClassicalDataLog::shared());
        assert!(matches!(res, Err(SimError::Configuration(_))));
    }

    #[test]
    fn random_clifford_circuits_match_dense() {
        let mut rng = StdRng::seed_from_u64(10546);
        for trial in 0..100 {
            let n: usize = rng.gen_range(1..=4);
            let index: u64 = rng.gen_range(0..(1 << n));
            let (mut ch, mut sv) = new_pair(n, index, trial);
            let qubits = Qid::range(n);
            for _ in 0..30 {
                let gate = Gate::sample_clifford(&qubits, &mut rng).unwrap();
                ch.apply(&gate).unwrap();
                sv.apply(&gate).unwrap();
            }
            // global phase is tracked exactly
            assert_vec_close(&ch.state_vector(), &sv.state_vector());
        }
    }

    #[test]
    fn composite_cliffords() {
        let q = Qid::range(3);
        let (mut ch, mut sv) = new_pair(3, 0b011, 0);
        let gates = [
            Gate::H(q[0]),
            Gate::SInv(q[1]),
            Gate::CY(q[0], q[2]),
            Gate::Swap(q[1], q[2]),
            Gate::Y(q[1]),
            Gate::I(q[2]),
        ];
        for g in gates.iter() {
            ch.apply(g).unwrap();
            sv.apply(g).unwrap();
        }
        assert_vec_close(&ch.state_vector(), &sv.state_vector());
    }

    #[test]
    fn measurement_projects() {
        let mut rng = StdRng::seed_from_u64(10546);
        for trial in 0..50 {
            let n: usize = rng.gen_range(1..=4);
            let (mut ch, mut sv) = new_pair(n, 0, trial);
            let qubits = Qid::range(n);
            for _ in 0..20 {
                let gate = Gate::sample_clifford(&qubits, &mut rng).unwrap();
                ch.apply(&gate).unwrap();
                sv.apply(&gate).unwrap();
            }
            let k: usize = rng.gen_range(0..n);
            let outcome = ch.perform_measurement(&[qubits[k]]).unwrap()[0];
            let mut projected = sv.state_vector();
            for (x, a) in projected.iter_mut().enumerate() {
                if (x >> (n - 1 - k)) & 1 != outcome { *a = C64::new(0.0, 0.0); }
            }
            let norm = projected.norm();
            assert!(norm > 1e-9, "outcome {} has zero probability", outcome);
            assert_close_up_to_phase(&ch.state_vector(), &projected.unscale(norm));
        }
    }

    #[test]
    fn bell_measurement() {
        let q = Qid::range(2);
        for seed in 0..10 {
            let (mut ch, _) = new_pair(2, 0, seed);
            ch.apply(&Gate::H(q[0])).unwrap();
            ch.apply(&Gate::CX(q[0], q[1])).unwrap();
            let out = ch.measure(&Measure::new(q.clone(), "m")).unwrap();
            assert_eq!(out[0], out[1]);
            let log = ch.core().log();
            assert_eq!(log.borrow().last("m"), Some(out.as_slice()));
        }
    }

    #[test]
    fn kron_and_transpose() {
        let q = Qid::range(3);
        let rng = shared_rng(StdRng::seed_from_u64(0));
        let log = ClassicalDataLog::shared();
        let mut a = ChFormState::from_basis_state(
            vec![q[0]], 1, rng.clone(), log.clone()).unwrap();
        a.apply(&Gate::S(q[0])).unwrap();
        let mut b = ChFormState::from_basis_state(
            vec![q[1], q[2]], 0, rng.clone(), log.clone()).unwrap();
        b.apply(&Gate::H(q[1])).unwrap();
        b.apply(&Gate::CX(q[1], q[2])).unwrap();
        b.apply(&Gate::S(q[2])).unwrap();

        let ab = a.kronecker_product(&b).unwrap();
        assert_eq!(ab.qubits(), q.as_slice());
        let expected: na::DVector<C64>
            = a.state_vector().kronecker(&b.state_vector());
        assert_vec_close(&ab.state_vector(), &expected);

        let order = [q[2], q[0], q[1]];
        let t = ab.transpose_to_qubit_order(&order).unwrap();
        assert_eq!(t.qubits(), &order);
        let mut sv
            = StateVector::from_basis_state(q.clone(), 0b100, rng, log).unwrap();
        sv.apply(&Gate::S(q[0])).unwrap();
        sv.apply(&Gate::H(q[1])).unwrap();
        sv.apply(&Gate::CX(q[1], q[2])).unwrap();
        sv.apply(&Gate::S(q[2])).unwrap();
        let sv = sv.transpose_to_qubit_order(&order).unwrap();
        assert_vec_close(&t.state_vector(), &sv.state_vector());
    }

    #[test]
    fn non_clifford_rejected() {
        let q = Qid::range(3);
        let (mut ch, _) = new_pair(3, 0, 0);
        ch.apply(&Gate::H(q[0])).unwrap();
        let before = ch.state_vector();
        assert!(matches!(
            ch.apply(&Gate::T(q[0])),
            Err(SimError::UnsupportedOperation(_))
        ));
        assert_vec_close(&ch.state_vector(), &before);
        // decomposes, but into T gates
        assert!(matches!(
            ch.apply(&Gate::CCX(q[0], q[1], q[2])),
            Err(SimError::UnsupportedOperation(_))
        ));
        assert!(!ch.allows_factoring());
        assert!(matches!(
            ch.factor(&q[..1], true, 1e-7),
            Err(SimError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn repeated_targets_rejected() {
        let q = Qid::qubit(0);
        let (mut ch, _) = new_pair(2, 0, 0);
        ch.apply(&Gate::H(q)).unwrap();
        ch.apply(&Gate::CX(q, Qid::qubit(1))).unwrap();
        let before = ch.state_vector();
        for g in [Gate::CX(q, q), Gate::CZ(q, q), Gate::CY(q, q), Gate::Swap(q, q)] {
            assert!(matches!(ch.apply(&g), Err(SimError::RepeatedQubit(r)) if r == q));
        }
        assert!(matches!(
            ch.apply(&Measure::new(vec![q, q], "m")),
            Err(SimError::RepeatedQubit(_))
        ));
        assert_vec_close(&ch.state_vector(), &before);
        assert!(ch.core().log().borrow().is_empty());
    }

    #[test]
    fn qudits_rejected() {
        let rng = shared_rng(StdRng::seed_from_u64(0));
        let res = ChFormState::from_basis_state(
            vec![Qid::qubit(0), Qid::qudit(1, 3)], 0, rng, ClassicalDataLog::shared());
        assert!(matches!(res, Err(SimError::ShapeMismatch { .. })));
    }

    #[test]
    fn decomposed_cliffords() {
        let q = Qid::range(2);
        let (mut ch, mut sv) = new_pair(2, 0b01, 0);
        let bell = crate::op::Composite::new(
            "bell",
            vec![
                Rc::new(Gate::H(q[0])) as OpRef,
                Rc::new(Gate::CX(q[0], q[1])),
            ],
        );
        ch.apply(&bell).unwrap();
        sv.apply(&bell).unwrap();
        assert_vec_close(&ch.state_vector(), &sv.state_vector());
    }

    #[test]
    fn sampling_and_reset() {
        let q = Qid::range(2);
        let (mut ch, _) = new_pair(2, 0b10, 7);
        ch.apply(&Gate::H(q[1])).unwrap();
        let before = ch.state_vector();
        let samples = ch.sample(&q, 40, Some(3)).unwrap();
        assert!(samples.column(0).iter().all(|&x| x == 1));
        assert!(samples.column(1).iter().any(|&x| x == 0));
        assert!(samples.column(1).iter().any(|&x| x == 1));
        assert_eq!(samples, ch.sample(&q, 40, Some(3)).unwrap());
        assert_vec_close(&ch.state_vector(), &before);

        ch.reset(&q).unwrap();
        let probs: Vec<f64> = ch.state_vector().iter().map(|a| a.norm_sqr()).collect();
        assert!((probs[0] - 1.0).abs() < 1e-9);
        assert!(ch.core().log().borrow().is_empty());
    }
}
