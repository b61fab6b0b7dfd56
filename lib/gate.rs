//! Standard one-, two-, and three-qubit gates.
//!
//! Every gate can be viewed as a dense unitary acting on its qubits in the
//! order they are listed (the first qubit is the most significant). Gates in
//! the Clifford group additionally expose a sequence of stabilizer generators
//! so that they can be applied to a [`ChForm`][crate::ch::ChForm] in closed
//! form.

use std::{ f64::consts::FRAC_1_SQRT_2, fmt, rc::Rc };
use nalgebra as na;
use num_complex::Complex64 as C64;
use once_cell::sync::Lazy;
use rand::{ seq::SliceRandom, Rng };
use crate::{
    op::{ OpRef, Operation },
    qid::Qid,
};

const ZERO: C64 = C64 { re: 0.0, im: 0.0 };
const ONE: C64 = C64 { re: 1.0, im: 0.0 };
const I: C64 = C64 { re: 0.0, im: 1.0 };

fn mat(n: usize, elems: &[C64]) -> na::DMatrix<C64> {
    na::DMatrix::from_row_slice(n, n, elems)
}

// matrix of a controlled single-qubit gate, control first
fn controlled(u: &na::DMatrix<C64>) -> na::DMatrix<C64> {
    let d = u.nrows();
    let mut c: na::DMatrix<C64> = na::DMatrix::identity(2 * d, 2 * d);
    c.view_mut((d, d), (d, d)).copy_from(u);
    c
}

static HADAMARD: Lazy<na::DMatrix<C64>> = Lazy::new(|| {
    let h = C64::from(FRAC_1_SQRT_2);
    mat(2, &[h, h, h, -h])
});
static PAULI_X: Lazy<na::DMatrix<C64>> = Lazy::new(|| mat(2, &[ZERO, ONE, ONE, ZERO]));
static PAULI_Y: Lazy<na::DMatrix<C64>> = Lazy::new(|| mat(2, &[ZERO, -I, I, ZERO]));
static PAULI_Z: Lazy<na::DMatrix<C64>> = Lazy::new(|| mat(2, &[ONE, ZERO, ZERO, -ONE]));
static PHASE_S: Lazy<na::DMatrix<C64>> = Lazy::new(|| mat(2, &[ONE, ZERO, ZERO, I]));
static PHASE_SDG: Lazy<na::DMatrix<C64>> = Lazy::new(|| mat(2, &[ONE, ZERO, ZERO, -I]));
static PHASE_T: Lazy<na::DMatrix<C64>> = Lazy::new(|| {
    mat(2, &[ONE, ZERO, ZERO, C64::cis(std::f64::consts::FRAC_PI_4)])
});
static PHASE_TDG: Lazy<na::DMatrix<C64>> = Lazy::new(|| {
    mat(2, &[ONE, ZERO, ZERO, C64::cis(-std::f64::consts::FRAC_PI_4)])
});
static CNOT: Lazy<na::DMatrix<C64>> = Lazy::new(|| controlled(&PAULI_X));
static CY: Lazy<na::DMatrix<C64>> = Lazy::new(|| controlled(&PAULI_Y));
static CZ: Lazy<na::DMatrix<C64>> = Lazy::new(|| controlled(&PAULI_Z));
static SWAP: Lazy<na::DMatrix<C64>> = Lazy::new(|| {
    let mut s: na::DMatrix<C64> = na::DMatrix::zeros(4, 4);
    s[(0, 0)] = ONE;
    s[(1, 2)] = ONE;
    s[(2, 1)] = ONE;
    s[(3, 3)] = ONE;
    s
});
static TOFFOLI: Lazy<na::DMatrix<C64>> = Lazy::new(|| controlled(&CNOT));

/// A generator of the Clifford group, as understood by the CH-form
/// representation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StabGate {
    H(Qid),
    S(Qid),
    X(Qid),
    Y(Qid),
    Z(Qid),
    /// The first qubit is the control.
    CX(Qid, Qid),
    CZ(Qid, Qid),
}

impl StabGate {
    pub fn qubits(&self) -> Vec<Qid> {
        match *self {
            Self::H(q) | Self::S(q) | Self::X(q) | Self::Y(q) | Self::Z(q)
                => vec![q],
            Self::CX(a, b) | Self::CZ(a, b) => vec![a, b],
        }
    }
}

/// Description of a single gate acting on particular qubits.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Gate {
    /// Identity, on a qudit of any dimension.
    I(Qid),
    /// Hadamard
    H(Qid),
    /// π rotation about X
    X(Qid),
    /// π rotation about Y
    Y(Qid),
    /// π rotation about Z
    Z(Qid),
    /// π/2 rotation about Z
    S(Qid),
    /// -π/2 rotation about Z
    SInv(Qid),
    /// π/4 rotation about Z
    T(Qid),
    /// -π/4 rotation about Z
    TInv(Qid),
    /// Rotation about X by an arbitrary angle.
    XRot(Qid, f64),
    /// Rotation about Y by an arbitrary angle.
    YRot(Qid, f64),
    /// Rotation about Z by an arbitrary angle.
    ZRot(Qid, f64),
    /// General single-qubit unitary with Euler angles `(θ, φ, λ)`.
    U(Qid, f64, f64, f64),
    /// Z-controlled π rotation about X.
    ///
    /// The first qubit is the control.
    CX(Qid, Qid),
    /// Z-controlled π rotation about Y.
    ///
    /// The first qubit is the control.
    CY(Qid, Qid),
    /// Z-controlled π rotation about Z.
    CZ(Qid, Qid),
    /// Swap
    Swap(Qid, Qid),
    /// Doubly controlled X (Toffoli).
    ///
    /// The first two qubits are the controls.
    CCX(Qid, Qid, Qid),
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::I(q) => write!(f, "I({})", q),
            Self::H(q) => write!(f, "H({})", q),
            Self::X(q) => write!(f, "X({})", q),
            Self::Y(q) => write!(f, "Y({})", q),
            Self::Z(q) => write!(f, "Z({})", q),
            Self::S(q) => write!(f, "S({})", q),
            Self::SInv(q) => write!(f, "S†({})", q),
            Self::T(q) => write!(f, "T({})", q),
            Self::TInv(q) => write!(f, "T†({})", q),
            Self::XRot(q, th) => write!(f, "Rx[{}]({})", th, q),
            Self::YRot(q, th) => write!(f, "Ry[{}]({})", th, q),
            Self::ZRot(q, th) => write!(f, "Rz[{}]({})", th, q),
            Self::U(q, th, ph, la) => write!(f, "U[{}, {}, {}]({})", th, ph, la, q),
            Self::CX(a, b) => write!(f, "CX({}, {})", a, b),
            Self::CY(a, b) => write!(f, "CY({}, {})", a, b),
            Self::CZ(a, b) => write!(f, "CZ({}, {})", a, b),
            Self::Swap(a, b) => write!(f, "Swap({}, {})", a, b),
            Self::CCX(a, b, c) => write!(f, "CCX({}, {}, {})", a, b, c),
        }
    }
}

impl Gate {
    /// Return `true` if `self` is `I`.
    pub fn is_i(&self) -> bool { matches!(self, Self::I(..)) }

    /// Return `true` if `self` is `Swap`.
    pub fn is_swap(&self) -> bool { matches!(self, Self::Swap(..)) }

    /// Return `true` if `self` belongs to the Clifford group.
    pub fn is_clifford(&self) -> bool { self.stabilizer_gates().is_some() }

    /// Sample a random single-qubit Clifford gate (`H`, `X`, `Y`, `Z`, `S`)
    /// for a given qubit.
    pub fn sample_single<R>(q: Qid, rng: &mut R) -> Self
    where R: Rng + ?Sized
    {
        match rng.gen_range(0..5_usize) {
            0 => Self::H(q),
            1 => Self::X(q),
            2 => Self::Y(q),
            3 => Self::Z(q),
            4 => Self::S(q),
            _ => unreachable!(),
        }
    }

    /// Sample a random Clifford gate on `qubits`: a single-qubit gate half of
    /// the time, otherwise a `CX` or `CZ` on a random pair of distinct
    /// qubits. Returns `None` if `qubits` is empty.
    pub fn sample_clifford<R>(qubits: &[Qid], rng: &mut R) -> Option<Self>
    where R: Rng + ?Sized
    {
        let &a = qubits.choose(rng)?;
        let others: Vec<Qid> = qubits.iter().copied().filter(|&q| q != a).collect();
        let Some(&b) = others.choose(rng).filter(|_| rng.gen::<bool>()) else {
            return Some(Self::sample_single(a, rng));
        };
        if rng.gen::<bool>() { Some(Self::CX(a, b)) } else { Some(Self::CZ(a, b)) }
    }

    /// Return the qubits acted on, in matrix order.
    pub fn targets(&self) -> Vec<Qid> {
        match *self {
            Self::I(q)
            | Self::H(q)
            | Self::X(q)
            | Self::Y(q)
            | Self::Z(q)
            | Self::S(q)
            | Self::SInv(q)
            | Self::T(q)
            | Self::TInv(q)
            | Self::XRot(q, _)
            | Self::YRot(q, _)
            | Self::ZRot(q, _)
            | Self::U(q, ..)
            => vec![q],
            Self::CX(a, b)
            | Self::CY(a, b)
            | Self::CZ(a, b)
            | Self::Swap(a, b)
            => vec![a, b],
            Self::CCX(a, b, c) => vec![a, b, c],
        }
    }

    /// Dense unitary matrix of the gate.
    pub fn matrix(&self) -> na::DMatrix<C64> {
        match *self {
            Self::I(q) => na::DMatrix::identity(q.dim, q.dim),
            Self::H(_) => HADAMARD.clone(),
            Self::X(_) => PAULI_X.clone(),
            Self::Y(_) => PAULI_Y.clone(),
            Self::Z(_) => PAULI_Z.clone(),
            Self::S(_) => PHASE_S.clone(),
            Self::SInv(_) => PHASE_SDG.clone(),
            Self::T(_) => PHASE_T.clone(),
            Self::TInv(_) => PHASE_TDG.clone(),
            Self::XRot(_, th) => {
                let c = C64::from((th / 2.0).cos());
                let s = -I * (th / 2.0).sin();
                mat(2, &[c, s, s, c])
            },
            Self::YRot(_, th) => {
                let c = C64::from((th / 2.0).cos());
                let s = C64::from((th / 2.0).sin());
                mat(2, &[c, -s, s, c])
            },
            Self::ZRot(_, th) => {
                mat(2, &[C64::cis(-th / 2.0), ZERO, ZERO, C64::cis(th / 2.0)])
            },
            Self::U(_, th, ph, la) => {
                let c = (th / 2.0).cos();
                let s = (th / 2.0).sin();
                mat(2, &[
                    C64::from(c),        -C64::cis(la) * s,
                    C64::cis(ph) * s,    C64::cis(ph + la) * c,
                ])
            },
            Self::CX(..) => CNOT.clone(),
            Self::CY(..) => CY.clone(),
            Self::CZ(..) => CZ.clone(),
            Self::Swap(..) => SWAP.clone(),
            Self::CCX(..) => TOFFOLI.clone(),
        }
    }

    /// Express a Clifford gate as a sequence of stabilizer generators, or
    /// `None` if the gate lies outside the Clifford group.
    pub fn stabilizer_gates(&self) -> Option<Vec<StabGate>> {
        use StabGate as G;
        match *self {
            Self::I(_) => Some(Vec::new()),
            Self::H(q) => Some(vec![G::H(q)]),
            Self::X(q) => Some(vec![G::X(q)]),
            Self::Y(q) => Some(vec![G::Y(q)]),
            Self::Z(q) => Some(vec![G::Z(q)]),
            Self::S(q) => Some(vec![G::S(q)]),
            Self::SInv(q) => Some(vec![G::Z(q), G::S(q)]),
            Self::CX(a, b) => Some(vec![G::CX(a, b)]),
            Self::CY(a, b)
                => Some(vec![G::Z(b), G::S(b), G::CX(a, b), G::S(b)]),
            Self::CZ(a, b) => Some(vec![G::CZ(a, b)]),
            Self::Swap(a, b)
                => Some(vec![G::CX(a, b), G::CX(b, a), G::CX(a, b)]),
            _ => None,
        }
    }

    /// Break the gate into simpler gates, if a decomposition is known.
    pub fn decomposition(&self) -> Option<Vec<Self>> {
        match *self {
            Self::CCX(a, b, c) => Some(vec![
                Self::H(c),
                Self::CX(b, c),
                Self::TInv(c),
                Self::CX(a, c),
                Self::T(c),
                Self::CX(b, c),
                Self::TInv(c),
                Self::CX(a, c),
                Self::T(b),
                Self::T(c),
                Self::H(c),
                Self::CX(a, b),
                Self::T(a),
                Self::TInv(b),
                Self::CX(a, b),
            ]),
            _ => None,
        }
    }
}

impl Operation for Gate {
    fn qubits(&self) -> Vec<Qid> { self.targets() }

    fn name(&self) -> String { self.to_string() }

    fn unitary(&self) -> Option<na::DMatrix<C64>> { Some(self.matrix()) }

    fn decompose(&self) -> Option<Vec<OpRef>> {
        self.decomposition()
            .map(|gates| {
                gates.into_iter()
                    .map(|g| Rc::new(g) as OpRef)
                    .collect()
            })
    }

    fn is_identity(&self) -> bool { self.is_i() }

    fn is_swap(&self) -> bool { self.is_swap() }

    fn stabilizer_gates(&self) -> Option<Vec<StabGate>> {
        Gate::stabilizer_gates(self)
    }
}
