//! Qubit (and qudit) identities.

use std::fmt;

/// An addressable unit of quantum state with a basis of size `dim`.
///
/// Two identities are equal only if both the index and the dimension agree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Qid {
    pub index: usize,
    pub dim: usize,
}

impl fmt::Display for Qid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dim == 2 {
            write!(f, "q{}", self.index)
        } else {
            write!(f, "q{}(d={})", self.index, self.dim)
        }
    }
}

impl Qid {
    /// A two-level system.
    pub const fn qubit(index: usize) -> Self { Self { index, dim: 2 } }

    /// A `dim`-level system.
    pub const fn qudit(index: usize, dim: usize) -> Self { Self { index, dim } }

    /// Qubits `0..n`.
    pub fn range(n: usize) -> Vec<Self> { (0..n).map(Self::qubit).collect() }
}

/// Product of the basis sizes of `qubits`.
pub fn hilbert_dim(qubits: &[Qid]) -> usize {
    qubits.iter().map(|q| q.dim).product()
}

/// Split a basis-state index into per-axis digits, most significant axis
/// first.
pub fn basis_digits(mut index: u64, dims: &[usize]) -> Vec<usize> {
    let mut digits: Vec<usize> = vec![0; dims.len()];
    for (d, &dim) in digits.iter_mut().zip(dims).rev() {
        let dim = dim as u64;
        *d = (index % dim) as usize;
        index /= dim;
    }
    digits
}

/// Inverse of [`basis_digits`].
pub fn basis_index(digits: &[usize], dims: &[usize]) -> usize {
    digits.iter().zip(dims).fold(0, |acc, (&d, &dim)| acc * dim + d)
}
