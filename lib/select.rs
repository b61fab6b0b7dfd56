//! Branch selection for probabilistic channels.
//!
//! Given a uniform draw `p` and a way to evaluate the weight of each branch
//! in order, pick the first branch at which the running sum of weights exceeds
//! `p`. Weights are usually computed numerically (e.g. as the squared norm of
//! a state after applying a Kraus operator), so rounding can leave the sum of
//! all weights slightly short of 1. If the draw lands past the accumulated
//! mass, or the branch it lands on has zero weight, the highest-weight branch
//! seen so far is selected instead.

use rand::Rng;
use tracing::warn;

/// Why a selection fell back to the highest-weight branch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Fallback {
    /// The draw exceeded the total accumulated weight.
    Exhausted,
    /// The draw landed on a branch with zero weight.
    ZeroWeight,
}

/// Result of a branch selection.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Selection {
    /// Index of the selected branch.
    pub index: usize,
    /// Weight of the selected branch.
    pub weight: f64,
    /// Index of the last branch whose weight was evaluated.
    pub last_evaluated: usize,
    /// Set if the selection did not come from the draw directly.
    pub fallback: Option<Fallback>,
}

impl Selection {
    /// `true` if the selected branch is not the last one evaluated, i.e. any
    /// side effects of evaluating it need to be redone.
    pub fn needs_reevaluation(&self) -> bool { self.index != self.last_evaluated }
}

/// Stateless weighted-branch selector.
#[derive(Copy, Clone, Debug, Default)]
pub struct RandomChannelSelector;

impl RandomChannelSelector {
    /// Draw `p ~ U(0, 1)` from `rng` and select one of `n` branches.
    ///
    /// See [`select_with`][Self::select_with].
    pub fn select<R, F>(rng: &mut R, n: usize, weight_of: F) -> Selection
    where
        R: Rng + ?Sized,
        F: FnMut(usize) -> f64,
    {
        let p: f64 = rng.gen();
        Self::select_with(p, n, weight_of)
    }

    /// Select one of `n` branches for a given draw `p`.
    ///
    /// `weight_of` is called on branch indices in increasing order, stopping
    /// at the selected branch, so that callers can compute the weight as a
    /// side effect of preparing the branch.
    ///
    /// *Panics if `n == 0`.*
    pub fn select_with<F>(mut p: f64, n: usize, mut weight_of: F) -> Selection
    where F: FnMut(usize) -> f64
    {
        assert!(n > 0, "RandomChannelSelector: no branches to select from");
        let mut best_index: usize = 0;
        let mut best_weight: f64 = 0.0;
        let mut index: usize = 0;
        let mut weight: f64 = 0.0;
        for k in 0..n {
            index = k;
            weight = weight_of(k);
            if weight > best_weight {
                best_index = k;
                best_weight = weight;
            }
            p -= weight;
            if p < 0.0 { break; }
        }
        let fallback
            = if p >= 0.0 {
                Some(Fallback::Exhausted)
            } else if weight == 0.0 {
                Some(Fallback::ZeroWeight)
            } else {
                None
            };
        match fallback {
            Some(reason) => {
                warn!(
                    ?reason,
                    residual = p,
                    index = best_index,
                    "channel sampling fell back to highest-weight branch"
                );
                Selection {
                    index: best_index,
                    weight: best_weight,
                    last_evaluated: index,
                    fallback,
                }
            },
            None => Selection { index, weight, last_evaluated: index, fallback },
        }
    }
}
