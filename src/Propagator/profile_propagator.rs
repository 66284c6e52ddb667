//! # Binary Profile Propagation
//!
//! Every profile `p` has to be advanced by `steps[p]` applications of the step
//! matrix `F`. Writing `steps[p] = Σ_b bit_b·2^b`, the profile is multiplied by
//! `F^(2^b)` for each set bit, least significant first, using the cached power list.
//!
//! All profiles start from one shared initial vector, so two profiles whose bit
//! patterns agree on `0..=b` hold identical states after level `b`. Profiles are
//! visited in an order where such profiles are adjacent, and the state of the
//! previous one is copied instead of multiplied again.

use super::propagator_error::PropagatorError;
use nalgebra::{DMatrix, DVector};

/// Bit decomposition of per-profile step counts
#[derive(Debug, Clone, PartialEq)]
pub struct StepPattern {
    steps: Vec<u64>,
    /// `bits[p][b]` is set iff bit `b` of `steps[p]` is set
    bits: Vec<Vec<bool>>,
    /// visiting order, profiles with equal bit prefixes are contiguous
    order: Vec<usize>,
    n_binary: usize,
}

impl StepPattern {
    pub fn from_steps(steps: &[u64]) -> Self {
        let max = steps.iter().copied().max().unwrap_or(0);
        let n_binary = (u64::BITS - max.leading_zeros()) as usize;
        let bits: Vec<Vec<bool>> = steps
            .iter()
            .map(|s| (0..n_binary).map(|b| s & (1 << b) != 0).collect())
            .collect();
        // stable lexicographic sort, bit 0 as primary key
        let mut order: Vec<usize> = (0..steps.len()).collect();
        order.sort_by(|a, b| bits[*a].cmp(&bits[*b]));
        Self {
            steps: steps.to_vec(),
            bits,
            order,
            n_binary,
        }
    }

    pub fn steps(&self) -> &[u64] {
        &self.steps
    }

    pub fn bits(&self) -> &[Vec<bool>] {
        &self.bits
    }

    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// Number of powers `F^(2^b)` needed
    pub fn n_binary(&self) -> usize {
        self.n_binary
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Propagates `initial` by every step count of `pattern`.
///
/// `powers[b]` must be `F^(2^b)` for `b < pattern.n_binary()`. Returns one vector
/// per profile, in the caller's (unsorted) profile order.
pub fn compute_profiles(
    pattern: &StepPattern,
    initial: &DVector<f64>,
    powers: &[DMatrix<f64>],
) -> Result<Vec<DVector<f64>>, PropagatorError> {
    if powers.len() < pattern.n_binary() {
        return Err(PropagatorError::InsufficientPowers {
            needed: pattern.n_binary(),
            available: powers.len(),
        });
    }
    if let Some(F) = powers.iter().find(|F| F.shape() != (initial.len(), initial.len())) {
        return Err(PropagatorError::ShapeMismatch(format!(
            "step matrix is {:?} but profiles have {} cells",
            F.shape(),
            initial.len()
        )));
    }

    let mut profiles: Vec<DVector<f64>> = vec![initial.clone(); pattern.len()];
    let order = pattern.order();
    let bits = pattern.bits();

    for (b, power) in powers.iter().take(pattern.n_binary()).enumerate() {
        for k in 0..order.len() {
            let j = order[k];
            if !bits[j][b] {
                continue;
            }
            let reuse = k > 0 && bits[order[k - 1]][..=b] == bits[j][..=b];
            profiles[j] = if reuse {
                profiles[order[k - 1]].clone()
            } else {
                power * &profiles[j]
            };
        }
    }
    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_matrix(n: usize) -> DMatrix<f64> {
        // mildly contracting, non-symmetric
        DMatrix::from_fn(n, n, |r, c| {
            if r == c {
                0.6
            } else if c == r + 1 {
                0.25
            } else if r == c + 1 {
                0.1
            } else {
                0.0
            }
        })
    }

    fn powers_of(F: &DMatrix<f64>, levels: usize) -> Vec<DMatrix<f64>> {
        let mut powers = vec![F.clone()];
        while powers.len() < levels {
            let last = &powers[powers.len() - 1];
            let next = last * last;
            powers.push(next);
        }
        powers
    }

    fn brute_force(F: &DMatrix<f64>, v: &DVector<f64>, k: u64) -> DVector<f64> {
        let mut out = v.clone();
        for _ in 0..k {
            out = F * out;
        }
        out
    }

    #[test]
    fn test_pattern_bits_and_order() {
        let pattern = StepPattern::from_steps(&[5, 2, 0, 7, 5]);
        assert_eq!(pattern.n_binary(), 3);
        assert_eq!(pattern.bits()[0], vec![true, false, true]);
        assert_eq!(pattern.bits()[1], vec![false, true, false]);
        // sorted by bit 0, then bit 1, then bit 2; ties keep input order
        assert_eq!(pattern.order(), &[2, 1, 0, 4, 3]);
    }

    #[test]
    fn test_pattern_of_zero_steps() {
        let pattern = StepPattern::from_steps(&[0, 0]);
        assert_eq!(pattern.n_binary(), 0);
        let v = DVector::from_vec(vec![1.0, 2.0]);
        let out = compute_profiles(&pattern, &v, &[]).unwrap();
        assert_eq!(out, vec![v.clone(), v]);
    }

    #[test]
    fn test_matches_repeated_application() {
        let n = 6;
        let F = test_matrix(n);
        let v = DVector::from_fn(n, |i, _| 1.0 + i as f64);
        let steps = [5, 5, 13, 0, 7, 5, 2, 1, 16];
        let pattern = StepPattern::from_steps(&steps);
        let powers = powers_of(&F, pattern.n_binary());
        let out = compute_profiles(&pattern, &v, &powers).unwrap();
        for (p, k) in steps.iter().enumerate() {
            let expected = brute_force(&F, &v, *k);
            assert!(
                (&out[p] - &expected).amax() < 1e-12,
                "profile {} ({} steps)",
                p,
                k
            );
        }
    }

    #[test]
    fn test_extra_powers_are_ignored() {
        let F = test_matrix(4);
        let v = DVector::from_element(4, 1.0);
        let pattern = StepPattern::from_steps(&[3]);
        let powers = powers_of(&F, 6);
        let out = compute_profiles(&pattern, &v, &powers).unwrap();
        assert!((&out[0] - brute_force(&F, &v, 3)).amax() < 1e-12);
    }

    #[test]
    fn test_missing_powers_rejected() {
        let F = test_matrix(3);
        let v = DVector::from_element(3, 1.0);
        let pattern = StepPattern::from_steps(&[9]);
        assert!(matches!(
            compute_profiles(&pattern, &v, &powers_of(&F, 2)),
            Err(PropagatorError::InsufficientPowers {
                needed: 4,
                available: 2
            })
        ));
        let wrong = powers_of(&test_matrix(4), 4);
        assert!(matches!(
            compute_profiles(&pattern, &v, &wrong),
            Err(PropagatorError::ShapeMismatch(_))
        ));
    }
}
