//! # Stopping Policy
//!
//! Outer-loop convergence test with hysteresis: training is converged only
//! after the objective plateau and the atom-displacement test both hold for
//! [`StoppingPolicy::REQUIRED_STREAK`] consecutive iterations.

use crate::matrix::Scalar;

#[derive(Debug, Clone)]
pub struct StoppingPolicy {
    eps_obj: Scalar,
    eps_dict: Scalar,
    previous_objective: Option<Scalar>,
    streak: usize,
}

impl StoppingPolicy {
    pub const REQUIRED_STREAK: usize = 2;

    pub fn new(eps_obj: Scalar, eps_dict: Scalar) -> Self {
        StoppingPolicy {
            eps_obj,
            eps_dict,
            previous_objective: None,
            streak: 0,
        }
    }

    /// Relative change `|F_prev − F| / max(|F_prev|, tiny)` against the last
    /// observed objective, if there was one.
    pub fn relative_improvement(&self, objective: Scalar) -> Option<Scalar> {
        self.previous_objective
            .map(|prev| (prev - objective).abs() / prev.abs().max(Scalar::MIN_POSITIVE))
    }

    /// Feeds one finished outer iteration; returns `true` once converged.
    pub fn observe(&mut self, objective: Scalar, displacement: Scalar) -> bool {
        let plateau = self
            .relative_improvement(objective)
            .map_or(false, |rel| rel < self.eps_obj);
        self.previous_objective = Some(objective);
        if plateau && displacement < self.eps_dict {
            self.streak += 1;
        } else {
            self.streak = 0;
        }
        self.streak >= Self::REQUIRED_STREAK
    }

    pub fn streak(&self) -> usize {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_iteration_never_converges() {
        let mut policy = StoppingPolicy::new(1e-3, 1e-3);
        assert!(!policy.observe(1.0, 0.0));
        assert_eq!(policy.streak(), 0);
    }

    #[test]
    fn needs_two_quiet_iterations_in_a_row() {
        let mut policy = StoppingPolicy::new(1e-3, 1e-3);
        policy.observe(10.0, 1.0);
        assert!(!policy.observe(9.99999, 1e-4));
        // A single noisy iteration resets the streak.
        assert!(!policy.observe(5.0, 1e-4));
        assert!(!policy.observe(5.0, 1e-4));
        assert!(policy.observe(5.0, 1e-4));
    }

    #[test]
    fn large_displacement_blocks_convergence() {
        let mut policy = StoppingPolicy::new(1e-3, 1e-3);
        policy.observe(1.0, 0.5);
        assert!(!policy.observe(1.0, 0.5));
        assert!(!policy.observe(1.0, 0.5));
        assert_eq!(policy.streak(), 0);
    }

    #[test]
    fn zero_objective_counts_as_plateau() {
        let policy = StoppingPolicy {
            previous_objective: Some(0.0),
            ..StoppingPolicy::new(1e-6, 1e-6)
        };
        assert_eq!(policy.relative_improvement(0.0), Some(0.0));
    }
}
