use serde::{Deserialize, Serialize};

/// How a reputation score moves on each outcome.
///
/// Success multiplies by `success_factor`, failure by `failure_factor`, and the
/// result is clamped to `[min, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReputationPolicy {
    pub min: f64,
    pub max: f64,
    pub initial: f64,
    pub success_factor: f64,
    pub failure_factor: f64,
}

impl ReputationPolicy {
    /// The provider's own update rule.
    pub const AUTHORITATIVE: Self = Self {
        min: 0.1,
        max: 10.0,
        initial: 5.0,
        success_factor: 1.02,
        failure_factor: 0.98,
    };

    /// The broker's smaller nudge, overwritten by the next status push.
    pub const PROVISIONAL: Self = Self {
        min: 0.1,
        max: 10.0,
        initial: 5.0,
        success_factor: 1.01,
        failure_factor: 0.99,
    };

    pub fn apply(&self, current: f64, success: bool) -> f64 {
        let next = if success {
            current * self.success_factor
        } else {
            current * self.failure_factor
        };
        self.clamp(next)
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Reputation mapped onto `[0, 1]` for scoring.
    pub fn normalize(&self, value: f64) -> f64 {
        if self.max > 0.0 { self.clamp(value) / self.max } else { 0.0 }
    }
}

impl Default for ReputationPolicy {
    fn default() -> Self {
        Self::AUTHORITATIVE
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reputation {
    score: f64,
    successes: u64,
    failures: u64,
    policy: ReputationPolicy,
}

impl Reputation {
    pub fn new(policy: ReputationPolicy) -> Self {
        Self {
            score: policy.clamp(policy.initial),
            successes: 0,
            failures: 0,
            policy,
        }
    }

    pub fn record(&mut self, success: bool) -> f64 {
        if success {
            self.successes = self.successes.saturating_add(1);
        } else {
            self.failures = self.failures.saturating_add(1);
        }
        self.score = self.policy.apply(self.score, success);
        self.score
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn successes(&self) -> u64 {
        self.successes
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }
}

impl Default for Reputation {
    fn default() -> Self {
        Self::new(ReputationPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn starts_at_initial_score() {
        let rep = Reputation::default();
        assert_eq!(rep.score(), 5.0);
        assert_eq!(rep.successes() + rep.failures(), 0);
    }

    #[test]
    fn success_and_failure_move_geometrically() {
        let mut rep = Reputation::default();
        assert!((rep.record(true) - 5.1).abs() < 1e-9);
        assert!((rep.record(false) - 5.1 * 0.98).abs() < 1e-9);
        assert_eq!(rep.successes(), 1);
        assert_eq!(rep.failures(), 1);
    }

    #[test]
    fn long_failure_streak_stops_at_min() {
        let mut rep = Reputation::default();
        let mut previous = rep.score();
        for _ in 0..1000 {
            let next = rep.record(false);
            assert!(next <= previous);
            previous = next;
        }
        assert_eq!(rep.score(), 0.1);
    }

    #[test]
    fn provisional_nudge_is_smaller() {
        let auth = ReputationPolicy::AUTHORITATIVE.apply(5.0, true) - 5.0;
        let prov = ReputationPolicy::PROVISIONAL.apply(5.0, true) - 5.0;
        assert!(prov < auth);
        assert_eq!(ReputationPolicy::PROVISIONAL.normalize(10.0), 1.0);
    }

    proptest! {
        #[test]
        fn score_never_leaves_bounds(outcomes in prop::collection::vec(any::<bool>(), 0..2000)) {
            let mut rep = Reputation::default();
            for outcome in outcomes {
                let score = rep.record(outcome);
                prop_assert!((0.1..=10.0).contains(&score));
            }
        }
    }
}
