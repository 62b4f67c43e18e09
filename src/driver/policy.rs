use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::env::{Action, Space, StepResult};
use crate::error::{EnvError, Result};

/// Decision maker driven by [`super::run`]. A learner implements `observe`
/// to collect its transitions.
pub trait Policy {
    fn act(&mut self, observation: &[f32], action_space: &Space) -> Result<Action>;

    fn observe(&mut self, _observation: &[f32], _action: &Action, _step: &StepResult) {}
}

/// Uniform random actions from a seeded generator.
pub struct RandomPolicy {
    rng: StdRng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn act(&mut self, _observation: &[f32], action_space: &Space) -> Result<Action> {
        match action_space {
            Space::Discrete { n } => {
                if *n == 0 {
                    return Err(EnvError::invalid_action("empty discrete action space"));
                }
                Ok(Action::Discrete(self.rng.random_range(0..*n)))
            }
            Space::MultiDiscrete { nvec } => {
                if nvec.contains(&0) {
                    return Err(EnvError::invalid_action("empty discrete action branch"));
                }
                Ok(Action::MultiDiscrete(
                    nvec.iter().map(|n| self.rng.random_range(0..*n)).collect(),
                ))
            }
            Space::Continuous { low, high, .. } => {
                // Unbounded boxes sample from [-1, 1].
                let low = if low.is_finite() { *low } else { -1.0 };
                let high = if high.is_finite() { *high } else { 1.0 };
                if low > high {
                    return Err(EnvError::invalid_action(format!(
                        "box bounds [{}, {}] are empty",
                        low, high
                    )));
                }
                Ok(Action::Continuous(
                    (0..action_space.size())
                        .map(|_| self.rng.random_range(low..=high))
                        .collect(),
                ))
            }
        }
    }
}
