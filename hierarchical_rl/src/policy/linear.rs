//! Linear squashed-Gaussian policy.
//!
//! `u ~ N(W·[obs; goal] + b, exp(log_std))`, `a = scale(tanh(u))` where
//! `scale` maps `(-1, 1)` onto the output bounds. The deterministic mode
//! skips the noise.

use super::{LeveledPolicy, PolicyError};
use crate::core::observation::BoxSpace;
use crate::core::weights::LevelWeights;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Serializable parameters of a [`LinearGaussianPolicy`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearParams {
    /// Row-major `[action_dim, input_dim]` weight matrix.
    pub weight: Vec<f32>,
    /// Per-output bias.
    pub bias: Vec<f32>,
    /// Per-output log standard deviation of the exploration noise.
    pub log_std: Vec<f32>,
}

impl LinearParams {
    /// All-zero weights with the given exploration noise.
    pub fn zeros(input_dim: usize, action_dim: usize, log_std: f32) -> Self {
        Self {
            weight: vec![0.0; input_dim * action_dim],
            bias: vec![0.0; action_dim],
            log_std: vec![log_std; action_dim],
        }
    }

    fn check_shape(&self, input_dim: usize, action_dim: usize) -> Result<(), PolicyError> {
        if self.weight.len() != input_dim * action_dim {
            return Err(PolicyError::InvalidWeights(format!(
                "weight has {} entries, expected {}x{}",
                self.weight.len(),
                action_dim,
                input_dim
            )));
        }
        if self.bias.len() != action_dim || self.log_std.len() != action_dim {
            return Err(PolicyError::InvalidWeights(format!(
                "bias/log_std must have {} entries",
                action_dim
            )));
        }
        Ok(())
    }
}

/// Linear policy with tanh-squashed Gaussian exploration.
pub struct LinearGaussianPolicy {
    observation_dim: usize,
    goal_dim: usize,
    bounds: BoxSpace,
    params: LinearParams,
    rng: Xoshiro256PlusPlus,
}

impl LinearGaussianPolicy {
    /// Create a zero-initialised policy.
    pub fn new(observation_dim: usize, goal_dim: usize, bounds: BoxSpace, seed: u64) -> Self {
        let params = LinearParams::zeros(observation_dim + goal_dim, bounds.dim(), -0.5);
        Self {
            observation_dim,
            goal_dim,
            bounds,
            params,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// Replace the parameters (builder style). Fails if the shapes do not
    /// match the policy dimensions.
    pub fn with_params(mut self, params: LinearParams) -> Result<Self, PolicyError> {
        params.check_shape(self.input_dim(), self.bounds.dim())?;
        self.params = params;
        Ok(self)
    }

    /// Current parameters.
    pub fn params(&self) -> &LinearParams {
        &self.params
    }

    fn input_dim(&self) -> usize {
        self.observation_dim + self.goal_dim
    }

    fn squash(&self, pre: &[f32]) -> Vec<f32> {
        pre.iter()
            .zip(self.bounds.low.iter().zip(self.bounds.high.iter()))
            .map(|(&u, (&lo, &hi))| u.tanh() * (hi - lo) / 2.0 + (hi + lo) / 2.0)
            .collect()
    }
}

impl LeveledPolicy for LinearGaussianPolicy {
    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn goal_dim(&self) -> usize {
        self.goal_dim
    }

    fn action_dim(&self) -> usize {
        self.bounds.dim()
    }

    fn act(
        &mut self,
        observation: &[f32],
        goal: Option<&[f32]>,
        deterministic: bool,
    ) -> Result<Vec<f32>, PolicyError> {
        if observation.len() != self.observation_dim {
            return Err(PolicyError::InputDim {
                input: "observation",
                expected: self.observation_dim,
                got: observation.len(),
            });
        }
        let goal = goal.unwrap_or(&[]);
        if goal.len() != self.goal_dim {
            return Err(PolicyError::InputDim {
                input: "goal",
                expected: self.goal_dim,
                got: goal.len(),
            });
        }

        let input_dim = self.input_dim();
        let mut pre = self.params.bias.clone();
        for (row, out) in pre.iter_mut().enumerate() {
            let weights = &self.params.weight[row * input_dim..(row + 1) * input_dim];
            *out += weights
                .iter()
                .zip(observation.iter().chain(goal.iter()))
                .map(|(w, x)| w * x)
                .sum::<f32>();
        }

        if !deterministic {
            for (u, &log_std) in pre.iter_mut().zip(self.params.log_std.iter()) {
                let normal = Normal::new(*u, log_std.exp())
                    .map_err(|e| PolicyError::Backend(e.to_string()))?;
                *u = normal.sample(&mut self.rng);
            }
        }

        Ok(self.squash(&pre))
    }

    fn get_weights(&self) -> Result<LevelWeights, PolicyError> {
        Ok(LevelWeights::encode(&self.params)?)
    }

    fn set_weights(&mut self, weights: &LevelWeights) -> Result<(), PolicyError> {
        let params: LinearParams = weights.decode()?;
        params.check_shape(self.input_dim(), self.bounds.dim())?;
        self.params = params;
        Ok(())
    }

    fn check_weights(&self, weights: &LevelWeights) -> Result<(), PolicyError> {
        let params: LinearParams = weights.decode()?;
        params.check_shape(self.input_dim(), self.bounds.dim())
    }
}
