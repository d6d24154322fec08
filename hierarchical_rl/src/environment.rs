//! Environment abstraction for rollout workers.
//!
//! Workers drive exactly one [`Environment`] each, strictly sequentially.
//! The trait mirrors the usual reset/step contract with named observation
//! fields and a continuous action vector.

use crate::core::observation::{BoxSpace, Observation, ObservationSpace, DEFAULT_OBSERVATION_KEY};
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;
use std::collections::BTreeMap;
use std::fmt;

/// Error raised by an environment during reset, step or render.
#[derive(Debug, Clone, PartialEq)]
pub enum EnvError {
    /// `step` was called before `reset`.
    NotReset,
    /// The action vector has the wrong length.
    ActionDim { expected: usize, got: usize },
    /// Any failure reported by the underlying simulator.
    Backend(String),
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnvError::NotReset => write!(f, "step called before reset"),
            EnvError::ActionDim { expected, got } => {
                write!(f, "action has {} dims, environment expects {}", got, expected)
            }
            EnvError::Backend(msg) => write!(f, "environment backend error: {}", msg),
        }
    }
}

impl std::error::Error for EnvError {}

/// Result of a single environment step.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStep {
    /// Observation after the step.
    pub observation: Observation,
    /// Scalar reward.
    pub reward: f32,
    /// Episode ended.
    pub done: bool,
    /// Diagnostic scalars.
    pub info: BTreeMap<String, f32>,
}

impl EnvStep {
    /// Create a step result with empty info.
    pub fn new(observation: Observation, reward: f32, done: bool) -> Self {
        Self {
            observation,
            reward,
            done,
            info: BTreeMap::new(),
        }
    }
}

/// Single (non-vectorized) environment contract.
pub trait Environment: Send {
    /// Named observation fields and their bounds.
    fn observation_space(&self) -> &ObservationSpace;

    /// Bounds of the primitive action vector.
    fn action_space(&self) -> &BoxSpace;

    /// Start a new episode.
    fn reset(&mut self) -> Result<Observation, EnvError>;

    /// Apply one primitive action.
    fn step(&mut self, action: &[f32]) -> Result<EnvStep, EnvError>;

    /// Render the current state. Called once per primitive step when enabled.
    fn render(&mut self) -> Result<(), EnvError> {
        Ok(())
    }
}

/// Point mass moving toward a fixed target in `dim` dimensions.
///
/// Actions are velocities clipped to `[-1, 1]` and scaled by `dt`; the reward
/// is the negative distance to the target, and the episode ends once the
/// point is within `tolerance` of it.
pub struct PointMassEnv {
    observation_space: ObservationSpace,
    action_space: BoxSpace,
    target: Vec<f32>,
    position: Option<Vec<f32>>,
    dt: f32,
    tolerance: f32,
    rng: Xoshiro256PlusPlus,
    renders: usize,
}

impl PointMassEnv {
    /// Create a point mass with a target at the origin.
    pub fn new(dim: usize, seed: u64) -> Self {
        Self {
            observation_space: ObservationSpace::new()
                .with_field(DEFAULT_OBSERVATION_KEY, BoxSpace::uniform(dim, -10.0, 10.0)),
            action_space: BoxSpace::uniform(dim, -1.0, 1.0),
            target: vec![0.0; dim],
            position: None,
            dt: 0.1,
            tolerance: 0.05,
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            renders: 0,
        }
    }

    /// Set the target position.
    pub fn with_target(mut self, target: Vec<f32>) -> Self {
        assert_eq!(target.len(), self.target.len(), "target dimension mismatch");
        self.target = target;
        self
    }

    /// Set the distance at which the episode ends.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Number of render calls so far.
    pub fn render_count(&self) -> usize {
        self.renders
    }

    fn distance(&self, position: &[f32]) -> f32 {
        position
            .iter()
            .zip(self.target.iter())
            .map(|(p, t)| (p - t) * (p - t))
            .sum::<f32>()
            .sqrt()
    }

    fn observe(position: &[f32]) -> Observation {
        Observation::with_field(DEFAULT_OBSERVATION_KEY, position.to_vec())
    }
}

impl Environment for PointMassEnv {
    fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    fn reset(&mut self) -> Result<Observation, EnvError> {
        let dim = self.action_space.dim();
        let position: Vec<f32> = (0..dim).map(|_| self.rng.gen_range(-1.0..1.0)).collect();
        let obs = Self::observe(&position);
        self.position = Some(position);
        Ok(obs)
    }

    fn step(&mut self, action: &[f32]) -> Result<EnvStep, EnvError> {
        let expected = self.action_space.dim();
        if action.len() != expected {
            return Err(EnvError::ActionDim {
                expected,
                got: action.len(),
            });
        }
        let mut position = self.position.take().ok_or(EnvError::NotReset)?;

        for (p, &a) in position.iter_mut().zip(action.iter()) {
            *p += a.clamp(-1.0, 1.0) * self.dt;
        }
        if let Some(bounds) = self.observation_space.get(DEFAULT_OBSERVATION_KEY) {
            bounds.clip(&mut position);
        }

        let distance = self.distance(&position);
        let mut step = EnvStep::new(Self::observe(&position), -distance, distance < self.tolerance);
        step.info.insert("distance".to_string(), distance);
        self.position = Some(position);
        Ok(step)
    }

    fn render(&mut self) -> Result<(), EnvError> {
        self.renders += 1;
        if let Some(position) = &self.position {
            log::trace!("point mass at {:?}", position);
        }
        Ok(())
    }
}
