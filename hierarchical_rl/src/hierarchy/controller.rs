//! Multi-rate composition of policy levels into one primitive action stream.

use super::config::{ConfigError, HierarchyConfig};
use crate::core::observation::{BoxSpace, Observation, ObservationSpace};
use crate::core::trajectory::Step;
use crate::core::weights::LevelWeights;
use crate::policy::{LeveledPolicy, PolicyError};
use std::fmt;

/// Runtime failure while composing a decision.
#[derive(Debug, Clone, PartialEq)]
pub enum ControllerError {
    /// The observation lacks the primary field.
    MissingField { key: String },
    /// A level's policy failed.
    Policy { level: usize, source: PolicyError },
    /// A level emitted an output of the wrong length.
    ActionDim {
        level: usize,
        expected: usize,
        got: usize,
    },
    /// A weight set has the wrong number of levels.
    LevelCount { expected: usize, got: usize },
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerError::MissingField { key } => {
                write!(f, "observation has no field '{}'", key)
            }
            ControllerError::Policy { level, source } => {
                write!(f, "level {} failed: {}", level, source)
            }
            ControllerError::ActionDim { level, expected, got } => write!(
                f,
                "level {} emitted {} dims, expected {}",
                level, got, expected
            ),
            ControllerError::LevelCount { expected, got } => {
                write!(f, "expected weights for {} levels, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for ControllerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ControllerError::Policy { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Output of one primitive-step decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    /// Action to send to the environment.
    pub primitive_action: Vec<f32>,
    /// Output held by each level after this step.
    pub level_actions: Vec<Vec<f32>>,
    /// Goal each level was conditioned on (`None` for the top level).
    pub level_goals: Vec<Option<Vec<f32>>>,
    /// Which levels were re-evaluated at this step.
    pub refreshed: Vec<bool>,
}

impl Decision {
    /// Copy `observation` with the base level's active goal written into it.
    pub fn annotate(&self, observation: &Observation) -> Observation {
        observation
            .clone()
            .with_goal(self.level_goals.first().cloned().flatten())
    }

    /// Turn this decision into a recorded step.
    pub fn into_step(self, observation: &Observation, reward: f32) -> Step {
        Step {
            observation: self.annotate(observation),
            level_actions: self.level_actions,
            level_goals: self.level_goals,
            reward,
        }
    }
}

/// Ordered stack of policy levels running at geometrically spaced rates.
///
/// Levels are evaluated top-down on each step so that a goal emitted at
/// step `t` is consumed by the level below at the same step. Outputs of
/// levels above the base are cached and held until their next decision
/// boundary.
pub struct HierarchyController {
    config: HierarchyConfig,
    levels: Vec<Box<dyn LeveledPolicy>>,
    periods: Vec<usize>,
    output_dims: Vec<usize>,
    held: Vec<Option<Vec<f32>>>,
    decisions: Vec<usize>,
}

impl HierarchyController {
    /// Validate the stack against the environment spaces and build it.
    pub fn new(
        config: HierarchyConfig,
        levels: Vec<Box<dyn LeveledPolicy>>,
        observation_space: &ObservationSpace,
        action_space: &BoxSpace,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if levels.len() != config.num_levels {
            return Err(ConfigError::LevelCount {
                expected: config.num_levels,
                got: levels.len(),
            });
        }

        let obs_dim = observation_space
            .field_dim(&config.observation_key)
            .ok_or_else(|| ConfigError::MissingField {
                key: config.observation_key.clone(),
            })?;
        let top = config.top_level();

        let mut output_dims = Vec::with_capacity(levels.len());
        for (level, policy) in levels.iter().enumerate() {
            let expected_action = if level == 0 { action_space.dim() } else { obs_dim };
            let expected_goal = if level == top { 0 } else { obs_dim };

            let checks = [
                ("observation", obs_dim, policy.observation_dim()),
                ("goal", expected_goal, policy.goal_dim()),
                ("action", expected_action, policy.action_dim()),
            ];
            for (what, expected, got) in checks {
                if expected != got {
                    return Err(ConfigError::LevelDim {
                        level,
                        what,
                        expected,
                        got,
                    });
                }
            }
            output_dims.push(expected_action);
        }

        let periods = config.periods();
        let num_levels = config.num_levels;

        Ok(Self {
            config,
            levels,
            periods,
            output_dims,
            held: vec![None; num_levels],
            decisions: vec![0; num_levels],
        })
    }

    /// Hierarchy configuration.
    pub fn config(&self) -> &HierarchyConfig {
        &self.config
    }

    /// Number of levels.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Decision period of each level.
    pub fn periods(&self) -> &[usize] {
        &self.periods
    }

    /// Decisions made by each level since the last [`reset`](Self::reset).
    pub fn decision_counts(&self) -> &[usize] {
        &self.decisions
    }

    /// Forget held goals at an episode boundary.
    pub fn reset(&mut self) {
        self.held.iter_mut().for_each(|h| *h = None);
        self.decisions.iter_mut().for_each(|d| *d = 0);
    }

    /// Produce the primitive action for episode step `t`.
    pub fn decide(
        &mut self,
        observation: &Observation,
        t: usize,
        deterministic: bool,
    ) -> Result<Decision, ControllerError> {
        let key = &self.config.observation_key;
        let state = observation
            .field(key)
            .ok_or_else(|| ControllerError::MissingField { key: key.clone() })?;

        let n = self.levels.len();
        let top = n - 1;
        let mut refreshed = vec![false; n];

        for level in (0..n).rev() {
            let due = level == 0 || t % self.periods[level] == 0 || self.held[level].is_none();
            if !due {
                continue;
            }

            let goal = if level == top { None } else { self.held[level + 1].as_deref() };
            let output = self.levels[level]
                .act(state, goal, deterministic)
                .map_err(|source| ControllerError::Policy { level, source })?;

            if output.len() != self.output_dims[level] {
                return Err(ControllerError::ActionDim {
                    level,
                    expected: self.output_dims[level],
                    got: output.len(),
                });
            }

            self.held[level] = Some(output);
            self.decisions[level] += 1;
            refreshed[level] = true;
        }

        // Every level holds an output once the loop above has run.
        let level_actions: Vec<Vec<f32>> = self.held.iter().flatten().cloned().collect();
        let level_goals = (0..n)
            .map(|level| {
                if level == top {
                    None
                } else {
                    Some(level_actions[level + 1].clone())
                }
            })
            .collect();

        Ok(Decision {
            primitive_action: level_actions[0].clone(),
            level_actions,
            level_goals,
            refreshed,
        })
    }

    /// Serialize every level's parameters, base level first.
    pub fn get_weights(&self) -> Result<Vec<LevelWeights>, ControllerError> {
        self.levels
            .iter()
            .enumerate()
            .map(|(level, policy)| {
                policy
                    .get_weights()
                    .map_err(|source| ControllerError::Policy { level, source })
            })
            .collect()
    }

    /// Check a weight set without applying it.
    pub fn check_weights(&self, weights: &[LevelWeights]) -> Result<(), ControllerError> {
        if weights.len() != self.levels.len() {
            return Err(ControllerError::LevelCount {
                expected: self.levels.len(),
                got: weights.len(),
            });
        }
        for (level, (policy, blob)) in self.levels.iter().zip(weights).enumerate() {
            policy
                .check_weights(blob)
                .map_err(|source| ControllerError::Policy { level, source })?;
        }
        Ok(())
    }

    /// Apply a full weight set. Checks every level before touching any; if
    /// a level still fails to apply, the levels already switched get their
    /// previous weights back, so the stack never mixes two weight sets.
    pub fn set_weights(&mut self, weights: &[LevelWeights]) -> Result<(), ControllerError> {
        self.check_weights(weights)?;
        let previous = self.get_weights()?;
        for level in 0..self.levels.len() {
            if let Err(source) = self.levels[level].set_weights(&weights[level]) {
                self.restore(&previous[..=level]);
                return Err(ControllerError::Policy { level, source });
            }
        }
        Ok(())
    }

    fn restore(&mut self, previous: &[LevelWeights]) {
        for (level, (policy, blob)) in self.levels.iter_mut().zip(previous).enumerate() {
            if let Err(e) = policy.set_weights(blob) {
                log::error!("level {} could not restore its previous weights: {}", level, e);
            }
        }
    }
}
