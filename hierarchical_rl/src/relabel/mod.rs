//! Per-level reward relabeling.
//!
//! A level above the base acts by emitting goals for the level below it, so
//! its reward is rewritten to score how well the emitted goal was reached:
//!
//! ```text
//! anchor = t - t % period
//!
//!   t:        anchor        t      t+1
//!   state:    s_anchor ...  s_t    s_{t+1}
//!   goal_t:   emitted at anchor, held until the next decision
//!
//!   signal_t = -|| goal_t - (s_{t+1} - s_anchor) ||_2
//!   r'_t     = reward_scale * r_t + goal_conditioned_scale * signal_t
//! ```
//!
//! The base level is a pass-through (`goal_conditioned_scale = 0`).
//! Relabeling is pure: every call returns a new `LevelTrajectory`.

use crate::core::observation::DEFAULT_OBSERVATION_KEY;
use crate::core::trajectory::LevelTrajectory;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error rewriting a level view.
#[derive(Debug, Clone, PartialEq)]
pub enum RelabelError {
    /// The view belongs to a level this relabeler has no parameters for.
    UnknownLevel { level: usize, num_levels: usize },
    /// An observation lacks the primary field.
    MissingField { key: String, step: usize },
    /// Goal and state delta have different lengths.
    GoalDim {
        step: usize,
        expected: usize,
        got: usize,
    },
    /// The view's columns disagree on the number of steps.
    Length {
        rewards: usize,
        observations: usize,
        actions: usize,
        next_observations: usize,
    },
}

impl fmt::Display for RelabelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelabelError::UnknownLevel { level, num_levels } => write!(
                f,
                "no relabel parameters for level {} ({} levels configured)",
                level, num_levels
            ),
            RelabelError::MissingField { key, step } => {
                write!(f, "observation at step {} has no field '{}'", step, key)
            }
            RelabelError::GoalDim { step, expected, got } => write!(
                f,
                "goal at step {} has {} dims, state has {}",
                step, got, expected
            ),
            RelabelError::Length {
                rewards,
                observations,
                actions,
                next_observations,
            } => write!(
                f,
                "ragged level view: {} rewards, {} observations, {} actions, {} next observations",
                rewards, observations, actions, next_observations
            ),
        }
    }
}

impl std::error::Error for RelabelError {}

/// Reward rewrite parameters for one level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LevelRelabel {
    /// Weight of the environment reward.
    pub reward_scale: f32,
    /// Weight of the goal-achievement signal.
    pub goal_conditioned_scale: f32,
}

impl LevelRelabel {
    /// Scale the environment reward, ignore goals.
    pub fn pass_through(reward_scale: f32) -> Self {
        Self {
            reward_scale,
            goal_conditioned_scale: 0.0,
        }
    }

    pub fn goal_conditioned(reward_scale: f32, goal_conditioned_scale: f32) -> Self {
        Self {
            reward_scale,
            goal_conditioned_scale,
        }
    }

    fn uses_goals(&self) -> bool {
        self.goal_conditioned_scale != 0.0
    }
}

/// Rewrites level views with per-level parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Relabeler {
    levels: Vec<LevelRelabel>,
    observation_key: String,
}

impl Relabeler {
    pub fn new(levels: Vec<LevelRelabel>) -> Self {
        Self {
            levels,
            observation_key: DEFAULT_OBSERVATION_KEY.to_string(),
        }
    }

    /// Standard setup: the base level scales the environment reward, every
    /// level above it is scored purely on goal achievement.
    pub fn for_hierarchy(num_levels: usize, reward_scale: f32) -> Self {
        let levels = (0..num_levels)
            .map(|level| {
                if level == 0 {
                    LevelRelabel::pass_through(reward_scale)
                } else {
                    LevelRelabel::goal_conditioned(0.0, 1.0)
                }
            })
            .collect();
        Self::new(levels)
    }

    /// Field the goal-achievement signal is computed on.
    pub fn with_observation_key(mut self, key: impl Into<String>) -> Self {
        self.observation_key = key.into();
        self
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, level: usize) -> Option<&LevelRelabel> {
        self.levels.get(level)
    }

    /// Relabeled rewards for one view, in step order.
    pub fn rewards(&self, view: &LevelTrajectory) -> Result<Vec<f32>, RelabelError> {
        let params = self
            .levels
            .get(view.level)
            .ok_or(RelabelError::UnknownLevel {
                level: view.level,
                num_levels: self.levels.len(),
            })?;

        let n = view.rewards.len();
        if view.observations.len() != n
            || view.actions.len() != n
            || view.next_observations.len() != n
        {
            return Err(RelabelError::Length {
                rewards: n,
                observations: view.observations.len(),
                actions: view.actions.len(),
                next_observations: view.next_observations.len(),
            });
        }

        if !params.uses_goals() {
            return Ok(view
                .rewards
                .iter()
                .map(|r| params.reward_scale * r)
                .collect());
        }

        let period = view.period.max(1);
        let mut rewards = Vec::with_capacity(view.len());
        for (t, reward) in view.rewards.iter().enumerate() {
            let anchor = t - t % period;
            let signal = self.goal_signal(view, t, anchor)?;
            rewards.push(params.reward_scale * reward + params.goal_conditioned_scale * signal);
        }
        Ok(rewards)
    }

    /// Return a copy of `view` with relabeled rewards.
    pub fn relabel(&self, view: &LevelTrajectory) -> Result<LevelTrajectory, RelabelError> {
        let rewards = self.rewards(view)?;
        Ok(LevelTrajectory {
            rewards,
            ..view.clone()
        })
    }

    /// Relabel many views in parallel, preserving input order.
    pub fn relabel_batch(
        &self,
        views: &[LevelTrajectory],
    ) -> Result<Vec<LevelTrajectory>, RelabelError> {
        views.par_iter().map(|view| self.relabel(view)).collect()
    }

    fn goal_signal(
        &self,
        view: &LevelTrajectory,
        t: usize,
        anchor: usize,
    ) -> Result<f32, RelabelError> {
        let key = &self.observation_key;
        let missing = |step| RelabelError::MissingField {
            key: key.clone(),
            step,
        };

        let start = view.observations[anchor]
            .field(key)
            .ok_or_else(|| missing(anchor))?;
        let next = view.next_observations[t]
            .field(key)
            .ok_or_else(|| missing(t + 1))?;
        let goal = &view.actions[t];

        if goal.len() != start.len() || next.len() != start.len() {
            return Err(RelabelError::GoalDim {
                step: t,
                expected: start.len(),
                got: goal.len(),
            });
        }

        let squared: f32 = goal
            .iter()
            .zip(next.iter().zip(start))
            .map(|(g, (s1, s0))| {
                let diff = g - (s1 - s0);
                diff * diff
            })
            .sum();
        Ok(-squared.sqrt())
    }
}
