//! Trajectory types produced by rollout workers.
//!
//! - `Step`: one primitive timestep with every level's output
//! - `Trajectory`: one episode, owned by the producing worker until returned
//! - `LevelTrajectory`: the slice of a trajectory that one hierarchy level
//!   trains on, the unit the relabeling stage rewrites

use super::observation::Observation;
use serde::{Deserialize, Serialize};

/// One recorded primitive timestep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Observation before acting, with the base level's goal injected.
    pub observation: Observation,
    /// Output held by each level at this step (index 0 is the primitive action).
    pub level_actions: Vec<Vec<f32>>,
    /// Goal each level was conditioned on (`None` for the top level).
    pub level_goals: Vec<Option<Vec<f32>>>,
    /// Environment reward for this step.
    pub reward: f32,
}

/// Ordered steps of one episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    /// Worker that produced this trajectory.
    pub worker_id: usize,
    steps: Vec<Step>,
    /// Observation returned by the last environment step.
    pub final_observation: Option<Observation>,
    /// Sum of rewards over the episode.
    pub episode_return: f32,
    /// Episode ended because the environment signalled done.
    pub terminal: bool,
}

impl Trajectory {
    /// Create an empty trajectory.
    pub fn new(worker_id: usize) -> Self {
        Self::with_capacity(worker_id, 0)
    }

    /// Create with preallocated capacity.
    pub fn with_capacity(worker_id: usize, capacity: usize) -> Self {
        Self {
            worker_id,
            steps: Vec::with_capacity(capacity),
            final_observation: None,
            episode_return: 0.0,
            terminal: false,
        }
    }

    /// Append a step and accumulate its reward into the return.
    pub fn push(&mut self, step: Step) {
        self.episode_return += step.reward;
        self.steps.push(step);
    }

    /// Close the episode.
    pub fn finish(&mut self, final_observation: Observation, terminal: bool) {
        self.final_observation = Some(final_observation);
        self.terminal = terminal;
    }

    /// Number of primitive steps.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps were recorded.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Recorded steps.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Iterate over steps.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter()
    }

    /// Observations (with injected goal) in step order.
    pub fn observations(&self) -> Vec<&Observation> {
        self.steps.iter().map(|s| &s.observation).collect()
    }

    /// The primitive action stream sent to the environment.
    pub fn primitive_actions(&self) -> Vec<&[f32]> {
        self.steps
            .iter()
            .filter_map(|s| s.level_actions.first().map(Vec::as_slice))
            .collect()
    }

    /// Rewards in step order.
    pub fn rewards(&self) -> Vec<f32> {
        self.steps.iter().map(|s| s.reward).collect()
    }

    /// Number of hierarchy levels recorded per step.
    pub fn num_levels(&self) -> usize {
        self.steps.first().map(|s| s.level_actions.len()).unwrap_or(0)
    }

    /// Extract the view one hierarchy level trains on.
    ///
    /// Observations carry the goal `level` was conditioned on, actions are
    /// the level's own outputs, and next observations are taken from the
    /// following step (or `final_observation` for the last one).
    ///
    /// # Panics
    /// Panics if `level >= self.num_levels()` on a non-empty trajectory.
    pub fn level_view(&self, level: usize, period: usize) -> LevelTrajectory {
        let n = self.steps.len();
        let mut observations = Vec::with_capacity(n);
        let mut actions = Vec::with_capacity(n);
        let mut rewards = Vec::with_capacity(n);
        let mut next_observations = Vec::with_capacity(n);

        for (t, step) in self.steps.iter().enumerate() {
            let goal = step.level_goals[level].clone();
            observations.push(Observation {
                fields: step.observation.fields.clone(),
                goal: goal.clone(),
            });
            actions.push(step.level_actions[level].clone());
            rewards.push(step.reward);

            let next = match self.steps.get(t + 1) {
                Some(next_step) => Observation {
                    fields: next_step.observation.fields.clone(),
                    goal: next_step.level_goals[level].clone(),
                },
                None => Observation {
                    fields: self
                        .final_observation
                        .as_ref()
                        .unwrap_or(&step.observation)
                        .fields
                        .clone(),
                    goal,
                },
            };
            next_observations.push(next);
        }

        LevelTrajectory {
            level,
            period: period.max(1),
            observations,
            actions,
            rewards,
            next_observations,
        }
    }
}

/// Per-level training view of a trajectory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelTrajectory {
    /// Hierarchy level (0 is the base).
    pub level: usize,
    /// Decision period of this level in primitive steps.
    pub period: usize,
    /// Observations carrying this level's conditioning goal.
    pub observations: Vec<Observation>,
    /// This level's outputs (goals for levels above the base).
    pub actions: Vec<Vec<f32>>,
    /// Rewards, raw until relabeled.
    pub rewards: Vec<f32>,
    /// Observation following each step.
    pub next_observations: Vec<Observation>,
}

impl LevelTrajectory {
    /// Number of steps.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}
