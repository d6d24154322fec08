//! Experience store trait and its error type.
//!
//! Paths are inserted in the layout the samplers produce: `n` actions and
//! rewards with `n + 1` observations, the last one being the observation
//! after the final step.

use crate::core::observation::Observation;
use crate::core::trajectory::LevelTrajectory;
use crate::relabel::RelabelError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error inserting into an experience store.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// A store must hold at least one transition.
    ZeroCapacity,
    /// Path components have inconsistent lengths.
    LengthMismatch {
        observations: usize,
        actions: usize,
        rewards: usize,
    },
    /// A trajectory has a different number of levels than the store.
    LevelCount { expected: usize, got: usize },
    /// Reward relabeling failed.
    Relabel(RelabelError),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::ZeroCapacity => write!(f, "store capacity must be > 0"),
            StoreError::LengthMismatch {
                observations,
                actions,
                rewards,
            } => write!(
                f,
                "path needs one more observation than actions and rewards, got {} observations, {} actions, {} rewards",
                observations, actions, rewards
            ),
            StoreError::LevelCount { expected, got } => {
                write!(f, "store has {} levels, trajectory has {}", expected, got)
            }
            StoreError::Relabel(e) => write!(f, "relabeling failed: {}", e),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Relabel(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RelabelError> for StoreError {
    fn from(e: RelabelError) -> Self {
        StoreError::Relabel(e)
    }
}

/// One stored transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTransition {
    pub observation: Observation,
    pub action: Vec<f32>,
    pub reward: f32,
    pub next_observation: Observation,
}

/// Append-only store of transitions fed by the sampler.
pub trait ExperienceStore: Send + Sync {
    /// Append one path. Returns the number of transitions inserted.
    ///
    /// `observations` must be exactly one longer than `actions` and
    /// `rewards`.
    fn insert_trajectory(
        &self,
        observations: &[Observation],
        actions: &[Vec<f32>],
        rewards: &[f32],
    ) -> Result<usize, StoreError>;

    /// Append a (usually relabeled) level view.
    fn insert_level(&self, view: &LevelTrajectory) -> Result<usize, StoreError> {
        let Some(last) = view.next_observations.last() else {
            return Ok(0);
        };
        let mut observations = view.observations.clone();
        observations.push(last.clone());
        self.insert_trajectory(&observations, &view.actions, &view.rewards)
    }

    /// Transitions currently held.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
