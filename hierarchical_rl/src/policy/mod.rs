//! Policy levels of the control hierarchy.
//!
//! Every level, whatever its internals, is driven through one interface:
//! [`LeveledPolicy`]. The hierarchy controller owns an ordered
//! `Vec<Box<dyn LeveledPolicy>>` and never needs to know which concrete
//! policy sits at which level.
//!
//! - `LeveledPolicy`: act / get_weights / set_weights contract
//! - `LinearGaussianPolicy`: squashed-Gaussian linear policy with bincode weights

mod linear;

pub use linear::{LinearGaussianPolicy, LinearParams};

use crate::core::weights::LevelWeights;
use std::fmt;

/// Error raised by a policy level.
#[derive(Debug, Clone, PartialEq)]
pub enum PolicyError {
    /// An input vector has the wrong length.
    InputDim {
        input: &'static str,
        expected: usize,
        got: usize,
    },
    /// A weight blob could not be decoded or has the wrong shape.
    InvalidWeights(String),
    /// Any other failure inside the policy implementation.
    Backend(String),
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::InputDim { input, expected, got } => {
                write!(f, "{} has {} dims, policy expects {}", input, got, expected)
            }
            PolicyError::InvalidWeights(msg) => write!(f, "invalid weights: {}", msg),
            PolicyError::Backend(msg) => write!(f, "policy error: {}", msg),
        }
    }
}

impl std::error::Error for PolicyError {}

impl From<bincode::Error> for PolicyError {
    fn from(e: bincode::Error) -> Self {
        PolicyError::InvalidWeights(e.to_string())
    }
}

/// One decision layer of the hierarchy.
///
/// Level 0 maps observations (plus the goal from level 1, if any) to
/// primitive actions; levels above it map observations (plus their own
/// conditioning goal) to goals for the level below.
pub trait LeveledPolicy: Send {
    /// Length of the observation vector this level reads.
    fn observation_dim(&self) -> usize;

    /// Length of the conditioning goal (0 if unconditioned).
    fn goal_dim(&self) -> usize;

    /// Length of the vector this level emits.
    fn action_dim(&self) -> usize;

    /// Produce an output for one decision.
    ///
    /// `deterministic` selects the mode of the action distribution instead of
    /// a sample.
    fn act(
        &mut self,
        observation: &[f32],
        goal: Option<&[f32]>,
        deterministic: bool,
    ) -> Result<Vec<f32>, PolicyError>;

    /// Serialize the current parameters.
    fn get_weights(&self) -> Result<LevelWeights, PolicyError>;

    /// Replace the current parameters.
    fn set_weights(&mut self, weights: &LevelWeights) -> Result<(), PolicyError>;

    /// Check that `weights` would be accepted by `set_weights` without
    /// applying them.
    ///
    /// The worker pool stages a broadcast with this check on every worker
    /// before any worker switches, so it must reject every blob that
    /// `set_weights` would reject for its content.
    fn check_weights(&self, weights: &LevelWeights) -> Result<(), PolicyError>;
}
