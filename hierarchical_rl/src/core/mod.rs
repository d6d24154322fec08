//! Shared data model: observations, trajectories, weight snapshots.

pub mod model_version;
pub mod observation;
pub mod running_stats;
pub mod trajectory;
pub mod weights;

pub use model_version::{broadcast_versions, BroadcastVersions, SharedBroadcastVersions};
pub use observation::{BoxSpace, Observation, ObservationSpace, DEFAULT_OBSERVATION_KEY};
pub use running_stats::RunningScalarStats;
pub use trajectory::{LevelTrajectory, Step, Trajectory};
pub use weights::{LevelWeights, ParameterSnapshot};
