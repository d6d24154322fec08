//! Experience stores fed by the worker pool.
//!
//! - `StepReplayBuffer`: bounded transition ring with uniform sampling
//! - `HierarchicalReplay`: one ring per level, relabels on insert

pub mod experience_store;
pub mod hierarchical_replay;
pub mod step_replay;

pub use experience_store::{ExperienceStore, ReplayTransition, StoreError};
pub use hierarchical_replay::HierarchicalReplay;
pub use step_replay::StepReplayBuffer;

#[cfg(test)]
mod tests;
