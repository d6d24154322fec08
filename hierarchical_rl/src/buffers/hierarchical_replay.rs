//! One replay buffer per hierarchy level.
//!
//! ```text
//! Trajectory ──> level_view(0, p0) ──┐              ┌──> buffer[0]
//!            ──> level_view(1, p1) ──┼─> Relabeler ─┼──> buffer[1]
//!            ──> level_view(n, pn) ──┘   (rayon)    └──> buffer[n]
//! ```

use super::experience_store::{ExperienceStore, StoreError};
use super::step_replay::StepReplayBuffer;
use crate::core::trajectory::{LevelTrajectory, Trajectory};
use crate::hierarchy::HierarchyConfig;
use crate::relabel::Relabeler;

/// Per-level replay with relabeling on insert.
#[derive(Debug)]
pub struct HierarchicalReplay {
    buffers: Vec<StepReplayBuffer>,
    periods: Vec<usize>,
    relabeler: Relabeler,
}

impl HierarchicalReplay {
    /// Create one buffer of `max_num_steps` per level of `config`.
    pub fn new(
        config: &HierarchyConfig,
        max_num_steps: usize,
        relabeler: Relabeler,
    ) -> Result<Self, StoreError> {
        if relabeler.num_levels() != config.num_levels {
            return Err(StoreError::LevelCount {
                expected: config.num_levels,
                got: relabeler.num_levels(),
            });
        }

        let buffers = (0..config.num_levels)
            .map(|_| StepReplayBuffer::new(max_num_steps))
            .collect::<Result<Vec<_>, _>>()?;
        let periods = config.periods();

        Ok(Self {
            buffers,
            periods,
            relabeler,
        })
    }

    pub fn num_levels(&self) -> usize {
        self.buffers.len()
    }

    pub fn level(&self, level: usize) -> Option<&StepReplayBuffer> {
        self.buffers.get(level)
    }

    pub fn relabeler(&self) -> &Relabeler {
        &self.relabeler
    }

    /// Relabeled level views of `path`, base level first.
    pub fn level_views(&self, path: &Trajectory) -> Result<Vec<LevelTrajectory>, StoreError> {
        if path.num_levels() != self.num_levels() {
            return Err(StoreError::LevelCount {
                expected: self.num_levels(),
                got: path.num_levels(),
            });
        }
        let views: Vec<LevelTrajectory> = self
            .periods
            .iter()
            .enumerate()
            .map(|(level, &period)| path.level_view(level, period))
            .collect();
        Ok(self.relabeler.relabel_batch(&views)?)
    }

    /// Relabel and append `path` to every level. Returns the number of
    /// primitive steps inserted.
    pub fn insert_path(&self, path: &Trajectory) -> Result<usize, StoreError> {
        if path.is_empty() {
            return Ok(0);
        }
        for (buffer, view) in self.buffers.iter().zip(self.level_views(path)?) {
            buffer.insert_level(&view)?;
        }
        Ok(path.len())
    }

    pub fn insert_paths(&self, paths: &[Trajectory]) -> Result<usize, StoreError> {
        let mut inserted = 0;
        for path in paths {
            inserted += self.insert_path(path)?;
        }
        Ok(inserted)
    }

    /// Transitions held per level.
    pub fn sizes(&self) -> Vec<usize> {
        self.buffers.iter().map(|b| b.len()).collect()
    }
}
