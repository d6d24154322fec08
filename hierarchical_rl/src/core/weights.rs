//! Parameter blobs broadcast from the training step to rollout workers.
//!
//! Weights travel as serialized bytes. `Vec<u8>` is `Send + Sync` and
//! clones by value, so each worker ends up with a private copy and a
//! broadcast can never be observed half-applied.
//!
//! ```text
//! Trainer                      WorkerPool                    Worker N
//! ┌──────────────┐   snapshot  ┌──────────────┐  clone()  ┌──────────────┐
//! │ get_weights()│ ──────────→ │ version += 1 │ ────────→ │ stage/commit │
//! └──────────────┘             └──────────────┘           └──────────────┘
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Opaque serialized parameters of one hierarchy level.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LevelWeights(pub Vec<u8>);

impl LevelWeights {
    /// Wrap raw bytes.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Serialize a parameter record with bincode.
    pub fn encode<T: Serialize>(record: &T) -> Result<Self, bincode::Error> {
        bincode::serialize(record).map(Self)
    }

    /// Deserialize a parameter record with bincode.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, bincode::Error> {
        bincode::deserialize(&self.0)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Blob size in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the blob is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Full parameter snapshot for every level, tagged with a version.
///
/// Version 0 means "initial weights, never broadcast".
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    /// Broadcast generation.
    pub version: u64,
    /// Weights indexed by level (0 is the base).
    pub levels: Vec<LevelWeights>,
}

impl ParameterSnapshot {
    /// Create a snapshot.
    pub fn new(version: u64, levels: Vec<LevelWeights>) -> Self {
        Self { version, levels }
    }

    /// Number of levels covered.
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Total payload size in bytes.
    pub fn total_bytes(&self) -> usize {
        self.levels.iter().map(LevelWeights::len).sum()
    }
}
