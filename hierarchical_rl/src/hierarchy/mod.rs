//! Temporal-abstraction layer: a stack of policies at geometric rates.
//!
//! ```text
//!   t:        0    1    2   ...   9   10   11  ...  19
//!   level 1:  g0 ──────────────────▶ g1 ────────────▶     (every time_skip steps)
//!              │    │    │         │  │    │         │
//!   level 0:  a0   a1   a2  ...   a9 a10  a11  ...  a19   (every step)
//! ```
//!
//! Level `i` decides every `time_skip^i` primitive steps. Its output is a goal
//! held for the level below until its next decision; level 0 turns the held
//! goal into the primitive action.

mod config;
mod controller;

pub use config::{ConfigError, HierarchyConfig};
pub use controller::{ControllerError, Decision, HierarchyController};
