//! Observation records and bounded vector spaces.
//!
//! An [`Observation`] is a set of named numeric fields produced by an
//! environment, plus an explicit `goal` slot that only the hierarchy
//! controller writes. Keeping the goal out of the field map means a stored
//! observation never has to be searched for a dynamically injected key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Default name of the field every policy level reads.
pub const DEFAULT_OBSERVATION_KEY: &str = "observation";

/// Named numeric fields observed at one primitive step.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Observation {
    /// Environment-produced fields, keyed by name.
    pub fields: BTreeMap<String, Vec<f32>>,
    /// Goal the base level is pursuing, injected by the controller.
    pub goal: Option<Vec<f32>>,
}

impl Observation {
    /// Create an empty observation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an observation holding a single field.
    pub fn with_field(key: impl Into<String>, values: Vec<f32>) -> Self {
        let mut obs = Self::new();
        obs.fields.insert(key.into(), values);
        obs
    }

    /// Insert or replace a field.
    pub fn insert(&mut self, key: impl Into<String>, values: Vec<f32>) {
        self.fields.insert(key.into(), values);
    }

    /// Look up a field by name.
    pub fn field(&self, key: &str) -> Option<&[f32]> {
        self.fields.get(key).map(Vec::as_slice)
    }

    /// Whether the field exists.
    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Return a copy of this observation carrying `goal`.
    pub fn with_goal(mut self, goal: Option<Vec<f32>>) -> Self {
        self.goal = goal;
        self
    }
}

/// Axis-aligned box of real vectors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoxSpace {
    /// Per-dimension lower bound.
    pub low: Vec<f32>,
    /// Per-dimension upper bound.
    pub high: Vec<f32>,
}

impl BoxSpace {
    /// Create a box from explicit bounds.
    ///
    /// # Panics
    /// Panics if `low` and `high` differ in length.
    pub fn new(low: Vec<f32>, high: Vec<f32>) -> Self {
        assert_eq!(low.len(), high.len(), "BoxSpace bounds length mismatch");
        Self { low, high }
    }

    /// Box with the same bounds on every dimension.
    pub fn uniform(dim: usize, low: f32, high: f32) -> Self {
        Self {
            low: vec![low; dim],
            high: vec![high; dim],
        }
    }

    /// Vector length.
    pub fn dim(&self) -> usize {
        self.low.len()
    }

    /// Whether `values` has the right length and lies inside the bounds.
    pub fn contains(&self, values: &[f32]) -> bool {
        values.len() == self.dim()
            && values
                .iter()
                .zip(self.low.iter().zip(self.high.iter()))
                .all(|(&v, (&lo, &hi))| v >= lo && v <= hi)
    }

    /// Clamp `values` into the box in place.
    pub fn clip(&self, values: &mut [f32]) {
        for (v, (&lo, &hi)) in values.iter_mut().zip(self.low.iter().zip(self.high.iter())) {
            *v = v.clamp(lo, hi);
        }
    }
}

/// Field name to bounded vector space.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ObservationSpace {
    /// Spec per field name.
    pub spaces: BTreeMap<String, BoxSpace>,
}

impl ObservationSpace {
    /// Create an empty space.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field space (builder style).
    pub fn with_field(mut self, key: impl Into<String>, space: BoxSpace) -> Self {
        self.spaces.insert(key.into(), space);
        self
    }

    /// Spec for a field.
    pub fn get(&self, key: &str) -> Option<&BoxSpace> {
        self.spaces.get(key)
    }

    /// Dimension of a field, if declared.
    pub fn field_dim(&self, key: &str) -> Option<usize> {
        self.spaces.get(key).map(BoxSpace::dim)
    }
}
