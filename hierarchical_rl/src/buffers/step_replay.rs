//! Bounded ring of transitions with uniform sampling.
//!
//! Inserts append at the tail; once `max_num_steps` transitions are held the
//! oldest one is overwritten. Sampling takes a read lock only.

use super::experience_store::{ExperienceStore, ReplayTransition, StoreError};
use crate::core::observation::Observation;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Ring storage, oldest element at `head`.
struct RingStorage<T> {
    data: Vec<Option<T>>,
    head: usize,
    len: usize,
}

impl<T> RingStorage<T> {
    fn new(capacity: usize) -> Self {
        Self {
            data: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, item: T) {
        let capacity = self.data.len();
        let idx = (self.head + self.len) % capacity;
        self.data[idx] = Some(item);
        if self.len < capacity {
            self.len += 1;
        } else {
            self.head = (self.head + 1) % capacity;
        }
    }

    fn get(&self, idx: usize) -> Option<&T> {
        if idx >= self.len {
            return None;
        }
        self.data[(self.head + idx) % self.data.len()].as_ref()
    }

    fn clear(&mut self) {
        self.data.iter_mut().for_each(|item| *item = None);
        self.head = 0;
        self.len = 0;
    }
}

/// Replay buffer holding at most `max_num_steps` transitions.
pub struct StepReplayBuffer {
    storage: RwLock<RingStorage<ReplayTransition>>,
    size: AtomicUsize,
    inserted: AtomicUsize,
    capacity: usize,
}

impl StepReplayBuffer {
    pub fn new(max_num_steps: usize) -> Result<Self, StoreError> {
        if max_num_steps == 0 {
            return Err(StoreError::ZeroCapacity);
        }
        Ok(Self {
            storage: RwLock::new(RingStorage::new(max_num_steps)),
            size: AtomicUsize::new(0),
            inserted: AtomicUsize::new(0),
            capacity: max_num_steps,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Transitions ever inserted, including evicted ones.
    pub fn total_inserted(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    /// Uniformly sample `batch_size` transitions with replacement.
    ///
    /// Returns `None` when the buffer is empty or `batch_size` is zero.
    pub fn sample(&self, batch_size: usize) -> Option<Vec<ReplayTransition>> {
        let guard = self.storage.read();
        let len = guard.len;
        if len == 0 || batch_size == 0 {
            return None;
        }

        let mut rng = fastrand::Rng::new();
        let samples: Vec<ReplayTransition> = (0..batch_size)
            .filter_map(|_| guard.get(rng.usize(0..len)).cloned())
            .collect();
        Some(samples)
    }

    /// Copy of the contents, oldest first.
    pub fn to_vec(&self) -> Vec<ReplayTransition> {
        let guard = self.storage.read();
        (0..guard.len).filter_map(|i| guard.get(i).cloned()).collect()
    }

    pub fn clear(&self) {
        self.storage.write().clear();
        self.size.store(0, Ordering::Relaxed);
    }

    /// Fraction of capacity in use.
    pub fn utilization(&self) -> f32 {
        self.len() as f32 / self.capacity as f32
    }
}

impl ExperienceStore for StepReplayBuffer {
    fn insert_trajectory(
        &self,
        observations: &[Observation],
        actions: &[Vec<f32>],
        rewards: &[f32],
    ) -> Result<usize, StoreError> {
        let n = actions.len();
        if rewards.len() != n || observations.len() != n + 1 {
            return Err(StoreError::LengthMismatch {
                observations: observations.len(),
                actions: n,
                rewards: rewards.len(),
            });
        }

        let mut guard = self.storage.write();
        for t in 0..n {
            guard.push(ReplayTransition {
                observation: observations[t].clone(),
                action: actions[t].clone(),
                reward: rewards[t],
                next_observation: observations[t + 1].clone(),
            });
        }
        self.size.store(guard.len, Ordering::Relaxed);
        self.inserted.fetch_add(n, Ordering::Relaxed);
        Ok(n)
    }

    fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for StepReplayBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepReplayBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("total_inserted", &self.total_inserted())
            .finish()
    }
}
