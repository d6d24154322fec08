//! Deterministic policies and environments shared by unit tests.

use crate::actors::{ControllerFactory, EnvFactory};
use crate::core::observation::{BoxSpace, Observation, ObservationSpace, DEFAULT_OBSERVATION_KEY};
use crate::core::weights::LevelWeights;
use crate::environment::{EnvError, EnvStep, Environment};
use crate::hierarchy::{ConfigError, HierarchyConfig, HierarchyController};
use crate::policy::{LeveledPolicy, PolicyError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Observation and action spaces of a `dim`-dimensional point.
pub fn point_space(dim: usize) -> (ObservationSpace, BoxSpace) {
    (
        ObservationSpace::new()
            .with_field(DEFAULT_OBSERVATION_KEY, BoxSpace::uniform(dim, -10.0, 10.0)),
        BoxSpace::uniform(dim, -1.0, 1.0),
    )
}

/// Emits `offset + number_of_calls` in every dimension.
///
/// The offset is the policy's only weight, which makes the active weights
/// version visible in every emitted action.
pub struct CountingPolicy {
    observation_dim: usize,
    goal_dim: usize,
    action_dim: usize,
    emitted_dim: usize,
    calls: usize,
    offset: f32,
    fail_after: Option<usize>,
    reject_set_weights: bool,
    panic_on_set_weights: bool,
}

impl CountingPolicy {
    pub fn new(observation_dim: usize, goal_dim: usize, action_dim: usize) -> Self {
        Self {
            observation_dim,
            goal_dim,
            action_dim,
            emitted_dim: action_dim,
            calls: 0,
            offset: 0.0,
            fail_after: None,
            reject_set_weights: false,
            panic_on_set_weights: false,
        }
    }

    /// Emit vectors of a different length than declared.
    pub fn with_emitted_dim(mut self, dim: usize) -> Self {
        self.emitted_dim = dim;
        self
    }

    /// Fail every call after the first `calls`.
    pub fn failing_after(mut self, calls: usize) -> Self {
        self.fail_after = Some(calls);
        self
    }

    /// Pass `check_weights` but fail every `set_weights`, like a backend
    /// that runs out of device memory while loading.
    pub fn rejecting_set_weights(mut self) -> Self {
        self.reject_set_weights = true;
        self
    }

    /// Panic inside `set_weights`, killing the worker thread mid-commit.
    pub fn panicking_on_set_weights(mut self) -> Self {
        self.panic_on_set_weights = true;
        self
    }
}

impl LeveledPolicy for CountingPolicy {
    fn observation_dim(&self) -> usize {
        self.observation_dim
    }

    fn goal_dim(&self) -> usize {
        self.goal_dim
    }

    fn action_dim(&self) -> usize {
        self.action_dim
    }

    fn act(
        &mut self,
        _observation: &[f32],
        _goal: Option<&[f32]>,
        _deterministic: bool,
    ) -> Result<Vec<f32>, PolicyError> {
        if self.fail_after.map_or(false, |n| self.calls >= n) {
            return Err(PolicyError::Backend("scripted failure".to_string()));
        }
        self.calls += 1;
        Ok(vec![self.offset + self.calls as f32; self.emitted_dim])
    }

    fn get_weights(&self) -> Result<LevelWeights, PolicyError> {
        Ok(LevelWeights::encode(&self.offset)?)
    }

    fn set_weights(&mut self, weights: &LevelWeights) -> Result<(), PolicyError> {
        let offset = weights.decode()?;
        if self.panic_on_set_weights {
            panic!("scripted panic");
        }
        if self.reject_set_weights && offset != self.offset {
            return Err(PolicyError::Backend("scripted load failure".to_string()));
        }
        self.offset = offset;
        Ok(())
    }

    fn check_weights(&self, weights: &LevelWeights) -> Result<(), PolicyError> {
        weights.decode::<f32>().map(|_| ()).map_err(PolicyError::from)
    }
}

/// Weight set for a stack of [`CountingPolicy`] levels.
pub fn offset_weights(num_levels: usize, offset: f32) -> Vec<LevelWeights> {
    (0..num_levels)
        .map(|_| LevelWeights::encode(&offset).unwrap())
        .collect()
}

/// One-dimensional environment whose state is the episode step counter.
///
/// Every step yields reward 1. Episodes end after `episode_len` steps when
/// set, otherwise only the worker's `max_path_length` ends them.
pub struct CounterEnv {
    observation_space: ObservationSpace,
    action_space: BoxSpace,
    t: Option<usize>,
    episode_len: Option<usize>,
    fail_on_step: Option<usize>,
    panic_on_step: Option<usize>,
    renders: Option<Arc<AtomicUsize>>,
    pub actions: Vec<Vec<f32>>,
}

impl CounterEnv {
    pub fn new() -> Self {
        let (observation_space, action_space) = point_space(1);
        Self {
            observation_space,
            action_space,
            t: None,
            episode_len: None,
            fail_on_step: None,
            panic_on_step: None,
            renders: None,
            actions: Vec::new(),
        }
    }

    pub fn with_episode_len(mut self, len: usize) -> Self {
        self.episode_len = Some(len);
        self
    }

    /// Fail the `n`-th step call of the environment's lifetime.
    pub fn failing_on_step(mut self, n: usize) -> Self {
        self.fail_on_step = Some(n);
        self
    }

    /// Panic on the `n`-th step call, simulating a crashed worker.
    pub fn panicking_on_step(mut self, n: usize) -> Self {
        self.panic_on_step = Some(n);
        self
    }

    /// Count render calls in `counter`.
    pub fn with_render_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.renders = Some(counter);
        self
    }

    fn observe(t: usize) -> Observation {
        Observation::with_field(DEFAULT_OBSERVATION_KEY, vec![t as f32])
    }
}

impl Environment for CounterEnv {
    fn observation_space(&self) -> &ObservationSpace {
        &self.observation_space
    }

    fn action_space(&self) -> &BoxSpace {
        &self.action_space
    }

    fn reset(&mut self) -> Result<Observation, EnvError> {
        self.t = Some(0);
        Ok(Self::observe(0))
    }

    fn step(&mut self, action: &[f32]) -> Result<EnvStep, EnvError> {
        if self.fail_on_step == Some(self.actions.len()) {
            return Err(EnvError::Backend("scripted failure".to_string()));
        }
        if self.panic_on_step == Some(self.actions.len()) {
            panic!("scripted panic");
        }
        let t = self.t.ok_or(EnvError::NotReset)? + 1;
        self.t = Some(t);
        self.actions.push(action.to_vec());
        let done = self.episode_len.map_or(false, |len| t >= len);
        Ok(EnvStep::new(Self::observe(t), 1.0, done))
    }

    fn render(&mut self) -> Result<(), EnvError> {
        if let Some(counter) = &self.renders {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Controller over [`CountingPolicy`] levels for a 1-dim state.
pub fn counting_controller(
    num_levels: usize,
    time_skip: usize,
    max_path_length: usize,
) -> HierarchyController {
    counting_controller_for(
        HierarchyConfig::new()
            .with_num_levels(num_levels)
            .with_time_skip(time_skip)
            .with_max_path_length(max_path_length),
    )
}

/// [`counting_controller`] running an arbitrary hierarchy configuration.
pub fn counting_controller_for(config: HierarchyConfig) -> HierarchyController {
    let num_levels = config.num_levels;
    let levels = (0..num_levels)
        .map(|level| {
            let goal_dim = if level + 1 == num_levels { 0 } else { 1 };
            Box::new(CountingPolicy::new(1, goal_dim, 1)) as Box<dyn LeveledPolicy>
        })
        .collect();
    let (obs_space, action_space) = point_space(1);
    HierarchyController::new(config, levels, &obs_space, &action_space).unwrap()
}

/// Two-level [`counting_controller`] whose top level is `top` instead of a
/// plain [`CountingPolicy`].
pub fn controller_with_top(
    top: CountingPolicy,
    time_skip: usize,
    max_path_length: usize,
) -> HierarchyController {
    let config = HierarchyConfig::new()
        .with_num_levels(2)
        .with_time_skip(time_skip)
        .with_max_path_length(max_path_length);
    let levels: Vec<Box<dyn LeveledPolicy>> =
        vec![Box::new(CountingPolicy::new(1, 1, 1)), Box::new(top)];
    let (obs_space, action_space) = point_space(1);
    HierarchyController::new(config, levels, &obs_space, &action_space).unwrap()
}

/// Pool factories building [`CounterEnv`]s and [`counting_controller`]s.
pub fn counting_factories(
    num_levels: usize,
    time_skip: usize,
    max_path_length: usize,
) -> (EnvFactory, ControllerFactory) {
    hierarchy_factories(
        HierarchyConfig::new()
            .with_num_levels(num_levels)
            .with_time_skip(time_skip)
            .with_max_path_length(max_path_length),
    )
}

/// Pool factories whose controllers all run `config`.
pub fn hierarchy_factories(config: HierarchyConfig) -> (EnvFactory, ControllerFactory) {
    let env: EnvFactory = Arc::new(|_: usize| -> Result<Box<dyn Environment>, EnvError> {
        Ok(Box::new(CounterEnv::new()))
    });
    let controller: ControllerFactory = Arc::new(
        move |_: usize, _: &dyn Environment| -> Result<HierarchyController, ConfigError> {
            Ok(counting_controller_for(config.clone()))
        },
    );
    (env, controller)
}
