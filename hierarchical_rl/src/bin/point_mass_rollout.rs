//! Point-mass rollout demo.
//!
//! Runs the epoch driver on a point mass with linear Gaussian policies at
//! every level. The trainer never updates its weights; it only samples
//! replay batches, which exercises the whole collect/relabel/insert path.

use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use hierarchical_rl::{
    ConfigError, ControllerFactory, CsvRecorder, EnvError, EnvFactory, Environment, Experiment,
    ExperimentConfig, HierarchicalReplay, HierarchyConfig, HierarchyController, LevelWeights,
    LeveledPolicy, LinearGaussianPolicy, LogRecorder, MultiRecorder, PointMassEnv, SharedRecorder,
    Trainer, TrainerError,
};

/// Hierarchical rollouts on a point mass
#[derive(Parser)]
#[command(name = "point_mass_rollout")]
#[command(about = "Collect hierarchical rollouts on a point-mass environment", long_about = None)]
struct Cli {
    /// Experiment config (JSON); flags below override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of rollout worker threads
    #[arg(long)]
    num_workers: Option<usize>,

    /// Number of hierarchy levels
    #[arg(long)]
    num_levels: Option<usize>,

    /// Branching factor between decision frequencies
    #[arg(long)]
    time_skip: Option<usize>,

    /// Maximum steps per episode
    #[arg(long)]
    max_path_length: Option<usize>,

    /// Number of epochs
    #[arg(long)]
    epochs: Option<usize>,

    /// Point-mass dimensionality
    #[arg(long, default_value_t = 2)]
    dim: usize,

    /// Replay batch size sampled per train step
    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Also write metrics to this CSV file
    #[arg(long)]
    metrics_csv: Option<PathBuf>,
}

impl Cli {
    fn experiment_config(&self) -> Result<ExperimentConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ExperimentConfig::from_json_file(path)?,
            None => ExperimentConfig::new()
                .with_warm_up_steps(2_000)
                .with_steps_per_epoch(500)
                .with_eval(1_000, 5)
                .with_num_epochs(20),
        };
        if let Some(n) = self.num_workers {
            config.num_workers = n;
        }
        if let Some(n) = self.num_levels {
            config.num_levels = n;
        }
        if let Some(n) = self.time_skip {
            config.time_skip = n;
        }
        if let Some(n) = self.max_path_length {
            config.max_path_length = n;
        }
        if let Some(n) = self.epochs {
            config.num_epochs = n;
        }
        config.build()
    }
}

/// Keeps its initial weights and samples one batch per level per step.
struct FrozenTrainer {
    weights: Vec<LevelWeights>,
    batch_size: usize,
    steps: usize,
    sampled: usize,
}

impl Trainer for FrozenTrainer {
    fn train_step(&mut self, replay: &HierarchicalReplay) -> Result<(), TrainerError> {
        for level in 0..replay.num_levels() {
            if let Some(batch) = replay.level(level).and_then(|b| b.sample(self.batch_size)) {
                self.sampled += batch.len();
            }
        }
        self.steps += 1;
        Ok(())
    }

    fn snapshot(&self) -> Vec<LevelWeights> {
        self.weights.clone()
    }
}

/// Linear policies for every level: level 0 outputs actions, higher levels
/// output goals in the state space.
fn linear_controller(
    config: &HierarchyConfig,
    env: &dyn Environment,
    seed: u64,
) -> Result<HierarchyController, ConfigError> {
    let key = &config.observation_key;
    let state_space = env
        .observation_space()
        .get(key)
        .cloned()
        .ok_or_else(|| ConfigError::MissingField { key: key.clone() })?;
    let state_dim = state_space.dim();
    let top = config.top_level();

    let levels = (0..config.num_levels)
        .map(|level| {
            let goal_dim = if level == top { 0 } else { state_dim };
            let bounds = if level == 0 {
                env.action_space().clone()
            } else {
                state_space.clone()
            };
            let policy = LinearGaussianPolicy::new(
                state_dim,
                goal_dim,
                bounds,
                seed.wrapping_mul(31).wrapping_add(level as u64),
            );
            Box::new(policy) as Box<dyn LeveledPolicy>
        })
        .collect();

    HierarchyController::new(
        config.clone(),
        levels,
        env.observation_space(),
        env.action_space(),
    )
}

fn recorder(cli: &Cli) -> Result<SharedRecorder, Box<dyn Error>> {
    let mut recorder = MultiRecorder::new().add(Arc::new(LogRecorder::default()));
    if let Some(path) = &cli.metrics_csv {
        recorder = recorder.add(Arc::new(CsvRecorder::new(path)?));
    }
    Ok(Arc::new(recorder))
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let config = cli.experiment_config()?;
    let hierarchy = config.hierarchy_config();
    let (dim, seed) = (cli.dim, cli.seed);

    log::info!(
        "point mass dim {}: {} levels, time_skip {}, {} workers, {} epochs",
        dim,
        config.num_levels,
        config.time_skip,
        config.num_workers,
        config.num_epochs
    );

    let env_factory: EnvFactory =
        Arc::new(move |id: usize| -> Result<Box<dyn Environment>, EnvError> {
            Ok(Box::new(PointMassEnv::new(dim, seed.wrapping_add(id as u64))))
        });

    let controller_config = hierarchy.clone();
    let controller_factory: ControllerFactory = Arc::new(
        move |id: usize, env: &dyn Environment| -> Result<HierarchyController, ConfigError> {
            linear_controller(&controller_config, env, seed.wrapping_add(id as u64))
        },
    );

    // Initial weights come from a controller built the same way as the
    // workers' own.
    let reference_env = PointMassEnv::new(dim, seed);
    let weights = linear_controller(&hierarchy, &reference_env, seed)?.get_weights()?;

    let trainer = FrozenTrainer {
        weights,
        batch_size: cli.batch_size,
        steps: 0,
        sampled: 0,
    };

    let mut experiment = Experiment::new(
        config,
        env_factory,
        controller_factory,
        trainer,
        recorder(&cli)?,
    )?;
    let history = experiment.run()?;

    for stats in experiment.pool().worker_stats() {
        log::info!(
            "worker {}: {} steps, {} episodes, mean return {:.3}",
            stats.worker_id,
            stats.steps,
            stats.episodes,
            stats.avg_episode_return
        );
    }
    if let Some(last_eval) = history.iter().rev().find_map(|e| e.eval_mean_return) {
        log::info!("last eval mean return {:.3}", last_eval);
    }

    let trainer = experiment.into_trainer();
    log::info!(
        "{} train steps, {} transitions sampled",
        trainer.steps,
        trainer.sampled
    );
    Ok(())
}
