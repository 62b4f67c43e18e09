//! Rollout driver: runs a policy against a named environment.

mod metrics;
mod policy;

pub use metrics::{EvaluationMetrics, MovingAverage, RolloutMetrics};
pub use policy::{Policy, RandomPolicy};

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::env::Environment;
use crate::error::{EnvError, Result};
use crate::factory::{DEFAULT_BASE_PORT, DEFAULT_TIMEOUT_WAIT, LaunchSettings};
use crate::registry::env_id;
use crate::scenario::ScenarioVariant;

/// Episodes between console reports
const LOG_INTERVAL: usize = 10;

/// Driver options, read from `AQUANAV_*` variables
#[derive(Debug, Clone, PartialEq)]
pub struct DriverConfig {
    pub env_name: String,
    pub builds_dir: PathBuf,
    pub base_port: u16,
    pub timeout_wait: Duration,
    pub no_graphics: bool,
    pub seed: i32,
    pub log_folder: Option<PathBuf>,
    pub transcript_folder: Option<PathBuf>,
    pub time_scale: Option<f32>,
    pub steps: usize,
    pub worker_id: Option<u16>,
    pub editor: bool,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            env_name: env_id(ScenarioVariant::Easy).to_string(),
            builds_dir: PathBuf::from("builds"),
            base_port: DEFAULT_BASE_PORT,
            timeout_wait: DEFAULT_TIMEOUT_WAIT,
            no_graphics: false,
            seed: 0,
            log_folder: None,
            transcript_folder: None,
            time_scale: None,
            steps: 1000,
            worker_id: None,
            editor: false,
        }
    }
}

fn parsed<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>> {
    match value {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            EnvError::configuration(format!("{} has an unparsable value '{}'", key, raw))
        }),
        None => Ok(None),
    }
}

impl DriverConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from `lookup`, falling back to defaults for unset keys.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let timeout_secs: Option<f64> =
            parsed("AQUANAV_TIMEOUT_SECS", lookup("AQUANAV_TIMEOUT_SECS"))?;
        let timeout_wait = match timeout_secs {
            Some(secs) => Duration::try_from_secs_f64(secs).map_err(|_| {
                EnvError::configuration(format!("AQUANAV_TIMEOUT_SECS {} is not a duration", secs))
            })?,
            None => defaults.timeout_wait,
        };

        Ok(Self {
            env_name: lookup("AQUANAV_ENV").unwrap_or(defaults.env_name),
            builds_dir: lookup("AQUANAV_BUILDS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.builds_dir),
            base_port: parsed("AQUANAV_BASE_PORT", lookup("AQUANAV_BASE_PORT"))?
                .unwrap_or(defaults.base_port),
            timeout_wait,
            no_graphics: parsed("AQUANAV_NO_GRAPHICS", lookup("AQUANAV_NO_GRAPHICS"))?
                .unwrap_or(defaults.no_graphics),
            seed: parsed("AQUANAV_SEED", lookup("AQUANAV_SEED"))?.unwrap_or(defaults.seed),
            log_folder: lookup("AQUANAV_LOG_FOLDER").map(PathBuf::from),
            transcript_folder: lookup("AQUANAV_TRANSCRIPTS_FOLDER").map(PathBuf::from),
            time_scale: parsed("AQUANAV_TIME_SCALE", lookup("AQUANAV_TIME_SCALE"))?,
            steps: parsed("AQUANAV_STEPS", lookup("AQUANAV_STEPS"))?.unwrap_or(defaults.steps),
            worker_id: parsed("AQUANAV_WORKER_ID", lookup("AQUANAV_WORKER_ID"))?,
            editor: parsed("AQUANAV_EDITOR", lookup("AQUANAV_EDITOR"))?
                .unwrap_or(defaults.editor),
        })
    }

    pub fn launch_settings(&self) -> LaunchSettings {
        LaunchSettings {
            builds_dir: self.builds_dir.clone(),
            base_port: self.base_port,
            timeout_wait: self.timeout_wait,
            no_graphics: self.no_graphics,
            seed: self.seed,
            log_folder: self.log_folder.clone(),
            transcript_folder: self.transcript_folder.clone(),
            time_scale: self.time_scale,
            editor: self.editor,
            ..Default::default()
        }
    }
}

/// Runs `policy` for `steps` environment steps, resetting whenever an
/// episode ends. The unfinished last episode is not counted.
pub async fn run<E, P>(env: &mut E, policy: &mut P, steps: usize) -> Result<EvaluationMetrics>
where
    E: Environment,
    P: Policy,
{
    let mut rollout = RolloutMetrics::default();
    let mut evaluation = EvaluationMetrics::new();

    let mut observation = env.reset().await?;
    let mut episode_reward = 0.0;

    for _ in 0..steps {
        let action = policy.act(&observation, env.action_space())?;
        let step = env.step(&action).await?;
        policy.observe(&observation, &action, &step);
        rollout.record_step();
        episode_reward += step.reward;

        if step.done {
            debug!(
                "episode {} done: reward {:.2} in {} steps",
                evaluation.num_episodes + 1,
                episode_reward,
                step.info.steps
            );
            rollout.record_episode(episode_reward, step.info.steps, step.info.interrupted);
            evaluation.record_episode(episode_reward, step.info.steps, step.info.interrupted);
            if evaluation.num_episodes % LOG_INTERVAL == 0 {
                rollout.log_to_console();
            }
            episode_reward = 0.0;
            observation = env.reset().await?;
        } else {
            observation = step.observation;
        }
    }

    info!(
        "rollout finished: {} steps, {} episodes",
        rollout.total_timesteps, evaluation.num_episodes
    );
    Ok(evaluation)
}
