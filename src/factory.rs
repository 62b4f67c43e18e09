//! Turns a scenario variant into a live single-agent environment handle.

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

use crate::channels::build_payloads;
use crate::env::{
    Action, Environment, LaunchSpec, Observation, Space, StepResult, UnityEnvironment, UnityGymEnv,
};
use crate::error::{LaunchFailure, Result};
use crate::infra::{TranscriptFile, WorkerIdAllocator, WorkerLease, resolve_executable};
use crate::scenario::{ScenarioConfig, ScenarioVariant};

pub const DEFAULT_BASE_PORT: u16 = 5005;
pub const DEFAULT_TIMEOUT_WAIT: Duration = Duration::from_secs(60);

/// Launch configuration shared by every environment a factory builds.
#[derive(Debug, Clone)]
pub struct LaunchSettings {
    /// Directory holding one build directory per scenario
    pub builds_dir: PathBuf,
    pub base_port: u16,
    /// Bound on the handshake after the player is started
    pub timeout_wait: Duration,
    pub no_graphics: bool,
    pub seed: i32,
    /// Player logs go to `<folder>/Player-<worker>.log`
    pub log_folder: Option<PathBuf>,
    /// Protocol transcripts, one file per environment
    pub transcript_folder: Option<PathBuf>,
    /// Replaces the scenario's own time scale
    pub time_scale: Option<f32>,
    pub additional_args: Vec<String>,
    /// Connect to a player started by hand instead of spawning a build
    pub editor: bool,
    pub flatten_branched: bool,
}

impl Default for LaunchSettings {
    fn default() -> Self {
        Self {
            builds_dir: PathBuf::from("builds"),
            base_port: DEFAULT_BASE_PORT,
            timeout_wait: DEFAULT_TIMEOUT_WAIT,
            no_graphics: false,
            seed: 0,
            log_folder: None,
            transcript_folder: None,
            time_scale: None,
            additional_args: Vec::new(),
            editor: false,
            flatten_branched: true,
        }
    }
}

pub struct EnvFactory {
    settings: LaunchSettings,
    allocator: WorkerIdAllocator,
}

impl EnvFactory {
    /// Uses the process-wide worker id allocator.
    pub fn new(settings: LaunchSettings) -> Self {
        Self::with_allocator(settings, WorkerIdAllocator::global().clone())
    }

    pub fn with_allocator(settings: LaunchSettings, allocator: WorkerIdAllocator) -> Self {
        Self {
            settings,
            allocator,
        }
    }

    pub fn settings(&self) -> &LaunchSettings {
        &self.settings
    }

    pub fn allocator(&self) -> &WorkerIdAllocator {
        &self.allocator
    }

    /// Resolved scenario configuration with the settings' overrides applied.
    pub fn scenario_config(&self, variant: ScenarioVariant) -> ScenarioConfig {
        let mut config = variant.config();
        if let Some(time_scale) = self.settings.time_scale {
            config.engine.time_scale = time_scale;
        }
        config
    }

    /// Builds `variant` on the lowest free worker id.
    pub async fn make(&self, variant: ScenarioVariant) -> Result<UuvEnv> {
        self.launch(variant, None).await
    }

    /// Builds `variant` on `worker_id`; fails if a live environment holds it.
    pub async fn make_with_worker(
        &self,
        variant: ScenarioVariant,
        worker_id: u16,
    ) -> Result<UuvEnv> {
        self.launch(variant, Some(worker_id)).await
    }

    async fn launch(&self, variant: ScenarioVariant, worker_id: Option<u16>) -> Result<UuvEnv> {
        let config = self.scenario_config(variant);
        let payloads = build_payloads(&config)?;

        let executable = if self.settings.editor {
            None
        } else {
            let path = config.executable_path(&self.settings.builds_dir);
            Some(resolve_executable(&path).ok_or(LaunchFailure::ExecutableNotFound { path })?)
        };

        let worker: WorkerLease = match worker_id {
            Some(id) => self.allocator.acquire_specific(id)?,
            None => self.allocator.acquire()?,
        };
        debug!("{} takes worker {}", variant, worker.id());

        let transcript = match &self.settings.transcript_folder {
            Some(folder) => Some(TranscriptFile::new(folder, variant.name(), worker.id())?),
            None => None,
        };

        let spec = LaunchSpec {
            executable,
            worker,
            base_port: self.settings.base_port,
            seed: self.settings.seed,
            timeout_wait: self.settings.timeout_wait,
            no_graphics: self.settings.no_graphics,
            log_folder: self.settings.log_folder.clone(),
            additional_args: self.settings.additional_args.clone(),
            transcript,
        };
        let env = UnityEnvironment::launch(spec, payloads.into_channels()).await?;
        let inner = UnityGymEnv::new(env, self.settings.flatten_branched).await?;
        info!(
            "{} ready on worker {} (actions {:?})",
            variant,
            inner.worker_id(),
            inner.action_space()
        );

        Ok(UuvEnv { variant, inner })
    }
}

/// Environment handle for one scenario of the underwater vehicle simulator.
pub struct UuvEnv {
    variant: ScenarioVariant,
    inner: UnityGymEnv,
}

impl UuvEnv {
    pub fn variant(&self) -> ScenarioVariant {
        self.variant
    }

    pub fn worker_id(&self) -> u16 {
        self.inner.worker_id()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn gym(&self) -> &UnityGymEnv {
        &self.inner
    }
}

impl Environment for UuvEnv {
    fn observation_space(&self) -> &Space {
        self.inner.observation_space()
    }

    fn action_space(&self) -> &Space {
        self.inner.action_space()
    }

    async fn reset(&mut self) -> Result<Observation> {
        self.inner.reset().await
    }

    async fn step(&mut self, action: &Action) -> Result<StepResult> {
        self.inner.step(action).await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }
}
