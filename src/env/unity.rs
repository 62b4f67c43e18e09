use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

use tracing::{info, warn};

use super::spec::{ActionTuple, BehaviorSpec, BehaviorSteps};
use crate::channels::{SideChannel, SideChannelManager};
use crate::communicator_objects::unity_rl_input_proto::ListAgentActionProto;
use crate::communicator_objects::{
    AgentActionProto, CommandProto, UnityInputProto, UnityMessageProto, UnityOutputProto,
    UnityRlCapabilitiesProto, UnityRlInitializationInputProto, UnityRlInputProto,
    UnityRlOutputProto,
};
use crate::error::{EnvError, LaunchFailure, Result};
use crate::infra::communicator::{STATUS_OK, header_status, wrap_input};
use crate::infra::{
    Communicator, PlayerArgs, SimulatorProcess, TranscriptFile, WorkerLease, worker_port,
};

/// Communication protocol version spoken by this trainer.
pub const COMMUNICATION_API_VERSION: &str = "1.5.0";
pub const PACKAGE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a closing simulator gets to exit before it is killed.
const CLOSE_GRACE: Duration = Duration::from_secs(10);

/// Everything needed to bind one simulator instance.
pub struct LaunchSpec {
    /// `None` waits for a player started elsewhere, e.g. the Unity editor.
    pub executable: Option<PathBuf>,
    pub worker: WorkerLease,
    pub base_port: u16,
    pub seed: i32,
    pub timeout_wait: Duration,
    pub no_graphics: bool,
    pub log_folder: Option<PathBuf>,
    pub additional_args: Vec<String>,
    pub transcript: Option<TranscriptFile>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcademyInfo {
    pub name: String,
    pub communication_version: String,
    pub package_version: String,
}

/// Returns whether a simulator speaking `unity` can talk to a trainer speaking `ours`.
/// Pre-1.0 versions must also agree on the minor version.
pub fn communication_compatible(unity: &str, ours: &str) -> bool {
    fn parse(version: &str) -> Option<(u32, u32)> {
        let mut parts = version.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().unwrap_or("0").parse().ok()?;
        Some((major, minor))
    }

    match (parse(unity), parse(ours)) {
        (Some((0, unity_minor)), Some((ours_major, ours_minor))) => {
            ours_major == 0 && unity_minor == ours_minor
        }
        (Some((unity_major, _)), Some((ours_major, _))) => unity_major == ours_major,
        _ => false,
    }
}

fn capabilities() -> UnityRlCapabilitiesProto {
    UnityRlCapabilitiesProto {
        base_rl_capabilities: true,
        concatenated_png_observations: true,
        compressed_channel_mapping: true,
        hybrid_actions: true,
        training_analytics: true,
        variable_length_observation: true,
        multi_agent_groups: true,
    }
}

/// Waits for the simulator's next message, giving up if the player process
/// dies first or, when given, the timeout elapses.
async fn await_simulator(
    communicator: &mut Communicator,
    process: Option<&mut SimulatorProcess>,
    timeout: Option<Duration>,
) -> Result<UnityMessageProto> {
    let receive = async move {
        match process {
            Some(process) => tokio::select! {
                message = communicator.receive() => message,
                status = process.wait() => match status {
                    Ok(status) => Err(LaunchFailure::ProcessExited { status }.into()),
                    Err(err) => Err(EnvError::Io(err)),
                },
            },
            None => communicator.receive().await,
        }
    };

    match timeout {
        Some(limit) => tokio::time::timeout(limit, receive)
            .await
            .map_err(|_| LaunchFailure::HandshakeTimeout { timeout: limit })?,
        None => receive.await,
    }
}

/// A player that dies after the handshake is a broken session, not a failed launch.
fn session_error(err: EnvError) -> EnvError {
    match err {
        EnvError::Launch(LaunchFailure::ProcessExited { status }) => {
            EnvError::protocol(format!("simulator exited mid-episode ({})", status))
        }
        other => other,
    }
}

/// One connected simulator, with every behavior and agent it reports.
pub struct UnityEnvironment {
    communicator: Communicator,
    process: Option<SimulatorProcess>,
    worker: Option<WorkerLease>,
    worker_id: u16,
    side_channels: SideChannelManager,
    transcript: Option<TranscriptFile>,
    academy: AcademyInfo,
    behavior_specs: BTreeMap<String, BehaviorSpec>,
    env_state: HashMap<String, BehaviorSteps>,
    env_actions: HashMap<String, ActionTuple>,
    is_first_message: bool,
    closed: bool,
}

impl UnityEnvironment {
    /// Binds the worker's port, starts the player and completes the handshake.
    /// On failure the player is killed and reaped before the error is returned.
    pub async fn launch(spec: LaunchSpec, channels: Vec<Box<dyn SideChannel>>) -> Result<Self> {
        let LaunchSpec {
            executable,
            worker,
            base_port,
            seed,
            timeout_wait,
            no_graphics,
            log_folder,
            additional_args,
            transcript,
        } = spec;

        let worker_id = worker.id();
        let port = worker_port(base_port, worker_id)?;
        let side_channels = SideChannelManager::new(channels)?;
        let communicator = Communicator::bind(port).await?;

        let process = match executable {
            Some(path) => {
                let args = PlayerArgs {
                    port,
                    no_graphics,
                    log_file: log_folder
                        .map(|folder| folder.join(format!("Player-{}.log", worker_id))),
                    additional: additional_args,
                };
                Some(SimulatorProcess::spawn(&path, &args)?)
            }
            None => {
                info!(
                    "listening on port {}; start the player or press Play in the Unity editor",
                    port
                );
                None
            }
        };

        let mut env = Self {
            communicator,
            process,
            worker: Some(worker),
            worker_id,
            side_channels,
            transcript,
            academy: AcademyInfo::default(),
            behavior_specs: BTreeMap::new(),
            env_state: HashMap::new(),
            env_actions: HashMap::new(),
            is_first_message: true,
            closed: false,
        };

        match env.handshake(seed, timeout_wait).await {
            Ok(()) => Ok(env),
            Err(err) => {
                warn!("worker {} failed to start: {}", worker_id, err);
                env.abort().await;
                Err(err)
            }
        }
    }

    async fn handshake(&mut self, seed: i32, timeout: Duration) -> Result<()> {
        let first =
            await_simulator(&mut self.communicator, self.process.as_mut(), Some(timeout)).await?;
        self.record(&first)?;

        let output = first
            .unity_output
            .ok_or_else(|| EnvError::protocol("first message carried no output"))?;
        let init = output
            .rl_initialization_output
            .clone()
            .ok_or_else(|| EnvError::protocol("first message carried no initialization output"))?;

        if !communication_compatible(&init.communication_version, COMMUNICATION_API_VERSION) {
            return Err(LaunchFailure::Incompatible {
                unity_version: init.communication_version,
                expected: COMMUNICATION_API_VERSION.to_string(),
            }
            .into());
        }
        if init.communication_version != COMMUNICATION_API_VERSION {
            warn!(
                "simulator speaks communication version {}, trainer speaks {}",
                init.communication_version, COMMUNICATION_API_VERSION
            );
        }

        let reply = wrap_input(UnityInputProto {
            rl_input: None,
            rl_initialization_input: Some(UnityRlInitializationInputProto {
                seed,
                communication_version: COMMUNICATION_API_VERSION.to_string(),
                package_version: PACKAGE_VERSION.to_string(),
                capabilities: Some(capabilities()),
                num_areas: 1,
            }),
        });
        self.record(&reply)?;
        self.communicator.respond(reply)?;

        // The player follows up immediately; that call stays open for the first reset.
        let follow_up =
            await_simulator(&mut self.communicator, self.process.as_mut(), Some(timeout)).await?;
        self.record(&follow_up)?;

        self.update_behavior_specs(&output)?;
        self.academy = AcademyInfo {
            name: init.name,
            communication_version: init.communication_version,
            package_version: init.package_version,
        };
        info!(
            "connected to {} on worker {} (communication {}, package {})",
            self.academy.name,
            self.worker_id,
            self.academy.communication_version,
            self.academy.package_version
        );
        Ok(())
    }

    fn record(&mut self, message: &UnityMessageProto) -> Result<()> {
        if let Some(transcript) = self.transcript.as_mut() {
            transcript.record(message)?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(EnvError::ClosedHandle);
        }
        Ok(())
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    pub fn port(&self) -> u16 {
        self.communicator.port()
    }

    pub fn academy(&self) -> &AcademyInfo {
        &self.academy
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn behavior_specs(&self) -> &BTreeMap<String, BehaviorSpec> {
        &self.behavior_specs
    }

    pub fn get_steps(&self, behavior_name: &str) -> Result<&BehaviorSteps> {
        self.ensure_open()?;
        self.env_state.get(behavior_name).ok_or_else(|| {
            EnvError::invalid_action(format!("no behavior named '{}'", behavior_name))
        })
    }

    pub fn set_actions(&mut self, behavior_name: &str, action: ActionTuple) -> Result<()> {
        self.ensure_open()?;
        let spec = self.behavior_specs.get(behavior_name).ok_or_else(|| {
            EnvError::invalid_action(format!("no behavior named '{}'", behavior_name))
        })?;
        let n_agents = self
            .env_state
            .get(behavior_name)
            .map(|steps| steps.decision.len())
            .unwrap_or(0);
        spec.action_spec.validate(&action, n_agents)?;
        self.env_actions.insert(behavior_name.to_string(), action);
        Ok(())
    }

    pub async fn reset(&mut self) -> Result<()> {
        self.ensure_open()?;
        let input = UnityRlInputProto {
            command: CommandProto::Reset as i32,
            side_channel: self.side_channels.generate_side_channel_data(),
            ..Default::default()
        };
        let output = self.exchange(input).await?;
        self.update_behavior_specs(&output)?;
        self.update_state(output.rl_output.unwrap_or_default())?;
        self.is_first_message = false;
        self.env_actions.clear();
        Ok(())
    }

    /// Advances the simulation one decision; agents without actions get zeros.
    pub async fn step(&mut self) -> Result<()> {
        self.ensure_open()?;
        if self.is_first_message {
            return self.reset().await;
        }

        for (name, spec) in &self.behavior_specs {
            if !self.env_actions.contains_key(name) {
                let n_agents = self
                    .env_state
                    .get(name)
                    .map(|steps| steps.decision.len())
                    .unwrap_or(0);
                self.env_actions
                    .insert(name.clone(), spec.action_spec.empty_action(n_agents));
            }
        }

        let mut input = UnityRlInputProto {
            command: CommandProto::Step as i32,
            side_channel: self.side_channels.generate_side_channel_data(),
            ..Default::default()
        };
        for (name, actions) in &self.env_actions {
            let n_agents = self
                .env_state
                .get(name)
                .map(|steps| steps.decision.len())
                .unwrap_or(0);
            if n_agents == 0 {
                continue;
            }
            let value = actions
                .continuous
                .iter()
                .zip(&actions.discrete)
                .map(|(continuous, discrete)| AgentActionProto {
                    continuous_actions: continuous.clone(),
                    discrete_actions: discrete.clone(),
                    ..Default::default()
                })
                .collect();
            input
                .agent_actions
                .insert(name.clone(), ListAgentActionProto { value });
        }

        let output = self.exchange(input).await?;
        self.update_behavior_specs(&output)?;
        self.update_state(output.rl_output.unwrap_or_default())?;
        self.env_actions.clear();
        Ok(())
    }

    async fn exchange(&mut self, input: UnityRlInputProto) -> Result<UnityOutputProto> {
        let message = wrap_input(UnityInputProto {
            rl_input: Some(input),
            rl_initialization_input: None,
        });
        self.record(&message)?;
        self.communicator.respond(message)?;

        let reply = await_simulator(&mut self.communicator, self.process.as_mut(), None)
            .await
            .map_err(session_error)?;
        self.record(&reply)?;

        let status = header_status(&reply);
        if status != STATUS_OK {
            let detail = reply.header.map(|h| h.message).unwrap_or_default();
            return Err(EnvError::protocol(format!(
                "simulator stopped with status {} {}",
                status, detail
            )));
        }
        reply
            .unity_output
            .ok_or_else(|| EnvError::protocol("simulator reply carried no output"))
    }

    fn update_behavior_specs(&mut self, output: &UnityOutputProto) -> Result<()> {
        let Some(init) = &output.rl_initialization_output else {
            return Ok(());
        };
        for brain in &init.brain_parameters {
            let first_agent = output
                .rl_output
                .as_ref()
                .and_then(|rl| rl.agent_infos.get(&brain.brain_name))
                .and_then(|list| list.value.first());
            if let Some(agent) = first_agent {
                let spec = BehaviorSpec::from_proto(brain, agent)?;
                info!(
                    "behavior {} connected: {} observation values, action spec {:?}",
                    brain.brain_name,
                    spec.observation_size(),
                    spec.action_spec
                );
                self.behavior_specs.insert(brain.brain_name.clone(), spec);
            }
        }
        Ok(())
    }

    fn update_state(&mut self, output: UnityRlOutputProto) -> Result<()> {
        self.side_channels
            .process_side_channel_data(&output.side_channel)?;

        self.env_state.clear();
        for name in self.behavior_specs.keys() {
            let steps = match output.agent_infos.get(name) {
                Some(list) => BehaviorSteps::from_proto(&list.value)?,
                None => BehaviorSteps::default(),
            };
            self.env_state.insert(name.clone(), steps);
        }
        Ok(())
    }

    /// Sends the quit status, waits for the player to exit and frees the worker id.
    pub async fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.closed = true;
        self.communicator.close().await;
        if let Some(process) = self.process.as_mut() {
            process.shutdown(CLOSE_GRACE).await;
        }
        self.worker.take();
        info!("worker {} closed", self.worker_id);
        Ok(())
    }

    async fn abort(&mut self) {
        self.closed = true;
        if let Some(process) = self.process.as_mut() {
            process.kill().await;
        }
        self.communicator.close().await;
        self.worker.take();
    }
}
