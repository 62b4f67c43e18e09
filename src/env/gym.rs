use tracing::{debug, warn};

use super::spaces::{Action, ActionFlattener, Space};
use super::spec::{ActionSpec, ActionTuple, AgentStep};
use super::unity::UnityEnvironment;
use super::{Environment, Observation, StepInfo, StepResult};
use crate::error::{EnvError, Result};

/// Exposes a simulator with one behavior and one agent through the
/// [`Environment`] contract.
pub struct UnityGymEnv {
    env: UnityEnvironment,
    behavior_name: String,
    action_spec: ActionSpec,
    action_space: Space,
    observation_space: Space,
    flattener: Option<ActionFlattener>,
    game_over: bool,
    episode_steps: usize,
}

impl UnityGymEnv {
    /// Resets `env` to learn its behavior, then derives both spaces.
    /// When `flatten_branched` is set a multi-branch discrete action space
    /// becomes one discrete space over every branch combination.
    ///
    /// The simulator is closed if it does not fit the single-agent contract.
    pub async fn new(mut env: UnityEnvironment, flatten_branched: bool) -> Result<Self> {
        match Self::inspect(&mut env, flatten_branched).await {
            Ok((behavior_name, action_spec, action_space, observation_space, flattener)) => {
                Ok(Self {
                    env,
                    behavior_name,
                    action_spec,
                    action_space,
                    observation_space,
                    flattener,
                    game_over: false,
                    episode_steps: 0,
                })
            }
            Err(err) => {
                if let Err(close_err) = env.close().await {
                    warn!("could not close rejected environment: {}", close_err);
                }
                Err(err)
            }
        }
    }

    async fn inspect(
        env: &mut UnityEnvironment,
        flatten_branched: bool,
    ) -> Result<(String, ActionSpec, Space, Space, Option<ActionFlattener>)> {
        env.reset().await?;

        let specs = env.behavior_specs();
        if specs.len() != 1 {
            return Err(EnvError::protocol(format!(
                "expected exactly one behavior, simulator reports {}",
                specs.len()
            )));
        }
        let Some((behavior_name, spec)) = specs.iter().next() else {
            return Err(EnvError::protocol("simulator reports no behavior"));
        };
        let behavior_name = behavior_name.clone();
        let spec = spec.clone();

        check_agents(env.get_steps(&behavior_name)?.decision.len())?;

        let action_spec = spec.action_spec;
        let (action_space, flattener) = if action_spec.is_discrete() {
            let branches = action_spec.discrete_branches.clone();
            if branches.len() == 1 {
                (Space::Discrete { n: branches[0] }, None)
            } else if flatten_branched {
                let flattener = ActionFlattener::new(branches)?;
                (flattener.action_space(), Some(flattener))
            } else {
                (Space::MultiDiscrete { nvec: branches }, None)
            }
        } else if action_spec.is_continuous() {
            if flatten_branched {
                warn!("flatten_branched has no effect on a continuous action space");
            }
            (
                Space::Continuous {
                    low: -1.0,
                    high: 1.0,
                    shape: vec![action_spec.continuous_size],
                },
                None,
            )
        } else {
            return Err(EnvError::protocol(format!(
                "hybrid or empty action spaces are not supported: {:?}",
                action_spec
            )));
        };

        let observation_space = Space::vector(spec.observation_specs.iter().map(|o| o.size()).sum());
        debug!(
            "behavior {}: action space {:?}, observation space {:?}",
            behavior_name, action_space, observation_space
        );
        Ok((
            behavior_name,
            action_spec,
            action_space,
            observation_space,
            flattener,
        ))
    }

    pub fn behavior_name(&self) -> &str {
        &self.behavior_name
    }

    pub fn worker_id(&self) -> u16 {
        self.env.worker_id()
    }

    pub fn is_closed(&self) -> bool {
        self.env.is_closed()
    }

    pub fn unwrapped(&self) -> &UnityEnvironment {
        &self.env
    }

    fn to_action_tuple(&self, action: &Action) -> Result<ActionTuple> {
        if !self.action_space.contains(action) {
            return Err(EnvError::invalid_action(format!(
                "{:?} is not in {:?}",
                action, self.action_space
            )));
        }
        let tuple = match (action, &self.flattener) {
            (Action::Discrete(index), Some(flattener)) => {
                ActionTuple::single_discrete(flattener.lookup(*index)?)
            }
            (Action::Discrete(index), None) => ActionTuple::single_discrete(vec![*index as i32]),
            (Action::MultiDiscrete(values), _) => {
                ActionTuple::single_discrete(values.iter().map(|v| *v as i32).collect())
            }
            (Action::Continuous(values), _) => ActionTuple::single_continuous(values.clone()),
        };
        self.action_spec.validate(&tuple, 1)?;
        Ok(tuple)
    }

    fn single_step(&self, agent: &AgentStep, done: bool) -> StepResult {
        StepResult {
            observation: agent.flat_observation(),
            reward: agent.reward,
            done,
            info: StepInfo {
                steps: self.episode_steps,
                interrupted: agent.interrupted,
                agent_id: agent.agent_id,
            },
        }
    }
}

fn check_agents(n_agents: usize) -> Result<()> {
    if n_agents != 1 {
        return Err(EnvError::protocol(format!(
            "expected exactly one agent, simulator reports {}",
            n_agents
        )));
    }
    Ok(())
}

impl Environment for UnityGymEnv {
    fn observation_space(&self) -> &Space {
        &self.observation_space
    }

    fn action_space(&self) -> &Space {
        &self.action_space
    }

    async fn reset(&mut self) -> Result<Observation> {
        self.env.reset().await?;
        let steps = self.env.get_steps(&self.behavior_name)?;
        check_agents(steps.decision.len())?;
        let observation = steps.decision[0].flat_observation();
        self.game_over = false;
        self.episode_steps = 0;
        Ok(observation)
    }

    async fn step(&mut self, action: &Action) -> Result<StepResult> {
        if self.env.is_closed() {
            return Err(EnvError::ClosedHandle);
        }
        if self.game_over {
            return Err(EnvError::EpisodeFinished);
        }

        let tuple = self.to_action_tuple(action)?;
        self.env.set_actions(&self.behavior_name, tuple)?;
        self.env.step().await?;
        self.episode_steps += 1;

        let steps = self.env.get_steps(&self.behavior_name)?;
        check_agents(steps.decision.len().max(steps.terminal.len()))?;
        let result = match steps.terminal.first() {
            Some(agent) => self.single_step(agent, true),
            None => self.single_step(&steps.decision[0], false),
        };
        if result.done {
            self.game_over = true;
            debug!(
                "episode finished after {} steps (interrupted: {})",
                result.info.steps, result.info.interrupted
            );
        }
        Ok(result)
    }

    async fn close(&mut self) -> Result<()> {
        self.env.close().await
    }
}
