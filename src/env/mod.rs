//! Environment handles: the raw multi-behavior simulator binding and the
//! single-agent gym-style contract layered on top of it.

mod gym;
mod spaces;
mod spec;
mod unity;

pub use gym::UnityGymEnv;
pub use spaces::{Action, ActionFlattener, Space};
pub use spec::{ActionSpec, ActionTuple, AgentStep, BehaviorSpec, BehaviorSteps, ObservationSpec};
pub use unity::{
    AcademyInfo, COMMUNICATION_API_VERSION, LaunchSpec, PACKAGE_VERSION, UnityEnvironment,
    communication_compatible,
};

use crate::error::Result;

/// Flat observation vector
pub type Observation = Vec<f32>;

/// Step result from the environment
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Next observation
    pub observation: Observation,
    /// Reward for the step just taken
    pub reward: f32,
    /// Episode done
    pub done: bool,
    /// Additional info
    pub info: StepInfo,
}

/// Additional information from a step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepInfo {
    /// Steps taken this episode
    pub steps: usize,
    /// Episode ended on the simulator's step limit
    pub interrupted: bool,
    /// Simulator-side agent id
    pub agent_id: i32,
}

/// Single-agent environment contract consumed by a training driver.
#[allow(async_fn_in_trait)]
pub trait Environment {
    fn observation_space(&self) -> &Space;

    fn action_space(&self) -> &Space;

    async fn reset(&mut self) -> Result<Observation>;

    async fn step(&mut self, action: &Action) -> Result<StepResult>;

    /// Terminates the simulator. Every later call fails with a closed-handle error.
    async fn close(&mut self) -> Result<()>;
}
