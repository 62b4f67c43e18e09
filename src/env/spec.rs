use crate::communicator_objects::observation_proto::ObservationData;
use crate::communicator_objects::{
    AgentInfoProto, BrainParametersProto, CompressionTypeProto, ObservationProto,
    ObservationTypeProto,
};
use crate::error::{EnvError, Result};

fn non_negative(value: i32, what: &str) -> Result<usize> {
    usize::try_from(value).map_err(|_| EnvError::protocol(format!("negative {}: {}", what, value)))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSpec {
    pub continuous_size: usize,
    pub discrete_branches: Vec<usize>,
}

impl ActionSpec {
    pub fn discrete(branches: Vec<usize>) -> Self {
        Self {
            continuous_size: 0,
            discrete_branches: branches,
        }
    }

    pub fn continuous(size: usize) -> Self {
        Self {
            continuous_size: size,
            discrete_branches: Vec::new(),
        }
    }

    pub fn is_discrete(&self) -> bool {
        !self.discrete_branches.is_empty() && self.continuous_size == 0
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous_size > 0 && self.discrete_branches.is_empty()
    }

    pub fn discrete_size(&self) -> usize {
        self.discrete_branches.len()
    }

    /// All-zero actions for `n_agents` agents.
    pub fn empty_action(&self, n_agents: usize) -> ActionTuple {
        ActionTuple {
            continuous: vec![vec![0.0; self.continuous_size]; n_agents],
            discrete: vec![vec![0; self.discrete_branches.len()]; n_agents],
        }
    }

    pub fn validate(&self, action: &ActionTuple, n_agents: usize) -> Result<()> {
        if action.continuous.len() != n_agents || action.discrete.len() != n_agents {
            return Err(EnvError::invalid_action(format!(
                "expected actions for {} agents, got {} continuous and {} discrete rows",
                n_agents,
                action.continuous.len(),
                action.discrete.len()
            )));
        }
        for row in &action.continuous {
            if row.len() != self.continuous_size {
                return Err(EnvError::invalid_action(format!(
                    "expected {} continuous values, got {}",
                    self.continuous_size,
                    row.len()
                )));
            }
        }
        for row in &action.discrete {
            if row.len() != self.discrete_branches.len() {
                return Err(EnvError::invalid_action(format!(
                    "expected {} discrete branches, got {}",
                    self.discrete_branches.len(),
                    row.len()
                )));
            }
            for (value, &branch) in row.iter().zip(&self.discrete_branches) {
                if *value < 0 || *value as usize >= branch {
                    return Err(EnvError::invalid_action(format!(
                        "discrete action {} outside branch of size {}",
                        value, branch
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-agent actions; row `i` belongs to the `i`-th agent of the last
/// decision steps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionTuple {
    pub continuous: Vec<Vec<f32>>,
    pub discrete: Vec<Vec<i32>>,
}

impl ActionTuple {
    pub fn single_discrete(values: Vec<i32>) -> Self {
        Self {
            continuous: vec![Vec::new()],
            discrete: vec![values],
        }
    }

    pub fn single_continuous(values: Vec<f32>) -> Self {
        Self {
            continuous: vec![values],
            discrete: vec![Vec::new()],
        }
    }

    pub fn len(&self) -> usize {
        self.continuous.len().max(self.discrete.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub goal_signal: bool,
}

impl ObservationSpec {
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    fn from_proto(proto: &ObservationProto) -> Result<Self> {
        let shape = proto
            .shape
            .iter()
            .map(|&dim| non_negative(dim, "observation dimension"))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            name: proto.name.clone(),
            shape,
            goal_signal: proto.observation_type == ObservationTypeProto::GoalSignal as i32,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BehaviorSpec {
    pub observation_specs: Vec<ObservationSpec>,
    pub action_spec: ActionSpec,
}

impl BehaviorSpec {
    /// Action layout comes from the brain parameters, observation shapes
    /// from the first agent reporting under that behavior.
    pub fn from_proto(brain: &BrainParametersProto, agent: &AgentInfoProto) -> Result<Self> {
        let proto = brain.action_spec.as_ref().ok_or_else(|| {
            EnvError::protocol(format!("behavior {} has no action spec", brain.brain_name))
        })?;
        let discrete_branches = proto
            .discrete_branch_sizes
            .iter()
            .map(|&size| non_negative(size, "branch size"))
            .collect::<Result<Vec<_>>>()?;
        let action_spec = ActionSpec {
            continuous_size: non_negative(proto.num_continuous_actions, "continuous size")?,
            discrete_branches,
        };
        let observation_specs = agent
            .observations
            .iter()
            .map(ObservationSpec::from_proto)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            observation_specs,
            action_spec,
        })
    }

    pub fn observation_size(&self) -> usize {
        self.observation_specs.iter().map(ObservationSpec::size).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AgentStep {
    pub agent_id: i32,
    /// One flat buffer per sensor, in sensor order.
    pub observations: Vec<Vec<f32>>,
    pub reward: f32,
    pub group_id: i32,
    pub group_reward: f32,
    /// Terminal only: the episode hit its step limit rather than failing or succeeding.
    pub interrupted: bool,
    pub action_mask: Vec<bool>,
}

impl AgentStep {
    fn from_proto(info: &AgentInfoProto) -> Result<Self> {
        let observations = info
            .observations
            .iter()
            .map(decode_observation)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            agent_id: info.id,
            observations,
            reward: info.reward,
            group_id: info.group_id,
            group_reward: info.group_reward,
            interrupted: info.done && info.max_step_reached,
            action_mask: info.action_mask.clone(),
        })
    }

    pub fn flat_observation(&self) -> Vec<f32> {
        self.observations.concat()
    }
}

fn decode_observation(proto: &ObservationProto) -> Result<Vec<f32>> {
    if proto.compression_type == CompressionTypeProto::Png as i32 {
        return Err(EnvError::protocol(format!(
            "observation '{}' is PNG-compressed, which is not supported",
            proto.name
        )));
    }
    let data = match &proto.observation_data {
        Some(ObservationData::FloatData(data)) => data.data.clone(),
        Some(ObservationData::CompressedData(_)) => {
            return Err(EnvError::protocol(format!(
                "observation '{}' carries compressed data, which is not supported",
                proto.name
            )));
        }
        None => Vec::new(),
    };

    let expected: usize = proto
        .shape
        .iter()
        .map(|&dim| non_negative(dim, "observation dimension"))
        .product::<Result<usize>>()?;
    if data.len() != expected {
        return Err(EnvError::protocol(format!(
            "observation '{}' has {} values but shape {:?}",
            proto.name,
            data.len(),
            proto.shape
        )));
    }
    Ok(data)
}

/// Agents of one behavior that need a decision, and agents whose episode ended.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BehaviorSteps {
    pub decision: Vec<AgentStep>,
    pub terminal: Vec<AgentStep>,
}

impl BehaviorSteps {
    pub fn from_proto(infos: &[AgentInfoProto]) -> Result<Self> {
        let mut steps = BehaviorSteps::default();
        for info in infos {
            let step = AgentStep::from_proto(info)?;
            if info.done {
                steps.terminal.push(step);
            } else {
                steps.decision.push(step);
            }
        }
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communicator_objects::ActionSpecProto;
    use crate::communicator_objects::observation_proto::FloatData;

    fn vector_obs(values: Vec<f32>) -> ObservationProto {
        ObservationProto {
            shape: vec![values.len() as i32],
            observation_data: Some(ObservationData::FloatData(FloatData { data: values })),
            name: "VectorSensor".to_string(),
            ..Default::default()
        }
    }

    fn agent(id: i32, done: bool, max_step: bool) -> AgentInfoProto {
        AgentInfoProto {
            id,
            done,
            max_step_reached: max_step,
            reward: 0.5,
            observations: vec![vector_obs(vec![1.0, 2.0]), vector_obs(vec![3.0])],
            ..Default::default()
        }
    }

    #[test]
    fn test_behavior_spec_from_proto() {
        let brain = BrainParametersProto {
            brain_name: "SafeRLAUV?team=0".to_string(),
            is_training: true,
            action_spec: Some(ActionSpecProto {
                num_continuous_actions: 0,
                num_discrete_actions: 2,
                discrete_branch_sizes: vec![3, 2],
                action_descriptions: Vec::new(),
            }),
        };
        let spec = BehaviorSpec::from_proto(&brain, &agent(0, false, false)).unwrap();
        assert!(spec.action_spec.is_discrete());
        assert_eq!(spec.action_spec.discrete_branches, vec![3, 2]);
        assert_eq!(spec.observation_size(), 3);
    }

    #[test]
    fn test_steps_split_decision_and_terminal() {
        let steps =
            BehaviorSteps::from_proto(&[agent(1, false, false), agent(2, true, true)]).unwrap();
        assert_eq!(steps.decision.len(), 1);
        assert_eq!(steps.terminal.len(), 1);
        assert!(steps.terminal[0].interrupted);
        assert_eq!(steps.decision[0].flat_observation(), vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let mut info = agent(1, false, false);
        info.observations[0].shape = vec![4];
        assert!(matches!(
            BehaviorSteps::from_proto(&[info]),
            Err(EnvError::Protocol { .. })
        ));
    }

    #[test]
    fn test_png_observation_rejected() {
        let mut info = agent(1, false, false);
        info.observations[0].compression_type = CompressionTypeProto::Png as i32;
        assert!(BehaviorSteps::from_proto(&[info]).is_err());
    }

    #[test]
    fn test_action_validation() {
        let spec = ActionSpec::discrete(vec![3, 2]);
        assert!(spec.validate(&ActionTuple::single_discrete(vec![2, 1]), 1).is_ok());
        assert!(spec.validate(&ActionTuple::single_discrete(vec![3, 0]), 1).is_err());
        assert!(spec.validate(&ActionTuple::single_discrete(vec![0]), 1).is_err());
        assert!(spec.validate(&spec.empty_action(2), 1).is_err());
        assert!(spec.validate(&spec.empty_action(2), 2).is_ok());
    }
}
