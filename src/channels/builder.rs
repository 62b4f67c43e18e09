use super::{EngineConfigurationChannel, EnvironmentParametersChannel, SideChannel};
use crate::error::Result;
use crate::scenario::{EnvironmentParameters, ScenarioConfig};

/// The two configuration payloads of a scenario, queued and ready to be
/// flushed with the first trainer input.
#[derive(Debug)]
pub struct ScenarioPayloads {
    pub engine: EngineConfigurationChannel,
    pub parameters: EnvironmentParametersChannel,
}

impl ScenarioPayloads {
    pub fn into_channels(self) -> Vec<Box<dyn SideChannel>> {
        vec![Box::new(self.engine), Box::new(self.parameters)]
    }
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

/// Key/value pairs in the order the scene expects them.
pub fn parameter_values(params: &EnvironmentParameters) -> [(&'static str, f32); 7] {
    [
        ("target_x", params.target.x),
        ("target_y", params.target.y),
        ("target_z", params.target.z),
        ("waterEnabled", flag(params.water_enabled)),
        ("fastRestart", flag(params.fast_restart)),
        ("distancePlanesN", params.distance_planes as f32),
        ("safeTraining", flag(params.safe_training)),
    ]
}

pub fn build_payloads(config: &ScenarioConfig) -> Result<ScenarioPayloads> {
    let mut engine = EngineConfigurationChannel::new();
    engine.set_configuration(&config.engine)?;

    config.parameters.validate()?;
    let mut parameters = EnvironmentParametersChannel::new();
    for (key, value) in parameter_values(&config.parameters) {
        parameters.set_float_parameter(key, value)?;
    }

    Ok(ScenarioPayloads { engine, parameters })
}
