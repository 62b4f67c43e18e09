use tracing::warn;
use uuid::Uuid;

use super::{IncomingMessage, OutgoingMessage, SideChannel};
use crate::error::{EnvError, Result};

pub const ENVIRONMENT_PARAMETERS_CHANNEL_ID: Uuid =
    Uuid::from_u128(0x534c891e_810f_11ea_a9d0_822485860400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum EnvironmentDataType {
    Float = 0,
}

/// Named float parameters the scene reads through `Academy.EnvironmentParameters`.
#[derive(Debug, Default)]
pub struct EnvironmentParametersChannel {
    queue: Vec<Vec<u8>>,
}

impl EnvironmentParametersChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_float_parameter(&mut self, key: &str, value: f32) -> Result<()> {
        if !value.is_finite() {
            return Err(EnvError::configuration(format!(
                "parameter '{}' must be finite, got {}",
                key, value
            )));
        }
        let mut msg = OutgoingMessage::new();
        msg.write_string(key)?;
        msg.write_i32(EnvironmentDataType::Float as i32);
        msg.write_f32(value);
        self.queue.push(msg.into_bytes());
        Ok(())
    }

    pub fn queued(&self) -> &[Vec<u8>] {
        &self.queue
    }
}

impl SideChannel for EnvironmentParametersChannel {
    fn channel_id(&self) -> Uuid {
        ENVIRONMENT_PARAMETERS_CHANNEL_ID
    }

    fn on_message_received(&mut self, message: IncomingMessage) {
        warn!(
            "environment parameters channel received {} unexpected bytes",
            message.remaining()
        );
    }

    fn drain_queue(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.queue)
    }
}
