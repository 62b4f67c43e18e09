use tracing::warn;
use uuid::Uuid;

use super::{IncomingMessage, OutgoingMessage, SideChannel};
use crate::error::Result;
use crate::scenario::EngineConfig;

pub const ENGINE_CHANNEL_ID: Uuid = Uuid::from_u128(0xe951342c_4f7e_11ea_b238_784f4387d1f7);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ConfigurationType {
    ScreenResolution = 0,
    QualityLevel = 1,
    TimeScale = 2,
    TargetFrameRate = 3,
    CaptureFrameRate = 4,
}

impl ConfigurationType {
    pub fn from_i32(value: i32) -> Option<Self> {
        match value {
            0 => Some(ConfigurationType::ScreenResolution),
            1 => Some(ConfigurationType::QualityLevel),
            2 => Some(ConfigurationType::TimeScale),
            3 => Some(ConfigurationType::TargetFrameRate),
            4 => Some(ConfigurationType::CaptureFrameRate),
            _ => None,
        }
    }
}

/// Rendering and timing settings for the player, one message per setting.
#[derive(Debug, Default)]
pub struct EngineConfigurationChannel {
    queue: Vec<Vec<u8>>,
}

impl EngineConfigurationChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_configuration(&mut self, config: &EngineConfig) -> Result<()> {
        config.validate()?;

        let mut msg = OutgoingMessage::new();
        msg.write_i32(ConfigurationType::ScreenResolution as i32);
        msg.write_i32(config.width);
        msg.write_i32(config.height);
        self.queue.push(msg.into_bytes());

        let mut msg = OutgoingMessage::new();
        msg.write_i32(ConfigurationType::QualityLevel as i32);
        msg.write_i32(config.quality_level);
        self.queue.push(msg.into_bytes());

        let mut msg = OutgoingMessage::new();
        msg.write_i32(ConfigurationType::TimeScale as i32);
        msg.write_f32(config.time_scale);
        self.queue.push(msg.into_bytes());

        if let Some(rate) = config.target_frame_rate {
            let mut msg = OutgoingMessage::new();
            msg.write_i32(ConfigurationType::TargetFrameRate as i32);
            msg.write_i32(rate.wire_value());
            self.queue.push(msg.into_bytes());
        }

        let mut msg = OutgoingMessage::new();
        msg.write_i32(ConfigurationType::CaptureFrameRate as i32);
        msg.write_i32(config.capture_frame_rate);
        self.queue.push(msg.into_bytes());

        Ok(())
    }

    pub fn queued(&self) -> &[Vec<u8>] {
        &self.queue
    }
}

impl SideChannel for EngineConfigurationChannel {
    fn channel_id(&self) -> Uuid {
        ENGINE_CHANNEL_ID
    }

    fn on_message_received(&mut self, message: IncomingMessage) {
        warn!(
            "engine configuration channel received {} unexpected bytes",
            message.remaining()
        );
    }

    fn drain_queue(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.queue)
    }
}
