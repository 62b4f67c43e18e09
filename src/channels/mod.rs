//! Side channels: byte-level configuration messages piggybacked on every
//! trainer input and simulator output.
//!
//! A side-channel blob is a sequence of frames, each laid out as
//!
//! ```text
//! [16 bytes channel uuid, little-endian layout][i32 LE length][payload]
//! ```

mod builder;
mod engine;
mod params;

pub use builder::{ScenarioPayloads, build_payloads, parameter_values};
pub use engine::{ConfigurationType, ENGINE_CHANNEL_ID, EngineConfigurationChannel};
pub use params::{ENVIRONMENT_PARAMETERS_CHANNEL_ID, EnvironmentDataType, EnvironmentParametersChannel};

use prost::bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{EnvError, Result};

const FRAME_HEADER_LEN: usize = 16 + 4;

pub trait SideChannel: Send {
    fn channel_id(&self) -> Uuid;

    /// Called for every frame the simulator addressed to this channel.
    fn on_message_received(&mut self, message: IncomingMessage);

    /// Hands over queued payloads; the queue is empty afterwards.
    fn drain_queue(&mut self) -> Vec<Vec<u8>>;
}

#[derive(Debug, Default)]
pub struct OutgoingMessage {
    buffer: BytesMut,
}

impl OutgoingMessage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buffer.put_u8(value as u8);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buffer.put_i32_le(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buffer.put_f32_le(value);
    }

    /// Strings go out as an i32 length followed by ASCII bytes.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        if !value.is_ascii() {
            return Err(EnvError::configuration(format!(
                "side channel strings must be ASCII, got '{}'",
                value
            )));
        }
        let len = i32::try_from(value.len())
            .map_err(|_| EnvError::configuration("side channel string too long"))?;
        self.write_i32(len);
        self.buffer.put_slice(value.as_bytes());
        Ok(())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    buffer: Bytes,
}

impl IncomingMessage {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self {
            buffer: data.into(),
        }
    }

    fn ensure(&self, needed: usize) -> Result<()> {
        if self.buffer.remaining() < needed {
            return Err(EnvError::protocol(format!(
                "side channel message ended early: needed {} bytes, {} left",
                needed,
                self.buffer.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        self.ensure(1)?;
        Ok(self.buffer.get_u8() != 0)
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        Ok(self.buffer.get_i32_le())
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        self.ensure(4)?;
        Ok(self.buffer.get_f32_le())
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| EnvError::protocol(format!("negative string length {}", len)))?;
        self.ensure(len)?;
        let bytes = self.buffer.split_to(len);
        String::from_utf8(bytes.to_vec())
            .map_err(|_| EnvError::protocol("side channel string is not valid text"))
    }

    pub fn remaining(&self) -> usize {
        self.buffer.remaining()
    }
}

/// Owns the side channels of one environment and converts between them and
/// the raw `side_channel` bytes of the protocol messages.
pub struct SideChannelManager {
    channels: Vec<Box<dyn SideChannel>>,
}

impl SideChannelManager {
    pub fn new(channels: Vec<Box<dyn SideChannel>>) -> Result<Self> {
        for (index, channel) in channels.iter().enumerate() {
            let id = channel.channel_id();
            if channels[..index].iter().any(|other| other.channel_id() == id) {
                return Err(EnvError::configuration(format!(
                    "two side channels share the id {}",
                    id
                )));
            }
        }
        Ok(Self { channels })
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Frames every queued message of every channel, in registration order.
    pub fn generate_side_channel_data(&mut self) -> Vec<u8> {
        let mut result = BytesMut::new();
        for channel in &mut self.channels {
            let id = channel.channel_id();
            for message in channel.drain_queue() {
                result.put_slice(&id.to_bytes_le());
                result.put_i32_le(message.len() as i32);
                result.put_slice(&message);
                debug!("queued {} side channel bytes for {}", message.len(), id);
            }
        }
        result.to_vec()
    }

    /// Splits a blob from the simulator into frames and dispatches them.
    pub fn process_side_channel_data(&mut self, data: &[u8]) -> Result<()> {
        let mut data = Bytes::copy_from_slice(data);
        while data.has_remaining() {
            if data.remaining() < FRAME_HEADER_LEN {
                return Err(EnvError::protocol(format!(
                    "side channel frame header truncated ({} bytes left)",
                    data.remaining()
                )));
            }
            let mut id = [0u8; 16];
            data.copy_to_slice(&mut id);
            let id = Uuid::from_bytes_le(id);
            let len = data.get_i32_le();
            let len = usize::try_from(len)
                .map_err(|_| EnvError::protocol(format!("negative frame length {}", len)))?;
            if data.remaining() < len {
                return Err(EnvError::protocol(format!(
                    "side channel {} announced {} bytes but only {} arrived",
                    id,
                    len,
                    data.remaining()
                )));
            }
            let payload = data.split_to(len);

            match self.channels.iter_mut().find(|c| c.channel_id() == id) {
                Some(channel) => channel.on_message_received(IncomingMessage::new(payload)),
                None => warn!("ignoring side channel message for unregistered channel {}", id),
            }
        }
        Ok(())
    }
}
