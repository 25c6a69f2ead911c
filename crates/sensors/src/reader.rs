use std::fmt;

/// Highest analog input index on a four-channel ADC.
pub const MAX_CHANNEL: u8 = 3;

/// A validated analog input index (`0..=MAX_CHANNEL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(u8);

impl Channel {
    pub fn new(index: u8) -> Result<Self, HardwareIoError> {
        if index > MAX_CHANNEL {
            return Err(HardwareIoError::InvalidChannel(index));
        }
        Ok(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AIN{}", self.0)
    }
}

/// Failure talking to the converter. Treated as transient by callers.
#[derive(Debug, thiserror::Error)]
pub enum HardwareIoError {
    #[error("channel {0} out of range (0-{MAX_CHANNEL})")]
    InvalidChannel(u8),

    #[error("i2c error on {channel}: {message}")]
    Bus { channel: Channel, message: String },

    #[error("adc unavailable: {0}")]
    Unavailable(String),
}

/// A single analog-to-digital read of one physical channel.
///
/// Implementations perform no retries; a failed read is reported as-is and
/// the caller decides how to back off.
pub trait ChannelReader: Send {
    fn read(&mut self, channel: Channel) -> Result<i32, HardwareIoError>;
}

impl<R: ChannelReader + ?Sized> ChannelReader for Box<R> {
    fn read(&mut self, channel: Channel) -> Result<i32, HardwareIoError> {
        (**self).read(channel)
    }
}
