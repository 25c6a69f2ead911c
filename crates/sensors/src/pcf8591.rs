//! PCF8591 8-bit ADC over I2C.
//!
//! The converter returns the result of the *previous* conversion on every
//! read, so each channel read is one control-byte write followed by two
//! byte reads: the first is stale and discarded.

#[cfg(feature = "i2c")]
use rppal::i2c::I2c;

use crate::reader::Channel;
#[cfg(feature = "i2c")]
use crate::reader::{ChannelReader, HardwareIoError};

/// Factory address with A0-A2 tied low.
pub const DEFAULT_ADDRESS: u16 = 0x48;
/// I2C bus exposed on the Raspberry Pi 40-pin header.
pub const DEFAULT_BUS: u8 = 1;

/// Control register bit 6: analog output enable. Keeps the internal
/// oscillator running between reads.
const CONTROL_ANALOG_ENABLE: u8 = 0x40;
/// Control register bits 1-0: A/D channel number.
const CONTROL_CHANNEL_MASK: u8 = 0x03;

/// Build the control byte selecting single-ended input `channel`.
pub fn control_byte(channel: Channel) -> u8 {
    CONTROL_ANALOG_ENABLE | (channel.index() & CONTROL_CHANNEL_MASK)
}

// ── Driver ──────────────────────────────────────────────────────────────────

#[cfg(feature = "i2c")]
pub struct Pcf8591 {
    i2c: I2c,
}

#[cfg(feature = "i2c")]
impl Pcf8591 {
    /// Open `bus` and address the converter at `addr`.
    pub fn open(bus: u8, addr: u16) -> Result<Self, HardwareIoError> {
        let mut i2c =
            I2c::with_bus(bus).map_err(|e| HardwareIoError::Unavailable(e.to_string()))?;
        i2c.set_slave_address(addr)
            .map_err(|e| HardwareIoError::Unavailable(e.to_string()))?;

        tracing::info!(bus, addr = format_args!("0x{addr:02x}"), "pcf8591 initialised");

        Ok(Self { i2c })
    }
}

#[cfg(feature = "i2c")]
impl ChannelReader for Pcf8591 {
    fn read(&mut self, channel: Channel) -> Result<i32, HardwareIoError> {
        let bus_err = |e: rppal::i2c::Error| HardwareIoError::Bus {
            channel,
            message: e.to_string(),
        };

        self.i2c.smbus_send_byte(control_byte(channel)).map_err(bus_err)?;
        let _stale = self.i2c.smbus_receive_byte().map_err(bus_err)?;
        let fresh = self.i2c.smbus_receive_byte().map_err(bus_err)?;
        Ok(i32::from(fresh))
    }
}
