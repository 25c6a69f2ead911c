//! Simulated four-channel ADC for local development.
//!
//! Each channel is a random walk with mean reversion inside the calibrated
//! band, plus electronic noise and the occasional dropout that looks like an
//! unplugged probe.

use crate::calibration::Calibration;
use crate::reader::{Channel, ChannelReader, HardwareIoError, MAX_CHANNEL};

/// Approximate a sample from N(0,1) using the Irwin-Hall method:
/// sum of 12 uniform [0,1) values minus 6.
fn approx_std_normal() -> f64 {
    let mut sum: f64 = 0.0;
    for _ in 0..12 {
        sum += fastrand::f64();
    }
    sum - 6.0
}

fn gaussian(mean: f64, sigma: f64) -> f64 {
    mean + sigma * approx_std_normal()
}

/// Walk state for one analog input.
struct ChannelState {
    base: f64,
    noise_sigma: f64,
}

pub struct SimulatedAdc {
    channels: Vec<ChannelState>,
    low: f64,
    high: f64,
    center: f64,
    walk_sigma: f64,
    mean_reversion: f64,
    dropout_prob: f32,
}

impl SimulatedAdc {
    /// Simulate probes calibrated to `calibration`. Readings stay within the
    /// calibrated band except for dropouts, which read 0.
    pub fn new(calibration: Calibration) -> Self {
        let low = calibration.analog_min as f64;
        let high = calibration.analog_max as f64;
        let range = (high - low).abs().max(1.0);
        let center = (low + high) / 2.0;

        let channels = (0..=MAX_CHANNEL)
            .map(|_| ChannelState {
                base: (center + gaussian(0.0, range * 0.15)).clamp(low, high),
                noise_sigma: range * 0.02,
            })
            .collect();

        Self {
            channels,
            low,
            high,
            center,
            walk_sigma: range * 0.03,
            mean_reversion: 0.05,
            dropout_prob: 0.01,
        }
    }

    /// Disable dropouts, for callers that need every reading to stay in band.
    pub fn without_dropouts(mut self) -> Self {
        self.dropout_prob = 0.0;
        self
    }

    fn sample(&mut self, index: usize) -> i32 {
        let state = &mut self.channels[index];

        let pull = self.mean_reversion * (self.center - state.base);
        let walk = gaussian(0.0, self.walk_sigma);
        state.base = (state.base + pull + walk).clamp(self.low, self.high);

        if fastrand::f32() < self.dropout_prob {
            return 0;
        }

        let noise = gaussian(0.0, state.noise_sigma);
        (state.base + noise).round().clamp(self.low, self.high) as i32
    }
}

impl ChannelReader for SimulatedAdc {
    fn read(&mut self, channel: Channel) -> Result<i32, HardwareIoError> {
        Ok(self.sample(channel.index() as usize))
    }
}
