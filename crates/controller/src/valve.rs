//! Valve relays. The `gpio` feature gates the real rppal driver; without it,
//! each relay drives a simulated output line.
//!
//! All methods take `&self` so the board can be shared between the
//! actuator, manual override, and shutdown path, and so a drop guard can
//! close a valve synchronously.

use std::collections::{BTreeMap, BTreeSet};
#[cfg(not(feature = "gpio"))]
use std::sync::atomic::{AtomicBool, Ordering};
#[cfg(not(feature = "gpio"))]
use std::sync::Arc;
use std::sync::{Mutex, MutexGuard};

use anyhow::Result;
use tracing::{info, warn};

#[cfg(feature = "gpio")]
use rppal::gpio::{Gpio, OutputPin};

use crate::error::ActuationError;
use crate::zone::ValveId;

/// Output line level of a relay that is not wired to hardware.
#[cfg(not(feature = "gpio"))]
#[derive(Debug, Clone, Default)]
struct SimulatedPin(Arc<AtomicBool>);

#[cfg(not(feature = "gpio"))]
impl SimulatedPin {
    fn set_high(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }

    fn set_low(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn is_high(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Relay {
    gpio_pin: u8,
    #[cfg(feature = "gpio")]
    pin: OutputPin,
    #[cfg(not(feature = "gpio"))]
    pin: SimulatedPin,
    on: bool,
}

impl Relay {
    fn drive(&mut self, on: bool, active_low: bool) {
        // active-low relay: LOW = ON, HIGH = OFF
        if on != active_low {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        self.on = on;
    }
}

pub struct ValveBoard {
    relays: Mutex<BTreeMap<ValveId, Relay>>,
    active_low: bool,
}

impl ValveBoard {
    /// Claim one output per valve and drive every relay OFF.
    pub fn new(valve_to_gpio: &[(ValveId, u8)], active_low: bool) -> Result<Self> {
        #[cfg(feature = "gpio")]
        let gpio = Gpio::new()?;

        let mut relays = BTreeMap::new();
        for &(valve, gpio_pin) in valve_to_gpio {
            #[cfg(feature = "gpio")]
            let pin = gpio.get(gpio_pin)?.into_output();
            #[cfg(not(feature = "gpio"))]
            let pin = SimulatedPin::default();

            let mut relay = Relay {
                gpio_pin,
                pin,
                on: true,
            };
            relay.drive(false, active_low);

            #[cfg(feature = "gpio")]
            info!(%valve, gpio = gpio_pin, "valve registered");
            #[cfg(not(feature = "gpio"))]
            info!(%valve, gpio = gpio_pin, "valve registered (simulated, not wired)");

            relays.insert(valve, relay);
        }

        Ok(Self {
            relays: Mutex::new(relays),
            active_low,
        })
    }

    /// A panic while holding the lock must not stop valves from closing.
    fn relays(&self) -> MutexGuard<'_, BTreeMap<ValveId, Relay>> {
        self.relays.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn valve_ids(&self) -> BTreeSet<ValveId> {
        self.relays().keys().copied().collect()
    }

    pub fn is_on(&self, valve: ValveId) -> Option<bool> {
        self.relays().get(&valve).map(|r| r.on)
    }

    /// Energize or de-energize one valve. Unknown valves are rejected
    /// without touching any output.
    pub fn set(&self, valve: ValveId, on: bool) -> Result<(), ActuationError> {
        let mut relays = self.relays();
        let relay = relays
            .get_mut(&valve)
            .ok_or(ActuationError::InvalidTarget(valve))?;
        relay.drive(on, self.active_low);
        info!(%valve, gpio = relay.gpio_pin, "valve {}", if on { "ON" } else { "OFF" });
        Ok(())
    }

    pub fn all_off(&self) {
        let active_low = self.active_low;
        for (valve, relay) in self.relays().iter_mut() {
            if relay.on {
                info!(%valve, "valve OFF");
            }
            relay.drive(false, active_low);
        }
    }

    #[cfg(all(test, not(feature = "gpio")))]
    fn line(&self, valve: ValveId) -> Option<SimulatedPin> {
        self.relays().get(&valve).map(|r| r.pin.clone())
    }

    /// Valve ids with their on/off state, for status reporting.
    pub fn states(&self) -> BTreeMap<ValveId, bool> {
        self.relays().iter().map(|(v, r)| (*v, r.on)).collect()
    }
}

impl Drop for ValveBoard {
    fn drop(&mut self) {
        let open = self.relays().values().filter(|r| r.on).count();
        if open > 0 {
            warn!(open, "valve board dropped with open valves, closing them");
        }
        self.all_off();
    }
}

// ---------------------------------------------------------------------------
// Open-valve guard
// ---------------------------------------------------------------------------

/// An energized valve. Dropping the guard de-energizes it, whichever way the
/// holder exits.
pub struct OpenValve<'a> {
    board: &'a ValveBoard,
    valve: ValveId,
}

impl<'a> OpenValve<'a> {
    pub fn energize(board: &'a ValveBoard, valve: ValveId) -> Result<Self, ActuationError> {
        board.set(valve, true)?;
        Ok(Self { board, valve })
    }
}

impl Drop for OpenValve<'_> {
    fn drop(&mut self) {
        // Only fails for unknown valves, which energize already rejected.
        let _ = self.board.set(self.valve, false);
    }
}

// ===========================================================================
// Tests
// ===========================================================================
