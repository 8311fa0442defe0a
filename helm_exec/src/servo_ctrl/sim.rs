//! Simulated servo driver
//!
//! The simulated driver accepts every valid pulse and records it, so that the output of the helm
//! executable can be inspected without any hardware attached. Clones share the same state.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{collections::{HashMap, VecDeque}, sync::Arc};

use parking_lot::Mutex;

use super::{ServoDriver, ServoError, NUM_CHANNELS};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Maximum number of pulses kept in the history.
const MAX_HISTORY_LEN: usize = 4096;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SimDriver {
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug, Default)]
struct SimState {
    initialised: bool,
    shut_down: bool,
    power_enabled: bool,
    supply_voltage_v: f64,
    last_pulses: HashMap<u8, u32>,
    history: VecDeque<(u8, u32)>,
    num_pulses: usize,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimDriver {
    /// Create a new driver which reports the given supply voltage.
    pub fn new(supply_voltage_v: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                supply_voltage_v,
                ..Default::default()
            }))
        }
    }

    /// Change the reported supply voltage.
    pub fn set_supply_voltage(&self, voltage_v: f64) {
        self.state.lock().supply_voltage_v = voltage_v;
    }

    /// The last pulse sent to the channel.
    pub fn last_pulse(&self, channel: u8) -> Option<u32> {
        self.state.lock().last_pulses.get(&channel).copied()
    }

    /// The most recent pulses sent, oldest first, as `(channel, pulse_us)`.
    pub fn history(&self) -> Vec<(u8, u32)> {
        self.state.lock().history.iter().copied().collect()
    }

    /// Total number of pulses accepted since creation.
    pub fn num_pulses(&self) -> usize {
        self.state.lock().num_pulses
    }

    pub fn is_initialised(&self) -> bool {
        self.state.lock().initialised
    }

    pub fn power_enabled(&self) -> bool {
        self.state.lock().power_enabled
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }
}

impl SimState {
    fn check_ready(&self) -> Result<(), ServoError> {
        if self.initialised && !self.shut_down {
            Ok(())
        }
        else {
            Err(ServoError::NotInitialised)
        }
    }
}

impl ServoDriver for SimDriver {
    fn init(&mut self) -> Result<(), ServoError> {
        let mut state = self.state.lock();
        state.initialised = true;
        state.shut_down = false;
        Ok(())
    }

    fn read_supply_voltage(&mut self) -> Result<f64, ServoError> {
        let state = self.state.lock();
        state.check_ready()?;
        Ok(state.supply_voltage_v)
    }

    fn enable_power(&mut self, enable: bool) -> Result<(), ServoError> {
        let mut state = self.state.lock();
        state.check_ready()?;
        state.power_enabled = enable;
        Ok(())
    }

    fn send_pulse(&mut self, channel: u8, pulse_us: u32) -> Result<(), ServoError> {
        let mut state = self.state.lock();
        state.check_ready()?;

        if channel >= NUM_CHANNELS {
            return Err(ServoError::InvalidChannel(channel));
        }

        state.last_pulses.insert(channel, pulse_us);
        state.history.push_back((channel, pulse_us));
        if state.history.len() > MAX_HISTORY_LEN {
            state.history.pop_front();
        }
        state.num_pulses += 1;

        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), ServoError> {
        let mut state = self.state.lock();
        state.check_ready()?;
        state.power_enabled = false;
        state.shut_down = true;
        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
