//! # Servo Controller Module
//!
//! This module provides a unified servo driver interface which can abstract over different types
//! of servo driver boards, and the [`ServoCtrl`] output loop which converts the current demand
//! into pulse widths at a fixed rate.
//!
//! The output loop is fixed-rate rather than fixed-delay: tick boundaries are scheduled from the
//! loop's start time so that the time spent actuating does not accumulate as drift. A tick which
//! overruns its boundary is logged and the schedule restarts from the current time, missed ticks
//! are not sent in a burst.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// [`ServoDriver`] implementation for the Adafruit PCA9685 16 channel servo driver board.
pub mod pca9685;

/// Simulated [`ServoDriver`] which records the pulses it is sent.
pub mod sim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    thread,
    time::{Duration, Instant},
};

use comms_if::eqpt::servo::{ServoDems, RUDDER_RANGE_PCT, THROTTLE_RANGE_PCT};
use log::{debug, error, info, trace, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use util::maths::{in_range, lin_map, midpoint};

use crate::{cancel::CancelToken, dems_store::DemsStore};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Accuracy of the OS sleep, below which the output loop spins instead.
const SLEEP_NATIVE_ACCURACY_NS: u32 = 100_000;

/// Number of channels on the supported driver boards, valid channel IDs are below this.
pub const NUM_CHANNELS: u8 = 16;

/// Time the final neutral pulses are held before the power rail is disabled.
const SETTLE_DELAY: Duration = Duration::from_millis(50);

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// Trait to provide a unified API for accessing servo driver boards.
///
/// The driver is owned by the [`ServoCtrl`] and is never shared with another thread.
pub trait ServoDriver {

    /// Initialise the driver hardware. Must be called before any other method.
    fn init(&mut self) -> Result<(), ServoError>;

    /// Read the voltage of the servo supply.
    ///
    /// Drivers which cannot measure the supply return [`ServoError::Unsupported`].
    fn read_supply_voltage(&mut self) -> Result<f64, ServoError>;

    /// Enable or disable the servo power rail.
    fn enable_power(&mut self, enable: bool) -> Result<(), ServoError>;

    /// Send a pulse of the given width to a channel.
    ///
    /// ## Arguments
    /// - `channel` - The channel ID to send the pulse to
    /// - `pulse_us` - Pulse width in microseconds
    fn send_pulse(&mut self, channel: u8, pulse_us: u32) -> Result<(), ServoError>;

    /// Release the driver hardware. No other method may be called afterwards.
    fn shutdown(&mut self) -> Result<(), ServoError>;
}

impl<D> ServoDriver for Box<D>
where
    D: ServoDriver + ?Sized
{
    fn init(&mut self) -> Result<(), ServoError> {
        (**self).init()
    }

    fn read_supply_voltage(&mut self) -> Result<f64, ServoError> {
        (**self).read_supply_voltage()
    }

    fn enable_power(&mut self, enable: bool) -> Result<(), ServoError> {
        (**self).enable_power(enable)
    }

    fn send_pulse(&mut self, channel: u8, pulse_us: u32) -> Result<(), ServoError> {
        (**self).send_pulse(channel, pulse_us)
    }

    fn shutdown(&mut self) -> Result<(), ServoError> {
        (**self).shutdown()
    }
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Configuration of a single servo channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// Driver channel ID
    pub id: u8,

    /// Pulse width at the bottom of the demand range
    pub min_pulse_us: u32,

    /// Pulse width at the top of the demand range
    pub max_pulse_us: u32,

    /// Range of valid demands, in percent
    pub dems_range_pct: (f64, f64),

    /// Position the channel returns to when it has no valid demand
    pub neutral: Neutral,
}

/// A pair of pulse widths, one for each channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServoPulses {
    pub throttle_us: u32,
    pub rudder_us: u32,
}

/// Fixed-rate servo output loop.
///
/// Each tick reads the current demand from the [`DemsStore`], maps it into pulse widths and sends
/// them to the driver. A channel whose demand is out of range is held at its neutral pulse.
pub struct ServoCtrl<D>
where
    D: ServoDriver
{
    driver: D,

    throttle: ChannelConfig,

    rudder: ChannelConfig,

    store: DemsStore,

    period: Duration,

    /// True while the throttle demand is being rejected, used to log only on changes
    throttle_rejected: bool,

    /// True while the rudder demand is being rejected
    rudder_rejected: bool,

    last_pulses: Option<ServoPulses>,

    num_ticks: u64,

    num_overruns: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ServoError {
    #[error("An I2C error occured")]
    I2c,

    #[error("Channel {0} does not exist on this driver")]
    InvalidChannel(u8),

    #[error("A pulse of {0} us cannot be produced by this driver")]
    InvalidPulse(u32),

    #[error("The driver does not support {0}")]
    Unsupported(&'static str),

    #[error("The driver is not initialised")]
    NotInitialised,

    #[error("Could not open the driver: {0}")]
    OpenError(String),
}

/// Neutral position of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Neutral {
    /// The minimum pulse, used by the throttle
    Min,

    /// The midpoint of the pulse range, used by the rudder
    Centre,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ChannelConfig {
    /// Configuration for a throttle channel, demands in [0, 100] and neutral at the minimum.
    pub fn throttle(id: u8, pulse_range_us: [u32; 2]) -> Self {
        Self {
            id,
            min_pulse_us: pulse_range_us[0],
            max_pulse_us: pulse_range_us[1],
            dems_range_pct: THROTTLE_RANGE_PCT,
            neutral: Neutral::Min,
        }
    }

    /// Configuration for a rudder channel, demands in [-100, 100] and neutral at the centre.
    pub fn rudder(id: u8, pulse_range_us: [u32; 2]) -> Self {
        Self {
            id,
            min_pulse_us: pulse_range_us[0],
            max_pulse_us: pulse_range_us[1],
            dems_range_pct: RUDDER_RANGE_PCT,
            neutral: Neutral::Centre,
        }
    }

    /// Pulse width which holds the channel at its neutral position.
    pub fn neutral_pulse_us(&self) -> u32 {
        match self.neutral {
            Neutral::Min => self.min_pulse_us,
            Neutral::Centre => {
                midpoint(self.min_pulse_us as f64, self.max_pulse_us as f64).round() as u32
            }
        }
    }

    /// Returns true if the demand lies within the channel's demand range.
    pub fn accepts(&self, dem_pct: f64) -> bool {
        in_range(dem_pct, self.dems_range_pct.0, self.dems_range_pct.1)
    }

    /// Map a demand onto a pulse width.
    ///
    /// Returns `None` if the demand is outside of the channel's demand range, the caller decides
    /// what to send instead.
    pub fn pulse_us(&self, dem_pct: f64) -> Option<u32> {
        if !self.accepts(dem_pct) {
            return None;
        }

        let pulse = lin_map(
            self.dems_range_pct,
            (self.min_pulse_us as f64, self.max_pulse_us as f64),
            dem_pct
        );

        Some(pulse.round() as u32)
    }
}

impl<D> ServoCtrl<D>
where
    D: ServoDriver
{
    /// Create a new servo controller.
    ///
    /// ## Arguments
    /// - `driver` - An initialised [`ServoDriver`] with its power rail enabled
    /// - `throttle`, `rudder` - Channel configurations
    /// - `store` - Store the demands are read from
    /// - `period` - Period of the output loop
    pub fn new(
        driver: D,
        throttle: ChannelConfig,
        rudder: ChannelConfig,
        store: DemsStore,
        period: Duration,
    ) -> Self {
        Self {
            driver,
            throttle,
            rudder,
            store,
            period,
            throttle_rejected: false,
            rudder_rejected: false,
            last_pulses: None,
            num_ticks: 0,
            num_overruns: 0,
        }
    }

    /// The pulses which hold both channels at neutral.
    pub fn neutral_pulses(&self) -> ServoPulses {
        ServoPulses {
            throttle_us: self.throttle.neutral_pulse_us(),
            rudder_us: self.rudder.neutral_pulse_us(),
        }
    }

    /// Map a demand into pulses, substituting the neutral pulse for any out of range channel.
    pub fn map_dems(&self, dems: &ServoDems) -> ServoPulses {
        ServoPulses {
            throttle_us: self.throttle.pulse_us(dems.throttle_pct)
                .unwrap_or_else(|| self.throttle.neutral_pulse_us()),
            rudder_us: self.rudder.pulse_us(dems.rudder_pct)
                .unwrap_or_else(|| self.rudder.neutral_pulse_us()),
        }
    }

    /// The last pulses sent to the driver, if any.
    pub fn last_pulses(&self) -> Option<ServoPulses> {
        self.last_pulses
    }

    /// Execute a single tick: read the current demand, map it and actuate.
    pub fn step(&mut self) -> ServoPulses {
        let dems = self.store.get();

        track_rejection(
            "throttle",
            &self.throttle,
            dems.throttle_pct,
            &mut self.throttle_rejected
        );
        track_rejection("rudder", &self.rudder, dems.rudder_pct, &mut self.rudder_rejected);

        let pulses = self.map_dems(&dems);

        trace!("Actuating {} as {:?}", dems, pulses);

        self.send_pulses(pulses);
        self.num_ticks += 1;

        pulses
    }

    /// Run the fixed-rate output loop until the token is cancelled.
    ///
    /// Cancellation is observed at the start of every tick, so this returns within one period of
    /// the token being cancelled. The servos are left at their last position, call
    /// [`ServoCtrl::make_safe`] afterwards.
    pub fn run(&mut self, cancel: &CancelToken) {
        let sleeper = SpinSleeper::new(SLEEP_NATIVE_ACCURACY_NS)
            .with_spin_strategy(SpinStrategy::YieldThread);

        info!(
            "Servo output loop running every {:?} (failsafe pulses are {:?})",
            self.period,
            self.neutral_pulses()
        );

        let mut next_tick = Instant::now();

        while !cancel.is_cancelled() {
            self.step();

            // Wait until the next scheduled tick
            next_tick += self.period;
            let now = Instant::now();
            if now < next_tick {
                sleeper.sleep(next_tick - now);
            }
            else {
                self.num_overruns += 1;
                warn!(
                    "Servo output tick overran by {:?} ({} overruns in {} ticks)",
                    now - next_tick,
                    self.num_overruns,
                    self.num_ticks
                );
                next_tick = now;
            }
        }

        debug!("Servo output loop stopped after {} ticks", self.num_ticks);
    }

    /// Send neutral pulses to both channels.
    pub fn make_safe(&mut self) {
        let pulses = self.neutral_pulses();
        info!("Sending neutral pulses {:?}", pulses);
        self.send_pulses(pulses);
    }

    /// Disable the power rail and shut down the driver.
    ///
    /// Call [`ServoCtrl::make_safe`] first, the neutral pulses are held for a short settling time
    /// before the power rail is disabled.
    pub fn release(mut self) -> Result<(), ServoError> {
        thread::sleep(SETTLE_DELAY);

        info!("Disabling servo power rail");
        let power_result = self.driver.enable_power(false);
        if let Err(ref e) = power_result {
            error!("Could not disable the servo power rail: {}", e);
        }

        // Shut down even if the power rail couldn't be disabled
        self.driver.shutdown()?;

        power_result
    }

    fn send_pulses(&mut self, pulses: ServoPulses) {
        let results = [
            (self.throttle.id, self.driver.send_pulse(self.throttle.id, pulses.throttle_us)),
            (self.rudder.id, self.driver.send_pulse(self.rudder.id, pulses.rudder_us)),
        ];

        for (channel, result) in results.iter() {
            if let Err(e) = result {
                warn!("Could not send pulse to channel {}: {}", channel, e);
            }
        }

        self.last_pulses = Some(pulses);
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Log when a channel starts or stops rejecting its demand.
///
/// Only transitions are logged, otherwise the log would be flooded at the loop rate.
fn track_rejection(
    name: &str,
    channel: &ChannelConfig,
    dem_pct: f64,
    rejected: &mut bool
) {
    let accepted = channel.accepts(dem_pct);

    if accepted && *rejected {
        info!("{} demand back in range ({:.1} %)", name, dem_pct);
    }
    else if !accepted && !*rejected {
        warn!(
            "{} demand of {:.1} % is outside of [{}, {}], holding at neutral",
            name, dem_pct, channel.dems_range_pct.0, channel.dems_range_pct.1
        );
    }

    *rejected = !accepted;
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use super::sim::SimDriver;

    const THROTTLE_CH: u8 = 0;
    const RUDDER_CH: u8 = 1;

    fn ctrl(sim: &SimDriver, store: &DemsStore) -> ServoCtrl<SimDriver> {
        let mut driver = sim.clone();
        driver.init().unwrap();
        driver.enable_power(true).unwrap();

        ServoCtrl::new(
            driver,
            ChannelConfig::throttle(THROTTLE_CH, [1000, 2000]),
            ChannelConfig::rudder(RUDDER_CH, [1100, 1900]),
            store.clone(),
            Duration::from_millis(20),
        )
    }

    #[test]
    fn test_throttle_mapping() {
        let ch = ChannelConfig::throttle(THROTTLE_CH, [1000, 2000]);

        assert_eq!(ch.pulse_us(0.0), Some(1000));
        assert_eq!(ch.pulse_us(50.0), Some(1500));
        assert_eq!(ch.pulse_us(100.0), Some(2000));
        assert_eq!(ch.neutral_pulse_us(), 1000);

        assert_eq!(ch.pulse_us(-0.1), None);
        assert_eq!(ch.pulse_us(100.1), None);
        assert_eq!(ch.pulse_us(f64::NAN), None);

        // Monotonic over the whole range
        let mut last = 0;
        for i in 0..=1000 {
            let p = ch.pulse_us(i as f64 * 0.1).unwrap();
            assert!(p >= last, "pulse({}) = {} < {}", i as f64 * 0.1, p, last);
            assert!(p >= ch.min_pulse_us && p <= ch.max_pulse_us);
            last = p;
        }
    }

    #[test]
    fn test_rudder_mapping() {
        let ch = ChannelConfig::rudder(RUDDER_CH, [1100, 1900]);

        assert_eq!(ch.pulse_us(-100.0), Some(1100));
        assert_eq!(ch.pulse_us(0.0), Some(1500));
        assert_eq!(ch.pulse_us(100.0), Some(1900));
        assert_eq!(ch.pulse_us(50.0), Some(1700));
        assert_eq!(ch.neutral_pulse_us(), 1500);

        assert_eq!(ch.pulse_us(-100.5), None);
        assert_eq!(ch.pulse_us(100.5), None);

        let mut last = 0;
        for i in -1000..=1000 {
            let p = ch.pulse_us(i as f64 * 0.1).unwrap();
            assert!(p >= last, "pulse({}) = {} < {}", i as f64 * 0.1, p, last);
            last = p;
        }
    }

    #[test]
    fn test_rudder_odd_range_centre() {
        let ch = ChannelConfig::rudder(RUDDER_CH, [1000, 2001]);

        assert_eq!(ch.pulse_us(-100.0), Some(1000));
        assert_eq!(ch.pulse_us(100.0), Some(2001));
        assert_eq!(ch.pulse_us(0.0), Some(ch.neutral_pulse_us()));
    }

    #[test]
    fn test_step_scenarios() {
        let sim = SimDriver::new(7.4);
        let store = DemsStore::new();
        let mut ctrl = ctrl(&sim, &store);

        let cases = [
            (ServoDems::new(50.0, 0.0), (1500, 1500)),
            (ServoDems::new(0.0, -100.0), (1000, 1100)),
            (ServoDems::new(100.0, 100.0), (2000, 1900)),
            (ServoDems::NEUTRAL, (1000, 1500)),
            // Out of range throttle is held at neutral, rudder still follows its demand
            (ServoDems::new(150.0, 0.0), (1000, 1500)),
            (ServoDems::new(150.0, 50.0), (1000, 1700)),
            (ServoDems::new(50.0, -150.0), (1500, 1500)),
        ];

        for (dems, (throttle_us, rudder_us)) in cases.iter() {
            store.set(*dems);
            let pulses = ctrl.step();

            assert_eq!(
                pulses,
                ServoPulses { throttle_us: *throttle_us, rudder_us: *rudder_us },
                "{:?}",
                dems
            );
            assert_eq!(sim.last_pulse(THROTTLE_CH), Some(*throttle_us));
            assert_eq!(sim.last_pulse(RUDDER_CH), Some(*rudder_us));
            assert_eq!(ctrl.last_pulses(), Some(pulses));
        }
    }

    #[test]
    fn test_step_uses_map_dems() {
        let sim = SimDriver::new(7.4);
        let store = DemsStore::new();
        let mut ctrl = ctrl(&sim, &store);

        let dems = [
            ServoDems::new(150.0, -20.0),
            ServoDems::new(150.0, -20.0),
            ServoDems::new(30.0, 120.0),
            ServoDems::new(30.0, 20.0),
        ];
        let rejected = [(true, false), (true, false), (false, true), (false, false)];

        for (d, (throttle_rejected, rudder_rejected)) in dems.iter().zip(rejected.iter()) {
            store.set(*d);
            assert_eq!(ctrl.step(), ctrl.map_dems(d));
            assert_eq!(ctrl.throttle_rejected, *throttle_rejected, "{:?}", d);
            assert_eq!(ctrl.rudder_rejected, *rudder_rejected, "{:?}", d);
        }
    }

    #[test]
    fn test_map_dems_pure() {
        let sim = SimDriver::new(7.4);
        let store = DemsStore::new();
        let ctrl = ctrl(&sim, &store);

        assert_eq!(
            ctrl.map_dems(&ServoDems::new(150.0, -20.0)),
            ServoPulses { throttle_us: 1000, rudder_us: 1420 }
        );
        assert_eq!(ctrl.map_dems(&ServoDems::NEUTRAL), ctrl.neutral_pulses());

        // Mapping doesn't touch the driver
        assert_eq!(sim.num_pulses(), 0);
    }

    #[test]
    fn test_run_until_cancelled() {
        let sim = SimDriver::new(7.4);
        let store = DemsStore::new();
        store.set(ServoDems::new(40.0, 10.0));

        let cancel = CancelToken::new();
        let handle = {
            let sim = sim.clone();
            let store = store.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                let mut ctrl = ctrl(&sim, &store);
                ctrl.run(&cancel);
                ctrl.make_safe();
                ctrl.release().unwrap();
            })
        };

        thread::sleep(Duration::from_millis(200));
        assert_eq!(sim.last_pulse(THROTTLE_CH), Some(1400));
        assert_eq!(sim.last_pulse(RUDDER_CH), Some(1540));

        let cancelled_at = Instant::now();
        cancel.cancel();
        handle.join().unwrap();
        assert!(cancelled_at.elapsed() < Duration::from_millis(500));

        // Roughly 10 ticks in 200 ms, with a generous margin for loaded test machines
        let num_pairs = sim.num_pulses() / 2;
        assert!(num_pairs >= 4 && num_pairs <= 20, "{} pulse pairs", num_pairs);

        // Finished at neutral with the power off
        assert_eq!(sim.last_pulse(THROTTLE_CH), Some(1000));
        assert_eq!(sim.last_pulse(RUDDER_CH), Some(1500));
        assert!(!sim.power_enabled());
        assert!(sim.is_shut_down());
    }

    #[test]
    fn test_send_failure_not_fatal() {
        // An uninitialised sim driver rejects every pulse
        let sim = SimDriver::new(7.4);
        let store = DemsStore::new();
        let mut ctrl = ServoCtrl::new(
            sim.clone(),
            ChannelConfig::throttle(THROTTLE_CH, [1000, 2000]),
            ChannelConfig::rudder(RUDDER_CH, [1000, 2000]),
            store,
            Duration::from_millis(20),
        );

        let pulses = ctrl.step();
        assert_eq!(pulses, ctrl.neutral_pulses());
        assert_eq!(sim.num_pulses(), 0);
    }
}
