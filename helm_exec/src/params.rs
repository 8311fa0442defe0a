//! # Helm Executable Parameters
//!
//! Loaded once at startup from `params/helm_exec.toml` and immutable afterwards. Any key which is
//! left out of the file takes the default given in [`HelmExecParams::default`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use serde::Deserialize;
use util::time::{hz_to_period, secs_to_duration};

use crate::servo_ctrl::{ChannelConfig, NUM_CHANNELS};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest accepted timeout or period, keeps deadline arithmetic on `Instant` far from overflow.
pub const MAX_INTERVAL_S: f64 = 86_400.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct HelmExecParams {

    // ---- DEMANDS SERVER ----

    /// UDP port on which demands are received
    pub port: u16,

    /// Address the demands socket binds to
    pub bind_addr: IpAddr,

    /// Time without a valid demand after which the servos are returned to neutral.
    ///
    /// Units: seconds
    pub timeout_s: f64,

    // ---- SERVO OUTPUT ----

    /// Rate of the servo output loop.
    ///
    /// Units: hertz
    pub rate_hz: f64,

    /// Driver channel connected to the throttle (ESC)
    pub throttle_channel: u8,

    /// Driver channel connected to the rudder servo
    pub rudder_channel: u8,

    /// Minimum (throttle off) and maximum (full throttle) pulse widths.
    ///
    /// Units: microseconds
    pub throttle_pulse_range_us: [u32; 2],

    /// Minimum (full port) and maximum (full starboard) pulse widths. Neutral is the midpoint.
    ///
    /// Units: microseconds
    pub rudder_pulse_range_us: [u32; 2],

    // ---- EQUIPMENT ----

    /// Which servo driver to use
    pub driver: DriverKind,

    /// Supply voltage checks performed before enabling the servo power rail
    pub supply: SupplyParams,

    /// Parameters of the simulated driver
    pub sim: SimParams,

    /// Parameters of the PCA9685 driver board
    pub pca9685: Pca9685Params,
}

/// Supply voltage check parameters.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SupplyParams {
    /// Minimum supply voltage needed to drive the servos.
    ///
    /// Units: volts
    pub min_voltage_v: f64,

    /// What to do if the supply is below the minimum
    pub policy: SupplyPolicy,

    /// Interval between voltage checks under [`SupplyPolicy::BlockAndPoll`].
    ///
    /// Units: seconds
    pub poll_interval_s: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct SimParams {
    /// Supply voltage reported by the simulated driver.
    ///
    /// Units: volts
    pub supply_voltage_v: f64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Pca9685Params {
    /// I2C bus the board is attached to
    pub i2c_bus: u8,

    /// 7-bit I2C address of the board
    pub address: u8,

    /// PWM frequency the board runs at.
    ///
    /// Units: hertz
    pub pwm_freq_hz: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DriverKind {
    /// Simulated driver which logs pulses, see [`crate::servo_ctrl::sim`]
    Sim,

    /// Adafruit PCA9685 16 channel servo board
    Pca9685,
}

/// Behaviour when the supply voltage is too low at startup.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SupplyPolicy {
    /// Keep polling the voltage until it is sufficient, for when the battery is connected after
    /// the exec has started
    BlockAndPoll,

    /// Abort startup
    FailFast,
}

/// Reasons the parameters may be rejected.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ParamsError {
    #[error("The failsafe timeout must be in (0, {max}] s, found {0} s", max = MAX_INTERVAL_S)]
    InvalidTimeout(f64),

    #[error("The output rate must give a period in (0, {max}] s, found {0} Hz", max = MAX_INTERVAL_S)]
    InvalidRate(f64),

    #[error("The {0} pulse range must have min < max, found {1:?}")]
    InvalidPulseRange(&'static str, [u32; 2]),

    #[error("The {0} channel must be below {max}, found {1}", max = NUM_CHANNELS)]
    InvalidChannel(&'static str, u8),

    #[error("The throttle and rudder cannot share channel {0}")]
    SharedChannel(u8),

    #[error("The supply poll interval must be in (0, {max}] s, found {0} s", max = MAX_INTERVAL_S)]
    InvalidPollInterval(f64),

    #[error("The PCA9685 PWM frequency must be in [24, 1526] Hz, found {0} Hz")]
    InvalidPwmFreq(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl HelmExecParams {
    /// Check the parameters are usable, this should be done once at startup.
    pub fn validate(&self) -> Result<(), ParamsError> {
        if !interval_valid(secs_to_duration(self.timeout_s)) {
            return Err(ParamsError::InvalidTimeout(self.timeout_s));
        }
        if !interval_valid(hz_to_period(self.rate_hz)) {
            return Err(ParamsError::InvalidRate(self.rate_hz));
        }

        let ranges = [
            ("throttle", self.throttle_pulse_range_us),
            ("rudder", self.rudder_pulse_range_us)
        ];
        for (name, range) in ranges.iter() {
            if range[0] >= range[1] {
                return Err(ParamsError::InvalidPulseRange(*name, *range));
            }
        }

        let channels = [("throttle", self.throttle_channel), ("rudder", self.rudder_channel)];
        for (name, id) in channels.iter() {
            if *id >= NUM_CHANNELS {
                return Err(ParamsError::InvalidChannel(*name, *id));
            }
        }

        if self.throttle_channel == self.rudder_channel {
            return Err(ParamsError::SharedChannel(self.throttle_channel));
        }

        if self.supply.policy == SupplyPolicy::BlockAndPoll
            && !interval_valid(secs_to_duration(self.supply.poll_interval_s))
        {
            return Err(ParamsError::InvalidPollInterval(self.supply.poll_interval_s));
        }

        if self.driver == DriverKind::Pca9685
            && !(self.pca9685.pwm_freq_hz >= 24.0 && self.pca9685.pwm_freq_hz <= 1526.0)
        {
            return Err(ParamsError::InvalidPwmFreq(self.pca9685.pwm_freq_hz));
        }

        Ok(())
    }

    /// Address the demands server binds to.
    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    /// Receive timeout of the demands server, which is also the failsafe timeout.
    ///
    /// Must only be called on validated parameters.
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_s)
    }

    /// Period of the servo output loop.
    ///
    /// Must only be called on validated parameters.
    pub fn output_period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.rate_hz)
    }

    /// Longest time between the last valid demand being received and neutral pulses being sent.
    ///
    /// The server writes the neutral demand once the timeout expires, and the output loop picks it
    /// up on its next tick.
    pub fn failsafe_bound(&self) -> Duration {
        self.recv_timeout() + self.output_period()
    }

    pub fn throttle_config(&self) -> ChannelConfig {
        ChannelConfig::throttle(self.throttle_channel, self.throttle_pulse_range_us)
    }

    pub fn rudder_config(&self) -> ChannelConfig {
        ChannelConfig::rudder(self.rudder_channel, self.rudder_pulse_range_us)
    }
}

impl Default for HelmExecParams {
    fn default() -> Self {
        Self {
            port: 2031,
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            timeout_s: 5.0,
            rate_hz: 50.0,
            throttle_channel: 0,
            rudder_channel: 1,
            throttle_pulse_range_us: [1000, 2000],
            rudder_pulse_range_us: [1000, 2000],
            driver: DriverKind::Sim,
            supply: SupplyParams::default(),
            sim: SimParams::default(),
            pca9685: Pca9685Params::default(),
        }
    }
}

impl Default for SupplyParams {
    fn default() -> Self {
        Self {
            min_voltage_v: 6.0,
            policy: SupplyPolicy::BlockAndPoll,
            poll_interval_s: 1.0,
        }
    }
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            supply_voltage_v: 7.4,
        }
    }
}

impl Default for Pca9685Params {
    fn default() -> Self {
        Self {
            i2c_bus: 1,
            address: 0x40,
            pwm_freq_hz: 50.0,
        }
    }
}

impl Default for DriverKind {
    fn default() -> Self {
        DriverKind::Sim
    }
}

impl Default for SupplyPolicy {
    fn default() -> Self {
        SupplyPolicy::BlockAndPoll
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn interval_valid(interval: Option<Duration>) -> bool {
    match interval {
        Some(d) => d.as_secs_f64() <= MAX_INTERVAL_S,
        None => false
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_valid() {
        let params = HelmExecParams::default();
        assert_eq!(params.validate(), Ok(()));
        assert_eq!(params.endpoint(), "0.0.0.0:2031".parse().unwrap());
        assert_eq!(params.output_period(), Duration::from_millis(20));
        assert_eq!(params.failsafe_bound(), Duration::from_millis(5020));
    }

    #[test]
    fn test_deserialize() {
        let params: HelmExecParams = toml::from_str(r#"
            port = 3000
            bind_addr = "127.0.0.1"
            timeout_s = 2.5
            rudder_pulse_range_us = [1100, 1900]
            driver = "pca9685"

            [supply]
            policy = "fail_fast"
        "#).unwrap();

        assert_eq!(params.endpoint(), "127.0.0.1:3000".parse().unwrap());
        assert_eq!(params.timeout_s, 2.5);
        assert_eq!(params.rate_hz, 50.0);
        assert_eq!(params.rudder_pulse_range_us, [1100, 1900]);
        assert_eq!(params.driver, DriverKind::Pca9685);
        assert_eq!(params.supply.policy, SupplyPolicy::FailFast);
        assert_eq!(params.supply.min_voltage_v, 6.0);
        assert_eq!(params.validate(), Ok(()));
    }

    #[test]
    fn test_validate() {
        let base = HelmExecParams::default();

        let p = HelmExecParams { timeout_s: 0.0, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidTimeout(0.0)));

        let p = HelmExecParams { rate_hz: -50.0, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidRate(-50.0)));

        // Values too large for a Duration are rejected rather than panicking
        let p = HelmExecParams { timeout_s: 1e30, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidTimeout(1e30)));

        let p = HelmExecParams { rate_hz: 1e-300, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidRate(1e-300)));

        // Representable but beyond the maximum interval
        let p = HelmExecParams { timeout_s: 1e12, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidTimeout(1e12)));

        let p = HelmExecParams { rate_hz: 1e-6, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidRate(1e-6)));

        let p = HelmExecParams { timeout_s: MAX_INTERVAL_S, ..base.clone() };
        assert_eq!(p.validate(), Ok(()));

        let mut p = base.clone();
        p.supply.poll_interval_s = 1e30;
        assert_eq!(p.validate(), Err(ParamsError::InvalidPollInterval(1e30)));

        let p = HelmExecParams { throttle_pulse_range_us: [2000, 1000], ..base.clone() };
        assert_eq!(
            p.validate(),
            Err(ParamsError::InvalidPulseRange("throttle", [2000, 1000]))
        );

        let p = HelmExecParams { rudder_pulse_range_us: [1500, 1500], ..base.clone() };
        assert_eq!(
            p.validate(),
            Err(ParamsError::InvalidPulseRange("rudder", [1500, 1500]))
        );

        let p = HelmExecParams { rudder_channel: 0, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::SharedChannel(0)));

        let p = HelmExecParams { throttle_channel: 20, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidChannel("throttle", 20)));

        let p = HelmExecParams { rudder_channel: 16, ..base.clone() };
        assert_eq!(p.validate(), Err(ParamsError::InvalidChannel("rudder", 16)));

        let p = HelmExecParams { throttle_channel: 15, rudder_channel: 14, ..base.clone() };
        assert_eq!(p.validate(), Ok(()));

        let mut p = base.clone();
        p.driver = DriverKind::Pca9685;
        p.pca9685.pwm_freq_hz = 2000.0;
        assert_eq!(p.validate(), Err(ParamsError::InvalidPwmFreq(2000.0)));
    }

    #[test]
    fn test_shipped_params() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../params/helm_exec.toml");
        let params: HelmExecParams = util::params::load_path(path).unwrap();

        assert_eq!(params.validate(), Ok(()));
        assert_eq!(params.port, 2031);
        assert_eq!(params.pca9685.address, 0x40);
    }
}
