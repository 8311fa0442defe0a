//! [`ServoDriver`] implementation for the PCA9685 driver

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use pwm_pca9685::{Channel, Pca9685};
use embedded_hal::blocking::i2c::{Write, WriteRead};
use log::debug;

use crate::params::Pca9685Params;
use super::{ServoDriver, ServoError};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const MAX_PWM: u16 = 4096;

/// Frequency of the PCA9685's internal oscillator.
const OSC_FREQ_HZ: f64 = 25_000_000.0;

/// Smallest prescale value accepted by the chip.
const MIN_PRESCALE: f64 = 3.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

pub struct Pca9685Driver<I2C> {
    pwm: Pca9685<I2C>,

    prescale: u8,

    /// PWM period that `prescale` actually produces, in microseconds
    period_us: f64,

    initialised: bool,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<I2C, E> Pca9685Driver<I2C>
where
    I2C: Write<Error = E> + WriteRead<Error = E>
{
    /// Wrap a PCA9685 device.
    pub fn new(pwm: Pca9685<I2C>, pwm_freq_hz: f64) -> Result<Self, ServoError> {
        let prescale = prescale_for(pwm_freq_hz)
            .ok_or(ServoError::OpenError(format!(
                "a PWM frequency of {} Hz is out of range",
                pwm_freq_hz
            )))?;

        Ok(Self {
            pwm,
            prescale,
            period_us: period_us_for(prescale),
            initialised: false,
        })
    }
}

impl<I2C, E> ServoDriver for Pca9685Driver<I2C>
where 
    I2C: Write<Error = E> + WriteRead<Error = E>
{
    fn init(&mut self) -> Result<(), ServoError> {
        self.pwm.set_prescale(self.prescale).map_err(map_err)?;
        self.pwm.set_channel_full_off(Channel::All).map_err(map_err)?;
        self.initialised = true;

        debug!(
            "PCA9685 initialised with prescale {} ({:.2} us period)",
            self.prescale,
            self.period_us
        );

        Ok(())
    }

    fn read_supply_voltage(&mut self) -> Result<f64, ServoError> {
        Err(ServoError::Unsupported("supply voltage measurement"))
    }

    fn enable_power(&mut self, enable: bool) -> Result<(), ServoError> {
        if !self.initialised {
            return Err(ServoError::NotInitialised)
        }

        let result = match enable {
            true => self.pwm.enable(),
            false => self.pwm.disable()
        };

        result.map_err(map_err)
    }

    fn send_pulse(&mut self, channel: u8, pulse_us: u32) -> Result<(), ServoError> {
        if !self.initialised {
            return Err(ServoError::NotInitialised)
        }

        let channel_id = channel_from_id(channel)?;
        let counts = pulse_to_counts(pulse_us, self.period_us)
            .ok_or(ServoError::InvalidPulse(pulse_us))?;

        self.pwm.set_channel_on_off(channel_id, 0, counts).map_err(map_err)
    }

    fn shutdown(&mut self) -> Result<(), ServoError> {
        if !self.initialised {
            return Err(ServoError::NotInitialised)
        }

        self.pwm.set_channel_full_off(Channel::All).map_err(map_err)?;
        self.pwm.disable().map_err(map_err)?;
        self.initialised = false;

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Open the PCA9685 board on the Raspberry Pi's I2C bus.
#[cfg(all(target_arch = "arm", target_os = "linux"))]
pub fn open(params: &Pca9685Params) -> Result<Box<dyn ServoDriver + Send>, ServoError> {
    use pwm_pca9685::Address;
    use rppal::i2c::I2c;

    let i2c = I2c::with_bus(params.i2c_bus)
        .map_err(|e| ServoError::OpenError(format!("I2C bus {}: {}", params.i2c_bus, e)))?;

    let pwm = Pca9685::new(i2c, Address::from(params.address))
        .map_err(|_| ServoError::OpenError(format!(
            "no PCA9685 at address {:#04x}",
            params.address
        )))?;

    Ok(Box::new(Pca9685Driver::new(pwm, params.pwm_freq_hz)?))
}

/// Open the PCA9685 board on the Raspberry Pi's I2C bus.
///
/// Only available on the Raspberry Pi.
#[cfg(not(all(target_arch = "arm", target_os = "linux")))]
pub fn open(_params: &Pca9685Params) -> Result<Box<dyn ServoDriver + Send>, ServoError> {
    Err(ServoError::OpenError(
        "the PCA9685 driver is only available on the Raspberry Pi".into()
    ))
}

/// Prescale needed to get as close as possible to the given PWM frequency.
fn prescale_for(pwm_freq_hz: f64) -> Option<u8> {
    if !pwm_freq_hz.is_finite() || pwm_freq_hz <= 0.0 {
        return None
    }

    let prescale = (OSC_FREQ_HZ / (MAX_PWM as f64 * pwm_freq_hz)).round() - 1.0;

    if prescale < MIN_PRESCALE || prescale > u8::MAX as f64 {
        None
    }
    else {
        Some(prescale as u8)
    }
}

fn period_us_for(prescale: u8) -> f64 {
    1e6 * MAX_PWM as f64 * (prescale as f64 + 1.0) / OSC_FREQ_HZ
}

/// Convert a pulse width into a number of PWM counts.
///
/// Returns `None` if the pulse can't be produced, i.e. it is zero or fills the whole period.
fn pulse_to_counts(pulse_us: u32, period_us: f64) -> Option<u16> {
    let counts = (pulse_us as f64 * MAX_PWM as f64 / period_us).round();

    if counts < 1.0 || counts >= MAX_PWM as f64 {
        None
    }
    else {
        Some(counts as u16)
    }
}

fn channel_from_id(id: u8) -> Result<Channel, ServoError> {
    Ok(match id {
        0 => Channel::C0,
        1 => Channel::C1,
        2 => Channel::C2,
        3 => Channel::C3,
        4 => Channel::C4,
        5 => Channel::C5,
        6 => Channel::C6,
        7 => Channel::C7,
        8 => Channel::C8,
        9 => Channel::C9,
        10 => Channel::C10,
        11 => Channel::C11,
        12 => Channel::C12,
        13 => Channel::C13,
        14 => Channel::C14,
        15 => Channel::C15,
        _ => return Err(ServoError::InvalidChannel(id))
    })
}

fn map_err<E>(e: pwm_pca9685::Error<E>) -> ServoError {
    match e {
        pwm_pca9685::Error::I2C(_) => ServoError::I2c,
        pwm_pca9685::Error::InvalidInputData => ServoError::InvalidPulse(0),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_prescale() {
        // 50 Hz is the usual servo frequency
        assert_eq!(prescale_for(50.0), Some(121));
        assert_eq!(prescale_for(1526.0), Some(3));
        assert_eq!(prescale_for(24.0), Some(253));

        assert_eq!(prescale_for(2000.0), None);
        assert_eq!(prescale_for(10.0), None);
        assert_eq!(prescale_for(0.0), None);
        assert_eq!(prescale_for(f64::NAN), None);
    }

    #[test]
    fn test_pulse_to_counts() {
        let period_us = period_us_for(121);
        assert!((period_us - 19988.48).abs() < 1e-6);

        assert_eq!(pulse_to_counts(1000, period_us), Some(205));
        assert_eq!(pulse_to_counts(1500, period_us), Some(307));
        assert_eq!(pulse_to_counts(2000, period_us), Some(410));

        assert_eq!(pulse_to_counts(0, period_us), None);
        assert_eq!(pulse_to_counts(20_000, period_us), None);
    }

    #[test]
    fn test_channel_from_id() {
        assert!(matches!(channel_from_id(0), Ok(Channel::C0)));
        assert!(matches!(channel_from_id(15), Ok(Channel::C15)));
        assert!(matches!(channel_from_id(16), Err(ServoError::InvalidChannel(16))));
    }
}
