//! # Startup Power Check
//!
//! The servos must not be powered from a flat battery, so the supply voltage is checked before the
//! power rail is enabled.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use util::time::secs_to_duration;

use crate::{
    cancel::CancelToken,
    params::{SupplyParams, SupplyPolicy},
    servo_ctrl::{ServoDriver, ServoError},
};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Outcome of a successful power check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SupplyCheck {
    /// The supply was measured at the given voltage, which is sufficient
    Sufficient(f64),

    /// The driver cannot measure the supply so it was not checked
    Unchecked,

    /// The exec was cancelled while waiting for the supply
    Cancelled,
}

#[derive(thiserror::Error, Debug)]
pub enum PowerError {
    #[error("The supply is at {measured:.2} V but at least {required:.2} V is required")]
    InsufficientSupply {
        measured: f64,
        required: f64,
    },

    #[error("Could not read the supply voltage: {0}")]
    Driver(ServoError),

    #[error("The supply poll interval of {0} s is invalid")]
    InvalidPollInterval(f64),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check the servo supply voltage according to the supply policy.
///
/// Under [`SupplyPolicy::BlockAndPoll`] this only returns once the supply is sufficient or the
/// token is cancelled.
pub fn check_supply<D>(
    driver: &mut D,
    params: &SupplyParams,
    cancel: &CancelToken,
) -> Result<SupplyCheck, PowerError>
where
    D: ServoDriver + ?Sized
{
    loop {
        let measured = match driver.read_supply_voltage() {
            Ok(v) => v,
            Err(ServoError::Unsupported(what)) => {
                warn!("Servo driver does not support {}, skipping the supply check", what);
                return Ok(SupplyCheck::Unchecked);
            },
            Err(e) => return Err(PowerError::Driver(e))
        };

        if measured >= params.min_voltage_v {
            info!("Servo supply at {:.2} V", measured);
            return Ok(SupplyCheck::Sufficient(measured));
        }

        match params.policy {
            SupplyPolicy::FailFast => return Err(PowerError::InsufficientSupply {
                measured,
                required: params.min_voltage_v,
            }),
            SupplyPolicy::BlockAndPoll => {
                let poll_interval = secs_to_duration(params.poll_interval_s)
                    .ok_or(PowerError::InvalidPollInterval(params.poll_interval_s))?;

                warn!(
                    "Servo supply at {:.2} V, waiting for at least {:.2} V",
                    measured, params.min_voltage_v
                );
                if cancel.sleep(poll_interval) {
                    return Ok(SupplyCheck::Cancelled);
                }
            }
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
