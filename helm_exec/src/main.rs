//! # Helm Executable
//!
//! This executable drives the boat's throttle (ESC) and rudder servo from demands received over
//! UDP. Each demand is a single ASCII datagram `"<throttle>,<rudder>"` with the throttle in
//! percent `[0, 100]` and the rudder in percent `[-100, 100]`.
//!
//! If no valid demand is received within the failsafe timeout both channels are returned to
//! neutral (throttle off, rudder centred) until demands resume.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

// External
use color_eyre::{Report, Result, eyre::WrapErr};
use log::info;

// Internal
use helm_lib::{
    cancel::CancelToken,
    exec::{ExecError, HelmExec},
    params::{DriverKind, HelmExecParams},
    servo_ctrl::{pca9685, sim::SimDriver, ServoDriver},
};
use util::{
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ------------------------------------------------------------------------------------------------
// MAIN
// ------------------------------------------------------------------------------------------------

fn main() -> Result<()> {

    // ---- EARLY INITIALISATION ----

    color_eyre::install()?;

    // Initialise session
    let session = Session::new(
        "helm_exec", 
        "sessions"
    ).wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Debug, &session)
        .wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Helm Executable\n");
    info!("Session directory: {:?}\n", session.session_root);

    info!("Initialising...");

    // ---- LOAD PARAMETERS ----

    let params: HelmExecParams = util::params::load("helm_exec.toml")
        .wrap_err("Failed to load the parameters")?;
    params.validate().wrap_err("Invalid parameters")?;

    info!("Parameters loaded");

    // ---- SIGNAL HANDLING ----

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            info!("Interrupt received");
            cancel.cancel();
        }).wrap_err("Failed to set the interrupt handler")?;
    }

    // ---- EQUIPMENT INITIALISATION ----

    let driver: Box<dyn ServoDriver + Send> = match params.driver {
        DriverKind::Sim => {
            info!("Using the simulated servo driver");
            Box::new(SimDriver::new(params.sim.supply_voltage_v))
        },
        DriverKind::Pca9685 => {
            info!(
                "Using the PCA9685 servo driver on I2C bus {} address {:#04x}",
                params.pca9685.i2c_bus,
                params.pca9685.address
            );
            pca9685::open(&params.pca9685).wrap_err("Failed to open the PCA9685")?
        }
    };

    let exec = match HelmExec::init(&params, driver, cancel) {
        Ok(e) => e,
        Err(ExecError::Cancelled) => {
            info!("Cancelled during initialisation, exiting");
            return Ok(())
        },
        Err(e) => {
            return Err(Report::new(e).wrap_err("Failed to initialise the helm exec"))
        }
    };

    info!("Send demands to {}", exec.dems_addr());

    // ---- MAIN LOOP ----

    exec.run().wrap_err("Helm exec failed")?;

    Ok(())
}
