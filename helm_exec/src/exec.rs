//! # Helm Executable Orchestration
//!
//! Brings up the demands server and the servo output loop, runs them until cancelled, then shuts
//! everything down leaving the servos at neutral with the power rail disabled.
//!
//! The demands server runs on its own thread (`dems_server`), the output loop runs on the thread
//! which calls [`HelmExec::run`]. The two only share the [`DemsStore`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{net::SocketAddr, thread, time::Duration};

use comms_if::net::DemsSocketError;
use log::{debug, error, info, warn};

use crate::{
    cancel::{CancelOnDrop, CancelToken},
    dems_server::DemsServer,
    dems_store::DemsStore,
    params::{HelmExecParams, ParamsError},
    power::{check_supply, PowerError, SupplyCheck},
    servo_ctrl::{ServoCtrl, ServoDriver, ServoError},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// An initialised helm executable, ready to run.
pub struct HelmExec<D>
where
    D: ServoDriver
{
    server: DemsServer,

    ctrl: ServoCtrl<D>,

    cancel: CancelToken,

    dems_addr: SocketAddr,

    failsafe_bound: Duration,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(thiserror::Error, Debug)]
pub enum ExecError {
    #[error("Invalid parameters: {0}")]
    Params(#[from] ParamsError),

    #[error("Demands server error: {0}")]
    Server(#[from] DemsSocketError),

    #[error("Servo driver error: {0}")]
    Servo(#[from] ServoError),

    #[error("Power check failed: {0}")]
    Power(#[from] PowerError),

    #[error("Cancelled before startup completed")]
    Cancelled,

    #[error("Could not spawn the demands server thread: {0}")]
    Spawn(std::io::Error),

    #[error("The demands server thread panicked")]
    ServerPanicked,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl<D> HelmExec<D>
where
    D: ServoDriver
{
    /// Initialise the executable.
    ///
    /// The demands socket is bound first, so a bad endpoint is reported before the hardware is
    /// touched. The driver is then initialised, the supply is checked, the power rail is enabled
    /// and neutral pulses are sent.
    ///
    /// If the supply check is waiting for the battery and the token is cancelled this returns
    /// [`ExecError::Cancelled`].
    pub fn init(
        params: &HelmExecParams,
        mut driver: D,
        cancel: CancelToken
    ) -> Result<Self, ExecError> {
        params.validate()?;

        let store = DemsStore::new();
        let server = DemsServer::new(params, store.clone())?;
        let dems_addr = server.local_addr()?;
        info!("Demands server bound to {}", dems_addr);

        driver.init()?;
        info!("Servo driver initialised");

        if let Err(e) = power_up(&mut driver, params, &cancel) {
            if let Err(se) = driver.shutdown() {
                warn!("Could not shut down the servo driver: {}", se);
            }
            return Err(e);
        }

        let mut ctrl = ServoCtrl::new(
            driver,
            params.throttle_config(),
            params.rudder_config(),
            store,
            params.output_period(),
        );

        // Zero outputs at startup
        ctrl.make_safe();

        let failsafe_bound = params.failsafe_bound();
        info!("Failsafe bound is {:?}", failsafe_bound);

        Ok(Self {
            server,
            ctrl,
            cancel,
            dems_addr,
            failsafe_bound,
        })
    }

    /// The address demands should be sent to.
    pub fn dems_addr(&self) -> SocketAddr {
        self.dems_addr
    }

    /// Longest time from the last valid demand to neutral pulses being sent.
    pub fn failsafe_bound(&self) -> Duration {
        self.failsafe_bound
    }

    /// Run until the cancellation token is cancelled.
    ///
    /// If the demands server thread exits for any reason the token is cancelled, so the output
    /// loop never keeps running without a listener.
    pub fn run(self) -> Result<(), ExecError> {
        let HelmExec { mut server, mut ctrl, cancel, .. } = self;

        let spawn_result = {
            let cancel = cancel.clone();
            thread::Builder::new()
                .name("dems_server".into())
                .spawn(move || {
                    let _guard = CancelOnDrop(cancel.clone());
                    server.run(&cancel);
                })
        };

        let handle = match spawn_result {
            Ok(h) => h,
            Err(e) => {
                ctrl.make_safe();
                if let Err(re) = ctrl.release() {
                    warn!("Could not release the servo driver: {}", re);
                }
                return Err(ExecError::Spawn(e));
            }
        };

        info!("Initialisation complete, entering main loop in safe mode");

        ctrl.run(&cancel);

        info!("Shutting down");

        ctrl.make_safe();
        let join_result = handle.join();
        debug!("Demands server thread joined");

        let release_result = ctrl.release();

        if join_result.is_err() {
            error!("The demands server thread panicked");
            return Err(ExecError::ServerPanicked);
        }

        release_result?;

        info!("Shutdown complete");

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check the supply and enable the power rail.
fn power_up<D>(
    driver: &mut D,
    params: &HelmExecParams,
    cancel: &CancelToken
) -> Result<(), ExecError>
where
    D: ServoDriver
{
    match check_supply(driver, &params.supply, cancel)? {
        SupplyCheck::Cancelled => return Err(ExecError::Cancelled),
        SupplyCheck::Sufficient(_) | SupplyCheck::Unchecked => ()
    }

    driver.enable_power(true)?;
    info!("Servo power rail enabled");

    Ok(())
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
