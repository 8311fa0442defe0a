//! # Helm Library
//!
//! Everything the helm exec needs to turn UDP throttle/rudder demands into servo pulses:
//!
//! - [`dems_server::DemsServer`] receives demands and applies the comms failsafe,
//! - [`dems_store::DemsStore`] holds the current demand shared between the two loops,
//! - [`servo_ctrl::ServoCtrl`] runs the fixed-rate output loop that drives the servos,
//! - [`exec::HelmExec`] wires them together and owns the startup/shutdown sequence.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Cooperative cancellation shared by the exec's threads.
pub mod cancel;

/// Demands server, the network side of the exec.
pub mod dems_server;

/// The single current demand shared between the server and the servo controller.
pub mod dems_store;

/// Startup and shutdown sequencing.
pub mod exec;

/// Parameters for the helm executable.
pub mod params;

/// Supply voltage checks performed before the servo power rail is enabled.
pub mod power;

/// Servo drivers and the output loop.
pub mod servo_ctrl;
