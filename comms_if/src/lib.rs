//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Demand definitions for equipment (like the servos)
pub mod eqpt;

/// Network module
pub mod net;
