//! # Equipment
//!
//! Interfaces to the tank's hardware. The real drivers live outside this crate, only the simulated
//! implementations used for bench testing are provided here.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod mech;
pub mod sensors;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use mech::{ActuatorError, Actuators, SimActuators};
pub use sensors::{SensorError, SensorWorker, SimTelemetrySource, TelemetrySource};
