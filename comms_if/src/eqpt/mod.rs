//! # Equipment Interface
//!
//! This module defines the equipment types which are shared by the tank and ground executables.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod cam;
pub mod mech;
pub mod sensor;

// -----------------------------------------------------------------------------------------------
// EXPORTS
// -----------------------------------------------------------------------------------------------

pub use mech::{ClampAction, LedMode, OperationMode};
pub use sensor::SensorId;
