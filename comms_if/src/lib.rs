//! # Communications interface crate.
//!
//! Provides all common communications interfaces shared by the tank executable and the ground
//! executable.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command channel record codec and command vocabulary
pub mod tc;

/// Equipment types (actuator modes, sensors, camera) shared by both ends of the link
pub mod eqpt;

/// Network module
pub mod net;
