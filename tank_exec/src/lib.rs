//! # Tank library.
//!
//! Everything that runs on board the tank: the command server, the hardware dispatch loop which
//! owns the actuators and sensors, and the video stream server.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Command server - accepts the control session from the ground and answers its commands
pub mod cmd_server;

/// Hardware dispatch - the only thing allowed to touch the actuators
pub mod dispatch;

/// Equipment - actuator and sensor interfaces with their simulated implementations
pub mod eqpt;

/// Parameters for the tank executable
pub mod params;

/// Video stream server - hands camera frames out to viewers
pub mod stream;
