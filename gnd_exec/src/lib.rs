//! # Ground library.
//!
//! The PC side of the tank link: the client session with its reconnection logic, the game
//! controller adapter, the video client and the console.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Console - interactive command line for driving the tank
pub mod console;

/// Controller adapter - maps game controller input onto tank commands
pub mod controller;

/// Parameters for the ground executable
pub mod params;

/// Client session - owns the command connection to the tank
pub mod session;

/// Video client - receives the camera stream from the tank
pub mod video_client;
