//! # Utility library
//!
//! Session directories, logging, parameter files and time helpers shared by the tank and ground
//! executables.

// ---------------------------------------------------------------------------
// MODULES
// ---------------------------------------------------------------------------

pub mod host;
pub mod logger;
pub mod params;
pub mod session;
pub mod time;
