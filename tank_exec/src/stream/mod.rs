//! # Video Stream
//!
//! A single producer thread pulls frames from the [`VideoSource`] into a [`FrameBuffer`], and one
//! thread per viewer pushes the newest frame out to its socket. Viewers never hold up the producer
//! and a slow viewer simply misses frames.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod frame_buffer;
mod server;
mod video;

// ------------------------------------------------------------------------------------------------
// EXPORTS
// ------------------------------------------------------------------------------------------------

pub use frame_buffer::{Frame, FrameBuffer};
pub use server::{StreamControl, StreamServer, StreamServerError};
pub use video::{SimVideoSource, VideoError, VideoSource};
