//! # Camera Equipment Types

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// JPEG start of image marker
const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];

/// JPEG end of image marker
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];

/// Smallest buffer that can hold a JPEG image.
const MIN_JPEG_LEN: usize = 10;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What the camera is currently doing with its frames. The two modes are mutually exclusive.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum VideoMode {
    /// Frames are handed to the stream server for viewers
    Live,

    /// Frames are written to the given file on the tank
    Record(PathBuf),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Check that a buffer looks like a complete JPEG image.
///
/// Some encoders pad after the end of image marker so only the start marker and the presence of
/// an end marker somewhere after it are required.
pub fn is_complete_jpeg(buf: &[u8]) -> bool {
    if buf.len() < MIN_JPEG_LEN || buf[..2] != JPEG_SOI {
        return false;
    }

    buf[2..].windows(2).rev().any(|w| w == JPEG_EOI)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_is_complete_jpeg() {
        let mut good = vec![0xFF, 0xD8];
        good.extend_from_slice(&[0u8; 10]);
        good.extend_from_slice(&[0xFF, 0xD9]);
        assert!(is_complete_jpeg(&good));

        // Trailing padding after EOI
        let mut padded = good.clone();
        padded.extend_from_slice(&[0, 0]);
        assert!(is_complete_jpeg(&padded));

        // Truncated
        assert!(!is_complete_jpeg(&good[..good.len() - 1]));
        assert!(!is_complete_jpeg(&[0xFF, 0xD8, 0xFF, 0xD9]));
        assert!(!is_complete_jpeg(&[0u8; 20]));
    }
}
