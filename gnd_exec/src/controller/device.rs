//! # Controller input devices
//!
//! A device reports a snapshot of its sticks and buttons each time it's polled. Axes are in the
//! range [-1, 1] as reported by the controller, so stick up is negative on most pads.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::{fs::File, io::BufReader, path::Path};
use thiserror::Error;

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

pub trait InputDevice: Send {
    fn poll(&mut self) -> Result<ControllerState, InputError>;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ControllerState {
    pub left_x: f64,
    pub left_y: f64,
    pub right_x: f64,
    pub right_y: f64,
    pub buttons: Buttons,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Buttons {
    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,
    pub back: bool,
    pub start: bool,
    pub dpad_up: bool,
    pub dpad_down: bool,
    pub dpad_left: bool,
    pub dpad_right: bool,
}

/// One step of a script, a state held for a number of polls.
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptFrame {
    #[serde(default = "one")]
    pub ticks: u32,

    #[serde(default)]
    pub state: ControllerState,
}

/// Device which replays a fixed sequence of states, used for demos and tests.
///
/// Scripts are JSON lists of `{"ticks": n, "state": {...}}` objects.
pub struct ScriptedDevice {
    frames: Vec<ScriptFrame>,
    index: usize,
    ticks_done: u32,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum InputError {
    #[error("The controller has been disconnected")]
    Disconnected,

    #[error("The controller script has finished")]
    Exhausted,

    #[error("Could not load the controller script: {0}")]
    ScriptLoad(std::io::Error),

    #[error("Could not parse the controller script: {0}")]
    ScriptParse(serde_json::Error),

    #[error("Could not open the gamepad: {0}")]
    Gamepad(String),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ScriptedDevice {
    pub fn from_frames(frames: Vec<ScriptFrame>) -> Self {
        Self {
            frames,
            index: 0,
            ticks_done: 0,
        }
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, InputError> {
        let file = File::open(path).map_err(InputError::ScriptLoad)?;
        let frames = serde_json::from_reader(BufReader::new(file)).map_err(InputError::ScriptParse)?;
        Ok(Self::from_frames(frames))
    }
}

impl InputDevice for ScriptedDevice {
    fn poll(&mut self) -> Result<ControllerState, InputError> {
        loop {
            let frame = self.frames.get(self.index).ok_or(InputError::Exhausted)?;

            if self.ticks_done < frame.ticks {
                self.ticks_done += 1;
                return Ok(frame.state);
            }

            self.index += 1;
            self.ticks_done = 0;
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

fn one() -> u32 {
    1
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_script_replay() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"ticks": 2, "state": {{"left_y": -1.0}}}},
                {{"ticks": 0, "state": {{"left_y": 0.5}}}},
                {{"state": {{"buttons": {{"a": true}}}}}}
            ]"#
        )
        .unwrap();

        let mut dev = ScriptedDevice::from_path(file.path()).unwrap();

        assert_eq!(dev.poll().unwrap().left_y, -1.0);
        assert_eq!(dev.poll().unwrap().left_y, -1.0);

        let s = dev.poll().unwrap();
        assert_eq!(s.left_y, 0.0);
        assert!(s.buttons.a);

        assert!(matches!(dev.poll(), Err(InputError::Exhausted)));
        assert!(matches!(dev.poll(), Err(InputError::Exhausted)));
    }

    #[test]
    fn test_bad_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{\"not\": \"a list\"}}").unwrap();

        assert!(matches!(
            ScriptedDevice::from_path(file.path()),
            Err(InputError::ScriptParse(_))
        ));
        assert!(matches!(
            ScriptedDevice::from_path("/does/not/exist.json"),
            Err(InputError::ScriptLoad(_))
        ));
    }

    #[test]
    fn test_shipped_script() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../scripts/square_drive.json");
        let mut dev = ScriptedDevice::from_path(path).unwrap();

        let mut polls = 0;
        while dev.poll().is_ok() {
            polls += 1;
        }
        assert!(polls > 0);
    }
}
