//! # Mechanisms Equipment Types

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Animation played by the LED board.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum LedMode {
    Off,
    Solid,
    Blink,
    Breathe,
    Rainbow,
}

/// Operating mode of the tank.
///
/// Only `Manual` accepts demands from the ground, the others are carried out on board.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum OperationMode {
    Manual,
    SonicAvoid,
    Line,
}

/// Actions of the gripper on the front of the tank.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum ClampAction {
    Stop,
    Pinch,
    Drop,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl LedMode {
    const ORDER: [LedMode; 5] = [
        LedMode::Off,
        LedMode::Solid,
        LedMode::Blink,
        LedMode::Breathe,
        LedMode::Rainbow,
    ];

    pub fn code(&self) -> u8 {
        match self {
            LedMode::Off => 0,
            LedMode::Solid => 1,
            LedMode::Blink => 2,
            LedMode::Breathe => 3,
            LedMode::Rainbow => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ORDER.get(code as usize).copied()
    }

    /// The mode after this one, wrapping back to `Off`.
    pub fn next(&self) -> Self {
        Self::ORDER[(self.code() as usize + 1) % Self::ORDER.len()]
    }
}

impl Default for LedMode {
    fn default() -> Self {
        LedMode::Off
    }
}

impl OperationMode {
    const ORDER: [OperationMode; 3] = [
        OperationMode::Manual,
        OperationMode::SonicAvoid,
        OperationMode::Line,
    ];

    pub fn code(&self) -> u8 {
        match self {
            OperationMode::Manual => 0,
            OperationMode::SonicAvoid => 1,
            OperationMode::Line => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ORDER.get(code as usize).copied()
    }

    pub fn next(&self) -> Self {
        Self::ORDER[(self.code() as usize + 1) % Self::ORDER.len()]
    }
}

impl Default for OperationMode {
    fn default() -> Self {
        OperationMode::Manual
    }
}

impl ClampAction {
    pub fn code(&self) -> u8 {
        match self {
            ClampAction::Stop => 0,
            ClampAction::Pinch => 1,
            ClampAction::Drop => 2,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(ClampAction::Stop),
            1 => Some(ClampAction::Pinch),
            2 => Some(ClampAction::Drop),
            _ => None,
        }
    }
}

impl Default for ClampAction {
    fn default() -> Self {
        ClampAction::Stop
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
