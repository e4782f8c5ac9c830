//! # Sensor Equipment Types

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use crate::tc::CmdName;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Sensors that can be polled on the tank.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum SensorId {
    /// Ultrasonic rangefinder, centimetres
    Sonic,

    /// Line-follow infrared array, a 3 bit mask (left = 4, middle = 2, right = 1)
    Line,

    /// Battery voltage, volts
    Power,
}

// -----------------------------------------------------------------------------------------------
// IMPLS
// -----------------------------------------------------------------------------------------------

impl SensorId {
    pub const ALL: [SensorId; 3] = [SensorId::Sonic, SensorId::Line, SensorId::Power];

    /// The command used to query this sensor, which is also the name of its telemetry record.
    pub fn cmd_name(&self) -> CmdName {
        match self {
            SensorId::Sonic => CmdName::Sonic,
            SensorId::Line => CmdName::Line,
            SensorId::Power => CmdName::Power,
        }
    }

    /// Format a reading for the wire.
    pub fn format_reading(&self, value: f64) -> String {
        match self {
            SensorId::Sonic => format!("{:.1}", value),
            SensorId::Line => format!("{}", value.round().max(0.0).min(7.0) as u8),
            SensorId::Power => format!("{:.2}", value),
        }
    }
}

// -----------------------------------------------------------------------------------------------
// TESTS
// -----------------------------------------------------------------------------------------------
