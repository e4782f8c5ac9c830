//! # Command vocabulary
//!
//! The fixed set of commands the tank understands, their wire tags and parameter arity, and the
//! typed [`Command`] parsed out of a [`CommandRecord`].

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use super::CommandRecord;
use crate::eqpt::{ClampAction, LedMode, OperationMode, SensorId};

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

/// Names of all commands in the vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CmdName {
    Motor,
    Servo,
    Led,
    LedMode,
    Mode,
    Action,
    Sonic,
    Line,
    Power,
    Stop,
    Record,
    Heartbeat,

    /// Track speeds pushed by the tank as telemetry, never sent as a command
    MotorState,
}

/// Reason tokens carried as the first payload field of an `ERR` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrReason {
    /// The line could not be decoded or named no known command
    DecodeError,

    /// Wrong number of parameters, or a parameter that doesn't parse
    BadParams,

    /// Servo or LED index outside the configured range
    BadIndex,

    /// A hardware read stalled past its timeout
    Timeout,

    /// A hardware read failed
    SensorFault,

    /// Another client already holds the control session
    Busy,

    /// The requested equipment is not fitted or not running
    Unavailable,
}

/// A typed command.
///
/// Numeric values are kept wide so that out of range demands can be clamped by the tank rather
/// than rejected here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Left and right track speeds
    Motor { left: i64, right: i64 },

    /// Servo channel and angle in degrees
    Servo { index: usize, angle: i64 },

    /// LED index and colour channels
    Led { index: usize, rgb: [i64; 3] },

    LedMode(LedMode),

    Mode(OperationMode),

    Action(ClampAction),

    /// Read-only sensor query
    Query(SensorId),

    Stop,

    /// `true` switches the camera to recording, `false` back to live streaming
    Record(bool),

    Heartbeat,
}

/// Errors raised when a decoded record isn't a valid command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("{0:?} is not a recognised command")]
    UnknownName(String),

    #[error("{name} expects {expected} parameters, found {found}")]
    BadArity {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Parameter {index} of {name} is invalid: {value:?}")]
    BadParam {
        name: &'static str,
        index: usize,
        value: String,
    },
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl CmdName {
    pub const ALL: [CmdName; 13] = [
        CmdName::Motor,
        CmdName::Servo,
        CmdName::Led,
        CmdName::LedMode,
        CmdName::Mode,
        CmdName::Action,
        CmdName::Sonic,
        CmdName::Line,
        CmdName::Power,
        CmdName::Stop,
        CmdName::Record,
        CmdName::Heartbeat,
        CmdName::MotorState,
    ];

    /// The tag used on the wire.
    pub fn as_wire(&self) -> &'static str {
        match self {
            CmdName::Motor => "CMD_MOTOR",
            CmdName::Servo => "CMD_SERVO",
            CmdName::Led => "CMD_LED",
            CmdName::LedMode => "CMD_LED_MOD",
            CmdName::Mode => "CMD_MODE",
            CmdName::Action => "CMD_ACTION",
            CmdName::Sonic => "CMD_SONIC",
            CmdName::Line => "CMD_LINE",
            CmdName::Power => "CMD_POWER",
            CmdName::Stop => "CMD_STOP",
            CmdName::Record => "CMD_RECORD",
            CmdName::Heartbeat => "CMD_HEARTBEAT",
            CmdName::MotorState => "CMD_MOTOR_STATE",
        }
    }

    pub fn from_wire(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|n| n.as_wire() == s)
    }

    /// Number of parameters the command carries.
    pub fn arity(&self) -> usize {
        match self {
            CmdName::Motor | CmdName::Servo => 2,
            CmdName::Led => 4,
            CmdName::LedMode | CmdName::Mode | CmdName::Action | CmdName::Record => 1,
            CmdName::Sonic | CmdName::Line | CmdName::Power => 0,
            CmdName::Stop | CmdName::Heartbeat => 0,
            CmdName::MotorState => 2,
        }
    }

    /// Commands which move the tank. These must never be replayed after a reconnect.
    pub fn is_motion(&self) -> bool {
        matches!(self, CmdName::Motor)
    }

    /// Names which the tank also pushes unsolicited as telemetry.
    pub fn is_telemetry(&self) -> bool {
        matches!(
            self,
            CmdName::Sonic | CmdName::Line | CmdName::Power | CmdName::MotorState
        )
    }

    /// Names which only ever appear in telemetry, the tank refuses them as commands.
    pub fn is_push_only(&self) -> bool {
        matches!(self, CmdName::MotorState)
    }
}

impl ErrReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrReason::DecodeError => "DecodeError",
            ErrReason::BadParams => "BadParams",
            ErrReason::BadIndex => "BadIndex",
            ErrReason::Timeout => "Timeout",
            ErrReason::SensorFault => "SensorFault",
            ErrReason::Busy => "Busy",
            ErrReason::Unavailable => "Unavailable",
        }
    }
}

impl Command {
    /// Validate a decoded record against the vocabulary.
    pub fn parse(record: &CommandRecord) -> Result<Self, CommandError> {
        let name = CmdName::from_wire(&record.name)
            .filter(|n| !n.is_push_only())
            .ok_or_else(|| CommandError::UnknownName(record.name.clone()))?;
        let wire = name.as_wire();

        if record.params.len() != name.arity() {
            return Err(CommandError::BadArity {
                name: wire,
                expected: name.arity(),
                found: record.params.len(),
            });
        }

        let p = &record.params;

        Ok(match name {
            CmdName::Motor => Command::Motor {
                left: param(wire, p, 0)?,
                right: param(wire, p, 1)?,
            },
            CmdName::Servo => Command::Servo {
                index: param(wire, p, 0)?,
                angle: param(wire, p, 1)?,
            },
            CmdName::Led => Command::Led {
                index: param(wire, p, 0)?,
                rgb: [param(wire, p, 1)?, param(wire, p, 2)?, param(wire, p, 3)?],
            },
            CmdName::LedMode => Command::LedMode(
                LedMode::from_code(param(wire, p, 0)?).ok_or_else(|| bad(wire, p, 0))?,
            ),
            CmdName::Mode => Command::Mode(
                OperationMode::from_code(param(wire, p, 0)?).ok_or_else(|| bad(wire, p, 0))?,
            ),
            CmdName::Action => Command::Action(
                ClampAction::from_code(param(wire, p, 0)?).ok_or_else(|| bad(wire, p, 0))?,
            ),
            CmdName::Record => match param::<u8>(wire, p, 0)? {
                0 => Command::Record(false),
                1 => Command::Record(true),
                _ => return Err(bad(wire, p, 0)),
            },
            CmdName::Sonic => Command::Query(SensorId::Sonic),
            CmdName::Line => Command::Query(SensorId::Line),
            CmdName::Power => Command::Query(SensorId::Power),
            CmdName::Stop => Command::Stop,
            CmdName::Heartbeat => Command::Heartbeat,
            CmdName::MotorState => return Err(CommandError::UnknownName(record.name.clone())),
        })
    }

    pub fn name(&self) -> CmdName {
        match self {
            Command::Motor { .. } => CmdName::Motor,
            Command::Servo { .. } => CmdName::Servo,
            Command::Led { .. } => CmdName::Led,
            Command::LedMode(_) => CmdName::LedMode,
            Command::Mode(_) => CmdName::Mode,
            Command::Action(_) => CmdName::Action,
            Command::Query(s) => s.cmd_name(),
            Command::Stop => CmdName::Stop,
            Command::Record(_) => CmdName::Record,
            Command::Heartbeat => CmdName::Heartbeat,
        }
    }

    /// Build the record which is sent on the wire for this command.
    pub fn to_record(&self) -> CommandRecord {
        let params = match self {
            Command::Motor { left, right } => vec![left.to_string(), right.to_string()],
            Command::Servo { index, angle } => vec![index.to_string(), angle.to_string()],
            Command::Led { index, rgb } => {
                let mut v = vec![index.to_string()];
                v.extend(rgb.iter().map(|c| c.to_string()));
                v
            }
            Command::LedMode(m) => vec![m.code().to_string()],
            Command::Mode(m) => vec![m.code().to_string()],
            Command::Action(a) => vec![a.code().to_string()],
            Command::Record(on) => vec![if *on { "1" } else { "0" }.to_string()],
            Command::Query(_) | Command::Stop | Command::Heartbeat => vec![],
        };

        CommandRecord::new(self.name().as_wire(), params)
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn param<T: FromStr>(name: &'static str, params: &[String], index: usize) -> Result<T, CommandError> {
    params[index].trim().parse().map_err(|_| bad(name, params, index))
}

fn bad(name: &'static str, params: &[String], index: usize) -> CommandError {
    CommandError::BadParam {
        name,
        index,
        value: params[index].clone(),
    }
}

// ---------------------------------------------------------------------------
// TESTS
// ---------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    fn record(line: &str) -> CommandRecord {
        CommandRecord::decode(line.as_bytes(), 256).unwrap()
    }

    #[test]
    fn test_wire_names_are_unique() {
        for a in CmdName::ALL.iter() {
            assert_eq!(CmdName::from_wire(a.as_wire()), Some(*a));
            for b in CmdName::ALL.iter() {
                if a != b {
                    assert_ne!(a.as_wire(), b.as_wire());
                }
            }
        }
        assert_eq!(CmdName::from_wire("GARBAGE"), None);
    }

    #[test]
    fn test_parse_motor() {
        assert_eq!(
            Command::parse(&record("CMD_MOTOR#5000#-5000\n")),
            Ok(Command::Motor {
                left: 5000,
                right: -5000
            })
        );
    }

    #[test]
    fn test_parse_arity() {
        assert_eq!(
            Command::parse(&record("CMD_MOTOR#5000\n")),
            Err(CommandError::BadArity {
                name: "CMD_MOTOR",
                expected: 2,
                found: 1
            })
        );
        assert!(matches!(
            Command::parse(&record("CMD_STOP#1\n")),
            Err(CommandError::BadArity { .. })
        ));
    }

    #[test]
    fn test_parse_bad_values() {
        assert!(matches!(
            Command::parse(&record("CMD_SERVO#zero#90\n")),
            Err(CommandError::BadParam { index: 0, .. })
        ));
        assert!(matches!(
            Command::parse(&record("CMD_LED_MOD#9\n")),
            Err(CommandError::BadParam { .. })
        ));
        assert!(matches!(
            Command::parse(&record("CMD_RECORD#2\n")),
            Err(CommandError::BadParam { .. })
        ));
        assert_eq!(
            Command::parse(&record("GARBAGE\n")),
            Err(CommandError::UnknownName("GARBAGE".into()))
        );
    }

    #[test]
    fn test_motor_state_is_not_a_command() {
        assert!(CmdName::MotorState.is_telemetry());
        assert_eq!(
            CmdName::from_wire("CMD_MOTOR_STATE"),
            Some(CmdName::MotorState)
        );
        assert_eq!(
            Command::parse(&record("CMD_MOTOR_STATE#10#10\n")),
            Err(CommandError::UnknownName("CMD_MOTOR_STATE".into()))
        );
    }

    #[test]
    fn test_to_record_parses_back() {
        let cmds = vec![
            Command::Motor {
                left: -100,
                right: 250,
            },
            Command::Servo { index: 1, angle: 140 },
            Command::Led {
                index: 2,
                rgb: [255, 0, 10],
            },
            Command::LedMode(LedMode::Rainbow),
            Command::Mode(OperationMode::Line),
            Command::Action(ClampAction::Pinch),
            Command::Query(SensorId::Power),
            Command::Record(true),
            Command::Stop,
        ];

        for c in cmds {
            assert_eq!(Command::parse(&c.to_record()), Ok(c));
        }
    }
}
