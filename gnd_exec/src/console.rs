//! # Console
//!
//! Interactive command line for driving the tank by hand. Each line is parsed as a subcommand,
//! turned into a tank command and pushed into the client session, the same way the controller
//! does. Session events are printed by a separate thread as they arrive.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use rustyline::{error::ReadlineError, DefaultEditor};
use std::{
    path::{Path, PathBuf},
    sync::mpsc::Receiver,
    thread::{self, JoinHandle},
};
use structopt::{clap::AppSettings, StructOpt};
use thiserror::Error;

use comms_if::{
    eqpt::{ClampAction, LedMode, OperationMode, SensorId},
    tc::{CmdName, Command, CommandRecord, ResponseRecord, Status, DEFAULT_MAX_LINE_LEN},
};

use crate::{
    session::{ClientSession, SessionEvent},
    video_client::VideoToggle,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

const PROMPT: &str = "tank $ ";

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "tank",
    global_settings = &[
        AppSettings::AllowNegativeNumbers,
        AppSettings::DisableVersion,
        AppSettings::VersionlessSubcommands
    ]
)]
enum ConsoleCmd {
    /// Set the left and right track speeds
    Motor { left: i64, right: i64 },

    /// Move a servo to an angle in degrees
    Servo { index: usize, angle: i64 },

    /// Set the colour of one LED
    Led { index: usize, r: i64, g: i64, b: i64 },

    /// Set the LED animation (off, solid, blink, breathe, rainbow)
    Ledmode {
        #[structopt(parse(try_from_str = parse_led_mode))]
        mode: LedMode,
    },

    /// Set the operation mode (manual, sonic, line)
    Mode {
        #[structopt(parse(try_from_str = parse_op_mode))]
        mode: OperationMode,
    },

    /// Close the clamp
    Pinch,

    /// Open the clamp
    Drop,

    /// Read the ultrasonic distance
    Sonic,

    /// Read the line sensors
    Line,

    /// Read the battery voltage
    Power,

    /// Stop all motors
    Stop,

    /// Switch the camera between recording (on) and live streaming (off)
    Record {
        #[structopt(parse(try_from_str = parse_on_off))]
        on: bool,
    },

    /// Send a line exactly as typed, without checking it
    Raw {
        #[structopt(required = true)]
        words: Vec<String>,
    },

    /// Show the connection and video status
    Status,

    /// Turn the video viewer on or off
    Video,

    /// Save the latest video frame as a JPEG
    Snapshot {
        #[structopt(parse(from_os_str))]
        path: PathBuf,
    },

    /// Drop the connection and connect again
    Reconnect,

    /// Leave the console
    #[structopt(alias = "exit")]
    Quit,
}

/// What a console line asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Send(Command),
    Raw(CommandRecord),
    Status,
    ToggleVideo,
    Snapshot(PathBuf),
    Reconnect,
    Quit,
}

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error("Console input error: {0}")]
    Readline(#[from] ReadlineError),

    #[error("Could not start the event printer: {0}")]
    ThreadError(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Parse one console line. Blank lines give `Ok(None)`, the error carries text for the user,
/// which includes help output.
pub fn parse_line(line: &str) -> Result<Option<ConsoleAction>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    if words.is_empty() {
        return Ok(None);
    }

    let cmd = ConsoleCmd::from_iter_safe(std::iter::once("tank").chain(words))
        .map_err(|e| e.message)?;

    let action = match cmd {
        ConsoleCmd::Motor { left, right } => ConsoleAction::Send(Command::Motor { left, right }),
        ConsoleCmd::Servo { index, angle } => ConsoleAction::Send(Command::Servo { index, angle }),
        ConsoleCmd::Led { index, r, g, b } => ConsoleAction::Send(Command::Led {
            index,
            rgb: [r, g, b],
        }),
        ConsoleCmd::Ledmode { mode } => ConsoleAction::Send(Command::LedMode(mode)),
        ConsoleCmd::Mode { mode } => ConsoleAction::Send(Command::Mode(mode)),
        ConsoleCmd::Pinch => ConsoleAction::Send(Command::Action(ClampAction::Pinch)),
        ConsoleCmd::Drop => ConsoleAction::Send(Command::Action(ClampAction::Drop)),
        ConsoleCmd::Sonic => ConsoleAction::Send(Command::Query(SensorId::Sonic)),
        ConsoleCmd::Line => ConsoleAction::Send(Command::Query(SensorId::Line)),
        ConsoleCmd::Power => ConsoleAction::Send(Command::Query(SensorId::Power)),
        ConsoleCmd::Stop => ConsoleAction::Send(Command::Stop),
        ConsoleCmd::Record { on } => ConsoleAction::Send(Command::Record(on)),
        ConsoleCmd::Raw { words } => {
            let record = CommandRecord::decode(words.join(" ").as_bytes(), DEFAULT_MAX_LINE_LEN)
                .map_err(|e| e.to_string())?;
            ConsoleAction::Raw(record)
        }
        ConsoleCmd::Status => ConsoleAction::Status,
        ConsoleCmd::Video => ConsoleAction::ToggleVideo,
        ConsoleCmd::Snapshot { path } => ConsoleAction::Snapshot(path),
        ConsoleCmd::Reconnect => ConsoleAction::Reconnect,
        ConsoleCmd::Quit => ConsoleAction::Quit,
    };

    Ok(Some(action))
}

/// Run the console on the current thread until the user quits.
pub fn run_console(
    session: &ClientSession,
    video: &VideoToggle,
    history_path: &Path,
) -> Result<(), ConsoleError> {
    let mut rl = DefaultEditor::new()?;
    if rl.load_history(history_path).is_err() {
        debug!("No console history at {:?}", history_path);
    }

    println!("Tank console, type `help` for a list of commands");

    loop {
        let line = match rl.readline(PROMPT) {
            Ok(l) => l,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };

        if !line.trim().is_empty() {
            rl.add_history_entry(line.as_str())?;
        }

        let action = match parse_line(&line) {
            Ok(Some(a)) => a,
            Ok(None) => continue,
            Err(msg) => {
                println!("{}", msg);
                continue;
            }
        };

        debug!("Console action: {:?}", action);

        let sent = match action {
            ConsoleAction::Send(cmd) => session.send(&cmd),
            ConsoleAction::Raw(record) => session.send_record(record),
            ConsoleAction::Reconnect => session.reconnect(),
            ConsoleAction::Status => {
                print_status(session, video);
                Ok(())
            }
            ConsoleAction::ToggleVideo => {
                match video.toggle() {
                    Ok(true) => println!("Video on"),
                    Ok(false) => println!("Video off"),
                    Err(e) => println!("{}", e),
                }
                Ok(())
            }
            ConsoleAction::Snapshot(path) => {
                match video.snapshot(&path) {
                    Ok(n) => println!("Saved {} bytes to {:?}", n, path),
                    Err(e) => println!("{}", e),
                }
                Ok(())
            }
            ConsoleAction::Quit => break,
        };

        if let Err(e) = sent {
            println!("{}", e);
            break;
        }
    }

    if let Err(e) = rl.save_history(history_path) {
        warn!("Could not save console history: {}", e);
    }

    info!("Console closed");

    Ok(())
}

/// Print session events as they arrive. The thread ends when the session is dropped.
pub fn spawn_event_printer(
    events: Receiver<SessionEvent>,
) -> Result<JoinHandle<()>, ConsoleError> {
    thread::Builder::new()
        .name("event_printer".into())
        .spawn(move || {
            for event in events.iter() {
                println!("{}", format_event(&event));
            }
        })
        .map_err(ConsoleError::ThreadError)
}

/// Text shown to the user for a session event.
pub fn format_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::StateChanged(s) => format!("[link] {:?}", s),
        SessionEvent::Response(r) => describe(r),
        SessionEvent::Telemetry(r) => format!("[telemetry] {}", describe(r)),
        SessionEvent::Error(e) => format!("[error] {}", e),
    }
}

fn describe(record: &ResponseRecord) -> String {
    if record.status == Status::Err {
        return format!(
            "{} failed: {}",
            record.name,
            record.reason().unwrap_or("no reason given")
        );
    }

    let value = record.payload.first().map(|s| s.as_str()).unwrap_or("");

    match CmdName::from_wire(&record.name) {
        Some(CmdName::Sonic) => format!("Distance: {} cm", value),
        Some(CmdName::Line) => match value.parse::<u8>() {
            Ok(mask) => format!("Line sensors: {:03b}", mask),
            Err(_) => format!("Line sensors: {}", value),
        },
        Some(CmdName::Power) => format!("Battery: {} V", value),
        Some(CmdName::MotorState) => format!("Tracks: {}", record.payload.join(" ")),
        _ if record.payload.is_empty() => format!("{} OK", record.name),
        _ => format!("{} OK {}", record.name, record.payload.join(" ")),
    }
}

fn print_status(session: &ClientSession, video: &VideoToggle) {
    println!("Link: {:?}", session.state());
    if let Some(e) = session.last_error() {
        println!("Last error: {}", e);
    }

    match video.stats() {
        Some(s) => {
            println!(
                "Video: {}, {} frames, {} corrupt",
                if s.connected { "connected" } else { "not connected" },
                s.frames,
                s.corrupt
            );
            if let Some((w, h)) = s.resolution {
                println!("Resolution: {}x{}", w, h);
            }
            if let Some(e) = s.last_error {
                println!("Video error: {}", e);
            }
        }
        None => println!("Video: off"),
    }
}

fn parse_led_mode(s: &str) -> Result<LedMode, String> {
    let mode = match s {
        "off" => Some(LedMode::Off),
        "solid" => Some(LedMode::Solid),
        "blink" => Some(LedMode::Blink),
        "breathe" => Some(LedMode::Breathe),
        "rainbow" => Some(LedMode::Rainbow),
        _ => s.parse().ok().and_then(LedMode::from_code),
    };
    mode.ok_or_else(|| format!("Unknown LED mode {:?}", s))
}

fn parse_op_mode(s: &str) -> Result<OperationMode, String> {
    let mode = match s {
        "manual" => Some(OperationMode::Manual),
        "sonic" => Some(OperationMode::SonicAvoid),
        "line" => Some(OperationMode::Line),
        _ => s.parse().ok().and_then(OperationMode::from_code),
    };
    mode.ok_or_else(|| format!("Unknown operation mode {:?}", s))
}

fn parse_on_off(s: &str) -> Result<bool, String> {
    match s {
        "on" | "1" => Ok(true),
        "off" | "0" => Ok(false),
        _ => Err(format!("Expected on or off, found {:?}", s)),
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::session::{SessionError, SessionState};
    use comms_if::tc::ErrReason;

    fn action(line: &str) -> ConsoleAction {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            action("motor -1000 1000"),
            ConsoleAction::Send(Command::Motor {
                left: -1000,
                right: 1000
            })
        );
        assert_eq!(
            action("led 2 255 0 300"),
            ConsoleAction::Send(Command::Led {
                index: 2,
                rgb: [255, 0, 300]
            })
        );
        assert_eq!(
            action("ledmode rainbow"),
            ConsoleAction::Send(Command::LedMode(LedMode::Rainbow))
        );
        assert_eq!(
            action("mode 1"),
            ConsoleAction::Send(Command::Mode(OperationMode::SonicAvoid))
        );
        assert_eq!(
            action("record on"),
            ConsoleAction::Send(Command::Record(true))
        );
        assert_eq!(
            action("  power "),
            ConsoleAction::Send(Command::Query(SensorId::Power))
        );
        assert_eq!(action("exit"), ConsoleAction::Quit);
    }

    #[test]
    fn test_parse_raw() {
        assert_eq!(
            action("raw GARBAGE"),
            ConsoleAction::Raw(CommandRecord::new("GARBAGE", vec![]))
        );
        assert_eq!(
            action("raw CMD_MOTOR#5000#5000"),
            ConsoleAction::Raw(CommandRecord::new(
                "CMD_MOTOR",
                vec!["5000".into(), "5000".into()]
            ))
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse_line("   "), Ok(None));
        assert!(parse_line("motor 10").is_err());
        assert!(parse_line("ledmode disco").is_err());
        assert!(parse_line("record maybe").is_err());
        assert!(parse_line("fly").is_err());
    }

    #[test]
    fn test_format_events() {
        assert_eq!(
            format_event(&SessionEvent::Response(ResponseRecord::ok(
                "CMD_SONIC",
                vec!["42.5".into()]
            ))),
            "Distance: 42.5 cm"
        );
        assert_eq!(
            format_event(&SessionEvent::Telemetry(ResponseRecord::ok(
                "CMD_LINE",
                vec!["5".into()]
            ))),
            "[telemetry] Line sensors: 101"
        );
        assert_eq!(
            format_event(&SessionEvent::Telemetry(ResponseRecord::ok(
                "CMD_MOTOR_STATE",
                vec!["300".into(), "-300".into()]
            ))),
            "[telemetry] Tracks: 300 -300"
        );
        assert_eq!(
            format_event(&SessionEvent::Response(ResponseRecord::err(
                "CMD_SERVO",
                ErrReason::BadIndex
            ))),
            "CMD_SERVO failed: BadIndex"
        );
        assert_eq!(
            format_event(&SessionEvent::Response(ResponseRecord::protocol_error(
                ErrReason::DecodeError
            ))),
            "ERR failed: DecodeError"
        );
        assert_eq!(
            format_event(&SessionEvent::Response(ResponseRecord::ok(
                "CMD_MOTOR",
                vec!["2000".into(), "2000".into()]
            ))),
            "CMD_MOTOR OK 2000 2000"
        );
        assert_eq!(
            format_event(&SessionEvent::StateChanged(SessionState::Reconnecting)),
            "[link] Reconnecting"
        );
        assert_eq!(
            format_event(&SessionEvent::Error(SessionError::NotConnected(
                "CMD_STOP".into()
            ))),
            "[error] CMD_STOP was dropped because the tank is not connected"
        );
    }
}
