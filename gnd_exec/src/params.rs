//! # Ground Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

use comms_if::{net::DEFAULT_MAX_FRAME_LEN, tc::DEFAULT_MAX_LINE_LEN};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GndExecParams {
    /// Address of the tank's command server
    pub cmd_endpoint: String,

    /// Address of the tank's video stream server
    pub video_endpoint: String,

    /// File the console history is kept in, relative to the session directory's parent
    pub history_file: PathBuf,

    pub session: SessionParams,

    pub controller: ControllerParams,

    pub video: VideoClientParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionParams {
    /// Connect as soon as the session starts rather than waiting to be asked
    pub auto_connect: bool,

    /// Units: milliseconds
    pub connect_timeout_ms: u64,

    /// Socket read timeout, sets how often the session checks for outgoing commands.
    ///
    /// Units: milliseconds
    pub poll_ms: u64,

    /// Longest accepted response line, in bytes including the terminator
    pub max_line_len: usize,

    /// First wait before reconnecting, doubled after every failed attempt.
    ///
    /// Units: milliseconds
    pub backoff_initial_ms: u64,

    /// Longest wait before reconnecting.
    ///
    /// Units: milliseconds
    pub backoff_max_ms: u64,

    /// A request with no response after this long is reported as failed.
    ///
    /// Units: milliseconds
    pub response_timeout_ms: u64,

    /// Period of the keepalive sent while connected. 0 disables it.
    ///
    /// Units: milliseconds
    pub heartbeat_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerParams {
    /// Units: milliseconds
    pub tick_ms: u64,

    /// Lower bound on the tick, so the tank isn't flooded with commands.
    ///
    /// Units: milliseconds
    pub min_command_interval_ms: u64,

    /// Stick deflections with magnitude up to and including this are treated as zero
    pub deadzone: f64,

    /// Motor speed sent at full deflection
    pub max_motor_speed: i64,

    /// Treat stick up as forward. Most controllers report up as negative.
    pub invert_y: bool,

    /// Change in camera servo angle per tick at full deflection.
    ///
    /// Units: degrees
    pub servo_step_deg: f64,

    /// Units: degrees
    pub servo_min_deg: i64,

    /// Units: degrees
    pub servo_max_deg: i64,

    /// Servo channel of the camera pan servo
    pub pan_servo: usize,

    /// Servo channel of the camera tilt servo
    pub tilt_servo: usize,

    /// Units: degrees
    pub pan_home_deg: i64,

    /// Units: degrees
    pub tilt_home_deg: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoClientParams {
    /// Start receiving video as soon as the executable starts
    pub auto_start: bool,

    /// Frames larger than this end the video connection
    pub max_frame_len: usize,

    /// Units: milliseconds
    pub connect_timeout_ms: u64,

    /// Socket read timeout, sets how quickly the client notices it's been stopped.
    ///
    /// Units: milliseconds
    pub poll_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Parameter values which load but can't be used together.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum GndParamsError {
    #[error("Camera servo limits are reversed, min {min} deg is above max {max} deg")]
    ServoLimitsReversed { min: i64, max: i64 },

    #[error("Camera {which} home of {angle} deg is outside the servo limits {min}-{max} deg")]
    HomeOutsideLimits {
        which: &'static str,
        angle: i64,
        min: i64,
        max: i64,
    },
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GndExecParams {
    fn default() -> Self {
        Self {
            cmd_endpoint: "127.0.0.1:5003".into(),
            video_endpoint: "127.0.0.1:8003".into(),
            history_file: PathBuf::from("gnd_history.txt"),
            session: SessionParams::default(),
            controller: ControllerParams::default(),
            video: VideoClientParams::default(),
        }
    }
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            auto_connect: true,
            connect_timeout_ms: 2000,
            poll_ms: 10,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            backoff_initial_ms: 250,
            backoff_max_ms: 8000,
            response_timeout_ms: 2000,
            heartbeat_ms: 1000,
        }
    }
}

impl Default for ControllerParams {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            min_command_interval_ms: 20,
            deadzone: 0.1,
            max_motor_speed: 4095,
            invert_y: true,
            servo_step_deg: 5.0,
            servo_min_deg: 90,
            servo_max_deg: 150,
            pan_servo: 0,
            tilt_servo: 1,
            pan_home_deg: 90,
            tilt_home_deg: 140,
        }
    }
}

impl Default for VideoClientParams {
    fn default() -> Self {
        Self {
            auto_start: false,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            connect_timeout_ms: 2000,
            poll_ms: 100,
        }
    }
}

impl GndExecParams {
    /// Check the values which depend on each other, called once the parameters are loaded.
    pub fn validate(&self) -> Result<(), GndParamsError> {
        self.controller.validate()
    }
}

impl ControllerParams {
    pub fn validate(&self) -> Result<(), GndParamsError> {
        let (min, max) = (self.servo_min_deg, self.servo_max_deg);

        if min > max {
            return Err(GndParamsError::ServoLimitsReversed { min, max });
        }

        for &(which, angle) in [("pan", self.pan_home_deg), ("tilt", self.tilt_home_deg)].iter() {
            if angle < min || angle > max {
                return Err(GndParamsError::HomeOutsideLimits {
                    which,
                    angle,
                    min,
                    max,
                });
            }
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults_fill_missing() {
        let p: GndExecParams = toml::from_str(
            r#"
            cmd_endpoint = "192.168.1.20:5003"

            [controller]
            deadzone = 0.2
            "#,
        )
        .unwrap();

        assert_eq!(p.cmd_endpoint, "192.168.1.20:5003");
        assert_eq!(p.controller.deadzone, 0.2);
        assert_eq!(p.controller.tilt_home_deg, 140);
        assert_eq!(p.session.backoff_max_ms, 8000);
    }

    #[test]
    fn test_shipped_params_file() {
        let p: GndExecParams = toml::from_str(include_str!("../../params/gnd_exec.toml")).unwrap();

        assert_eq!(p.cmd_endpoint, "127.0.0.1:5003");
        assert_eq!(p.controller.servo_max_deg, 150);
        assert!(p.session.heartbeat_ms > 0);
        assert_eq!(p.validate(), Ok(()));
    }

    #[test]
    fn test_servo_limits_checked() {
        let p: GndExecParams = toml::from_str(
            r#"
            [controller]
            servo_min_deg = 150
            servo_max_deg = 90
            "#,
        )
        .unwrap();
        assert_eq!(
            p.validate(),
            Err(GndParamsError::ServoLimitsReversed { min: 150, max: 90 })
        );

        let p = ControllerParams {
            tilt_home_deg: 170,
            ..Default::default()
        };
        assert_eq!(
            p.validate(),
            Err(GndParamsError::HomeOutsideLimits {
                which: "tilt",
                angle: 170,
                min: 90,
                max: 150
            })
        );
    }
}
