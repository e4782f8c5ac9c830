//! # Tank Executable Parameters

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::Deserialize;

use comms_if::{net::DEFAULT_MAX_FRAME_LEN, tc::DEFAULT_MAX_LINE_LEN};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TankExecParams {
    // ---- NETWORK ----
    /// Endpoint the command server listens on
    pub cmd_endpoint: String,

    /// Endpoint the video stream server listens on
    pub video_endpoint: String,

    /// What to do when a second client connects while a session is active
    pub second_client_policy: SecondClientPolicy,

    /// Longest accepted command line, in bytes including the terminator
    pub max_line_len: usize,

    /// A session with no traffic for this long is dropped. 0 disables the check.
    ///
    /// Units: milliseconds
    pub idle_timeout_ms: u64,

    /// Socket read timeout, sets how quickly threads notice shutdown.
    ///
    /// Units: milliseconds
    pub poll_timeout_ms: u64,

    /// Socket write timeout for the command session.
    ///
    /// Units: milliseconds
    pub write_timeout_ms: u64,

    /// Number of records which may be queued for the session writer
    pub outbound_queue_len: usize,

    // ---- ACTUATORS ----
    /// Largest absolute motor speed
    pub max_motor_speed: i64,

    /// Number of servo channels fitted
    pub num_servos: usize,

    /// Angle each servo is put to on startup.
    ///
    /// Units: degrees
    pub servo_home_deg: Vec<i64>,

    /// Number of individually addressable LEDs
    pub num_leds: usize,

    // ---- SENSORS ----
    /// Longest time a sensor read may take before it's reported as a timeout.
    ///
    /// Units: milliseconds
    pub sensor_timeout_ms: u64,

    /// Period between unsolicited telemetry pushes. 0 disables telemetry.
    ///
    /// Units: milliseconds
    pub telemetry_period_ms: u64,

    // ---- VIDEO ----
    pub video: VideoParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VideoParams {
    /// Width of the simulated camera image in pixels
    pub width: u32,

    /// Height of the simulated camera image in pixels
    pub height: u32,

    /// Frame rate of the camera
    pub fps: u32,

    /// JPEG quality, 1 to 100
    pub jpeg_quality: u8,

    /// Largest frame that will be sent to a viewer
    pub max_frame_len: usize,

    /// A viewer which can't accept a frame for this long is dropped.
    ///
    /// Units: milliseconds
    pub viewer_write_timeout_ms: u64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SecondClientPolicy {
    /// Close the current session and serve the new client
    Evict,

    /// Answer the new client with `ERR#Busy` and close it
    Reject,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for TankExecParams {
    fn default() -> Self {
        Self {
            cmd_endpoint: "0.0.0.0:5003".into(),
            video_endpoint: "0.0.0.0:8003".into(),
            second_client_policy: SecondClientPolicy::Evict,
            max_line_len: DEFAULT_MAX_LINE_LEN,
            idle_timeout_ms: 5000,
            poll_timeout_ms: 100,
            write_timeout_ms: 1000,
            outbound_queue_len: 64,
            max_motor_speed: 4095,
            num_servos: 3,
            servo_home_deg: vec![90, 140, 90],
            num_leds: 4,
            sensor_timeout_ms: 200,
            telemetry_period_ms: 1000,
            video: VideoParams::default(),
        }
    }
}

impl Default for VideoParams {
    fn default() -> Self {
        Self {
            width: 400,
            height: 300,
            fps: 15,
            jpeg_quality: 70,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            viewer_write_timeout_ms: 1000,
        }
    }
}

impl Default for SecondClientPolicy {
    fn default() -> Self {
        SecondClientPolicy::Evict
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_params_use_defaults() {
        let p: TankExecParams = toml::from_str(
            r#"
            max_motor_speed = 2000
            second_client_policy = "reject"

            [video]
            fps = 5
            "#,
        )
        .unwrap();

        assert_eq!(p.max_motor_speed, 2000);
        assert_eq!(p.second_client_policy, SecondClientPolicy::Reject);
        assert_eq!(p.video.fps, 5);
        assert_eq!(p.video.width, 400);
        assert_eq!(p.cmd_endpoint, "0.0.0.0:5003");
    }

    #[test]
    fn test_shipped_params_file() {
        let p: TankExecParams =
            toml::from_str(include_str!("../../params/tank_exec.toml")).unwrap();

        assert_eq!(p.servo_home_deg.len(), p.num_servos);
        assert_eq!(p.second_client_policy, SecondClientPolicy::Evict);
    }
}
