//! # Actuator State

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::{ClampAction, LedMode, OperationMode};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default angle of any servo with no home position configured
pub const SERVO_DEFAULT_DEG: i64 = 90;

pub const SERVO_MIN_DEG: i64 = 0;
pub const SERVO_MAX_DEG: i64 = 180;

pub const LED_CHANNEL_MAX: i64 = 255;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Last demanded state of every actuator on the tank.
///
/// All values held here are already within their hardware limits.
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorState {
    /// Left and right motor speeds
    pub motors: (i64, i64),

    /// Servo angles, indexed by channel.
    ///
    /// Units: degrees
    pub servos_deg: Vec<i64>,

    /// LED colours, indexed by LED
    pub leds: Vec<[u8; 3]>,

    pub led_mode: LedMode,

    pub op_mode: OperationMode,

    pub clamp: ClampAction,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ActuatorState {
    /// Create the startup state: motors stopped, servos at home, LEDs off.
    pub fn new(num_servos: usize, servo_home_deg: &[i64], num_leds: usize) -> Self {
        let servos_deg = (0..num_servos)
            .map(|i| {
                clamp_servo(
                    servo_home_deg
                        .get(i)
                        .copied()
                        .unwrap_or(SERVO_DEFAULT_DEG),
                )
            })
            .collect();

        Self {
            motors: (0, 0),
            servos_deg,
            leds: vec![[0; 3]; num_leds],
            led_mode: LedMode::default(),
            op_mode: OperationMode::default(),
            clamp: ClampAction::default(),
        }
    }

    pub fn num_servos(&self) -> usize {
        self.servos_deg.len()
    }

    pub fn num_leds(&self) -> usize {
        self.leds.len()
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Limit a motor speed demand to `[-max, max]`.
pub fn clamp_motor(speed: i64, max: i64) -> i64 {
    let max = max.abs();
    speed.max(-max).min(max)
}

pub fn clamp_servo(angle_deg: i64) -> i64 {
    angle_deg.max(SERVO_MIN_DEG).min(SERVO_MAX_DEG)
}

pub fn clamp_led_channel(value: i64) -> u8 {
    value.max(0).min(LED_CHANNEL_MAX) as u8
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------
